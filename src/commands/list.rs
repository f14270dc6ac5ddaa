use clap::Args;
use serde::Serialize;

use shipyard::registry::Application;

use super::CmdResult;

#[derive(Args)]
pub struct ListArgs {}

#[derive(Serialize)]
pub struct ListOutput {
    pub apps_root: String,
    pub count: usize,
    pub applications: Vec<Application>,
}

pub fn run(_args: ListArgs, global: &super::GlobalArgs) -> CmdResult<ListOutput> {
    let ctx = global.context()?;
    let applications = ctx.registry().scan()?;

    Ok((
        ListOutput {
            apps_root: ctx.settings.apps_root.display().to_string(),
            count: applications.len(),
            applications,
        },
        0,
    ))
}
