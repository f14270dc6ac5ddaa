use clap::Args;
use serde::Serialize;

use shipyard::paths;
use shipyard::registry::Application;

use super::CmdResult;

#[derive(Args)]
pub struct SetupAppArgs {
    /// Application name (directory name under APPS_ROOT)
    pub name: String,

    /// Domain the application is served on
    pub domain: String,
}

#[derive(Serialize)]
pub struct SetupAppOutput {
    pub config_path: String,
    pub application: Application,
}

pub fn run(args: SetupAppArgs, global: &super::GlobalArgs) -> CmdResult<SetupAppOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let application = ctx.registry().register(&args.name, &args.domain)?;
    shipyard::log_status!("setup", "Registered {} at {}", application.name, application.root_path.display());

    Ok((
        SetupAppOutput {
            config_path: paths::app_config(ctx.store.dir(), &application.name)
                .display()
                .to_string(),
            application,
        },
        0,
    ))
}
