use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use shipyard::datastore::CommandDataStore;
use shipyard::history;
use shipyard::host::{self, ServerInfo};
use shipyard::release;

use super::CmdResult;

#[derive(Args)]
pub struct MonitorArgs {}

#[derive(Serialize)]
pub struct AppStatus {
    pub name: String,
    pub domain: String,
    pub zero_downtime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_release: Option<String>,
    pub releases: usize,
    pub backups: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_backup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
}

#[derive(Serialize)]
pub struct MonitorOutput {
    pub server_info: ServerInfo,
    pub applications: Vec<AppStatus>,
}

pub fn run(_args: MonitorArgs, global: &super::GlobalArgs) -> CmdResult<MonitorOutput> {
    let ctx = global.context()?;
    let datastore = CommandDataStore;
    let manager = ctx.backups(&datastore);

    let mut applications = Vec::new();
    for app in ctx.registry().scan()? {
        let backups = manager.list(&app.name)?;
        let releases = if app.flags.zero_downtime {
            release::list_releases(&app)?.len()
        } else {
            0
        };
        let last = history::last_deployed(&ctx.settings.state_dir, &app.name);

        applications.push(AppStatus {
            current_release: release::current_release(&app.root_path),
            zero_downtime: app.flags.zero_downtime,
            domain: app.domain.clone(),
            releases,
            backups: backups.len(),
            newest_backup: backups.first().map(|b| b.id.clone()),
            last_deployed: last.as_ref().map(|h| h.deployed_at),
            last_run_id: last.map(|h| h.run_id),
            name: app.name,
        });
    }

    Ok((
        MonitorOutput {
            server_info: host::server_info(),
            applications,
        },
        0,
    ))
}
