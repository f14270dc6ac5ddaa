use clap::Args;
use serde::Serialize;

use shipyard::datastore::CommandDataStore;
use shipyard::exec::RunLimits;
use shipyard::interrupt::CancelToken;
use shipyard::lock::AppLock;
use shipyard::Error;

use super::CmdResult;

#[derive(Args)]
pub struct RestoreArgs {
    /// Application to restore
    pub app: String,

    /// Backup id (newest backup when omitted)
    pub backup_id: Option<String>,
}

#[derive(Serialize)]
pub struct RestoreOutput {
    pub app: String,
    pub backup_id: String,
    pub database_restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

pub fn run(args: RestoreArgs, global: &super::GlobalArgs) -> CmdResult<RestoreOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let app = ctx.registry().resolve(&args.app)?;

    let datastore = CommandDataStore;
    let manager = ctx.backups(&datastore);
    let backup_id = match args.backup_id {
        Some(id) => id,
        None => manager
            .latest(&app.name)?
            .map(|b| b.id)
            .ok_or_else(|| Error::backup_not_found(&app.name, "latest"))?,
    };

    let _lock = AppLock::acquire(&ctx.settings.state_dir, &app.name)?;
    let limits = RunLimits::new(ctx.settings.stage_timeout, CancelToken::new());
    let backup = manager.restore(&app, &backup_id, &limits)?;

    Ok((
        RestoreOutput {
            app: app.name,
            backup_id: backup.id,
            database_restored: backup.data_archive.is_some(),
            release: backup.manifest.release,
        },
        0,
    ))
}
