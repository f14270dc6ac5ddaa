use clap::Args;
use serde::Serialize;

use shipyard::backup::{FileStats, Presence};
use shipyard::datastore::CommandDataStore;
use shipyard::exec::RunLimits;
use shipyard::interrupt::CancelToken;
use shipyard::lock::AppLock;
use shipyard::output::BulkResult;

use super::CmdResult;

#[derive(Args)]
pub struct BackupArgs {
    /// Application to back up (all applications when omitted)
    pub app: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub backup_id: String,
    pub files: FileStats,
    pub database: Presence,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expired: Vec<String>,
}

pub fn run(args: BackupArgs, global: &super::GlobalArgs) -> CmdResult<BulkResult<BackupOutcome>> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let apps = ctx.applications(args.app.as_deref())?;

    let datastore = CommandDataStore;
    let manager = ctx.backups(&datastore);
    let cancel = CancelToken::new();

    let outcomes = apps
        .iter()
        .map(|app| {
            let outcome = AppLock::acquire(&ctx.settings.state_dir, &app.name).and_then(|_lock| {
                let limits = RunLimits::new(ctx.settings.stage_timeout, cancel.clone());
                let backup = manager.create_backup(app, &limits)?;
                let retention = manager.cleanup_retention(&app.name)?;
                Ok(BackupOutcome {
                    backup_id: backup.id,
                    files: backup.manifest.files,
                    database: backup.manifest.database,
                    warnings: backup.manifest.warnings,
                    expired: retention.removed,
                })
            });
            (app.name.clone(), outcome)
        })
        .collect();

    let bulk = BulkResult::collect("backup", outcomes);
    let exit_code = bulk.exit_code();
    Ok((bulk, exit_code))
}
