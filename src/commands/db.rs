use clap::Args;
use serde::Serialize;

use shipyard::datastore::{CommandDataStore, DataStore};
use shipyard::exec::RunLimits;
use shipyard::interrupt::CancelToken;
use shipyard::lock::AppLock;

use super::CmdResult;

#[derive(Args)]
pub struct DbBackupArgs {
    /// Application whose database to dump
    pub app: String,
}

#[derive(Args)]
pub struct DbOptimizeArgs {
    /// Application whose database to optimize
    pub app: String,
}

#[derive(Serialize)]
pub struct DbBackupOutput {
    pub app: String,
    pub path: String,
    pub size: u64,
}

#[derive(Serialize)]
pub struct DbOptimizeOutput {
    pub app: String,
    pub optimized: bool,
}

pub fn run_backup(args: DbBackupArgs, global: &super::GlobalArgs) -> CmdResult<DbBackupOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let app = ctx.registry().resolve(&args.app)?;

    let datastore = CommandDataStore;
    let _lock = AppLock::acquire(&ctx.settings.state_dir, &app.name)?;
    let limits = RunLimits::new(ctx.settings.stage_timeout, CancelToken::new());
    let path = ctx.backups(&datastore).dump_database(&app, &limits)?;
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    Ok((
        DbBackupOutput {
            app: app.name,
            path: path.display().to_string(),
            size,
        },
        0,
    ))
}

pub fn run_optimize(args: DbOptimizeArgs, global: &super::GlobalArgs) -> CmdResult<DbOptimizeOutput> {
    let ctx = global.context()?;
    ctx.require_privilege()?;
    let app = ctx.registry().resolve(&args.app)?;

    let _lock = AppLock::acquire(&ctx.settings.state_dir, &app.name)?;
    let limits = RunLimits::new(ctx.settings.stage_timeout, CancelToken::new());
    CommandDataStore.optimize(&app, &limits)?;
    shipyard::log_status!("db", "Optimized database of {}", app.name);

    Ok((
        DbOptimizeOutput {
            app: app.name,
            optimized: true,
        },
        0,
    ))
}
