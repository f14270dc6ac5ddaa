use std::path::PathBuf;

use shipyard::context::RunContext;

pub type CmdResult<T> = shipyard::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub(crate) fn context(&self) -> shipyard::Result<RunContext> {
        RunContext::load(self.config_dir.as_deref())
    }
}

pub mod backup;
pub mod db;
pub mod deploy;
pub mod list;
pub mod monitor;
pub mod provision;
pub mod restore;
pub mod setup_app;
pub mod ssl;
pub mod version;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
    ($args:expr, $global:expr, $module:ident :: $func:ident) => {
        crate::output::map_cmd_result_to_json($module::$func($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (shipyard::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Provision(args) => dispatch!(args, global, provision),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Backup(args) => dispatch!(args, global, backup),
        crate::Commands::Restore(args) => dispatch!(args, global, restore),
        crate::Commands::Ssl(args) => dispatch!(args, global, ssl),
        crate::Commands::DbBackup(args) => dispatch!(args, global, db::run_backup),
        crate::Commands::DbOptimize(args) => dispatch!(args, global, db::run_optimize),
        crate::Commands::List(args) => dispatch!(args, global, list),
        crate::Commands::Monitor(args) => dispatch!(args, global, monitor),
        crate::Commands::SetupApp(args) => dispatch!(args, global, setup_app),
        crate::Commands::Version(args) => dispatch!(args, global, version),
    }
}
