use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{backup, db, deploy, list, monitor, provision, restore, setup_app, ssl, version};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_ENV: &str = "SHIPYARD_LOG";

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(version = VERSION)]
#[command(about = "Release orchestrator for web applications on a shared server")]
struct Cli {
    /// Config directory (default: $SHIPYARD_CONFIG_DIR, /etc/shipyard as root, ~/.config/shipyard)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check required tools and create working directories
    Provision(provision::ProvisionArgs),
    /// Run the deployment pipeline for one or all applications
    Deploy(deploy::DeployArgs),
    /// Back up one or all applications and apply retention
    Backup(backup::BackupArgs),
    /// Restore an application from a backup
    Restore(restore::RestoreArgs),
    /// Issue TLS certificates for SSL-enabled applications
    Ssl(ssl::SslArgs),
    /// Dump an application's database
    #[command(name = "db:backup")]
    DbBackup(db::DbBackupArgs),
    /// Optimize an application's database
    #[command(name = "db:optimize")]
    DbOptimize(db::DbOptimizeArgs),
    /// List discovered applications
    List(list::ListArgs),
    /// Show release, backup and deployment state per application
    Monitor(monitor::MonitorArgs),
    /// Register a new application
    SetupApp(setup_app::SetupAppArgs),
    /// Show version and host information
    Version(version::VersionArgs),
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging();
    shipyard::interrupt::install_handlers();

    let global = GlobalArgs {
        config_dir: cli.config_dir,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        tracing::error!(error = %err.describe(), "Could not write response");
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
