//! External data store behind a trait.
//!
//! The orchestrator never speaks a database protocol. It drives configured
//! commands: dump output streams through gzip into the backup, restore input
//! streams back out of it.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::exec::{self, RunLimits};
use crate::registry::Application;

pub trait DataStore {
    /// Dump the application's data into a gzip file at `dest`.
    fn dump(&self, app: &Application, dest: &Path, limits: &RunLimits) -> Result<()>;

    /// Replace the application's data with the gzip dump at `src`.
    fn restore(&self, app: &Application, src: &Path, limits: &RunLimits) -> Result<()>;

    /// Create the database and user if they don't exist.
    fn provision(&self, app: &Application, limits: &RunLimits) -> Result<()>;

    fn optimize(&self, app: &Application, limits: &RunLimits) -> Result<()>;
}

/// Data store driven by the `DB_*_COMMAND` templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDataStore;

fn io_err(context: &str) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::internal_io(e.to_string(), Some(context.to_string()))
}

impl CommandDataStore {
    fn require(app: &Application, key: &str, step: &str) -> Result<String> {
        exec::render_command(app, key, &app.root_path, &[]).ok_or_else(|| {
            Error::config_missing_key(key, None)
                .with_hint(format!("Set {} to enable {} for {}", key, step, app.name))
        })
    }
}

impl DataStore for CommandDataStore {
    fn dump(&self, app: &Application, dest: &Path, limits: &RunLimits) -> Result<()> {
        let rendered = Self::require(app, "DB_DUMP_COMMAND", "database dump")?;
        let file = File::create(dest).map_err(io_err("create database dump"))?;
        let encoder = GzEncoder::new(file, Compression::default());

        let result = exec::command(&rendered, &app.root_path, limits).run_streaming(encoder);
        let (output, encoder) = match result {
            Ok(pair) => pair,
            Err(err) => {
                let _ = fs::remove_file(dest);
                return Err(err);
            }
        };

        if let Err(err) = exec::check_output(app, "database dump", &rendered, output, limits) {
            drop(encoder);
            let _ = fs::remove_file(dest);
            return Err(err);
        }

        let file = encoder.finish().map_err(io_err("finish database dump"))?;
        file.sync_all().map_err(io_err("sync database dump"))?;
        Ok(())
    }

    fn restore(&self, app: &Application, src: &Path, limits: &RunLimits) -> Result<()> {
        let rendered = Self::require(app, "DB_RESTORE_COMMAND", "database restore")?;
        let file = File::open(src).map_err(io_err("open database dump"))?;
        let output = exec::command(&rendered, &app.root_path, limits)
            .stdin(GzDecoder::new(BufReader::new(file)))
            .run()?;
        exec::check_output(app, "database restore", &rendered, output, limits)?;
        Ok(())
    }

    fn provision(&self, app: &Application, limits: &RunLimits) -> Result<()> {
        exec::run_configured(app, "database", "DB_PROVISION_COMMAND", &app.root_path, limits)?;
        Ok(())
    }

    fn optimize(&self, app: &Application, limits: &RunLimits) -> Result<()> {
        let rendered = Self::require(app, "DB_OPTIMIZE_COMMAND", "database optimize")?;
        exec::run_step(app, "database optimize", &rendered, &app.root_path, limits)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::CancelToken;
    use crate::testing::Fixture;

    fn limits() -> RunLimits {
        RunLimits::new(std::time::Duration::from_secs(30), CancelToken::detached())
    }

    #[test]
    fn dump_and_restore_stream_through_gzip() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let db_file = fx.db_file();
        fs::write(&db_file, "orders: 3\n").unwrap();

        let dump = fx.path().join("database.sql.gz");
        CommandDataStore.dump(&app, &dump, &limits()).unwrap();
        assert_ne!(fs::read(&dump).unwrap(), b"orders: 3\n");

        fs::write(&db_file, "orders: 0\n").unwrap();
        CommandDataStore.restore(&app, &dump, &limits()).unwrap();
        assert_eq!(fs::read_to_string(&db_file).unwrap(), "orders: 3\n");
    }

    #[test]
    fn failed_dump_removes_partial_file() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let dump = fx.path().join("database.sql.gz");

        let err = CommandDataStore.dump(&app, &dump, &limits()).unwrap_err();
        assert_eq!(err.code.as_str(), "deploy.stage_failed");
        assert!(!dump.exists());
    }

    #[test]
    fn disabled_dump_command_is_a_config_error() {
        let fx = Fixture::new();
        let app = fx.app("shop", "DB_DUMP_COMMAND=\n");
        let err = CommandDataStore
            .dump(&app, &fx.path().join("d.gz"), &limits())
            .unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }
}
