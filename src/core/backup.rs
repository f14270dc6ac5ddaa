//! Backup Manager: point-in-time snapshots of an application.
//!
//! ```text
//! <BACKUP_ROOT>/<app>/<id>/database.sql.gz   optional data dump
//! <BACKUP_ROOT>/<app>/<id>/files.tar.gz      application files
//! <BACKUP_ROOT>/<app>/<id>/manifest.json     written last; marks the backup complete
//! ```
//!
//! Ids are UTC timestamps (`20260314_090507`, `-N` on same-second collisions)
//! so lexical and chronological order agree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::datastore::DataStore;
use crate::defaults;
use crate::error::{Error, ErrorCode, Result};
use crate::exec::RunLimits;
use crate::paths;
use crate::registry::Application;
use crate::release;
use crate::utils::stamp::{self, TimestampId};
use crate::utils::{archive, io};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_ARCHIVE: &str = "files.tar.gz";
pub const DATA_ARCHIVE: &str = "database.sql.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub count: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub app: String,
    pub timestamp: DateTime<Utc>,
    pub backup_id: String,
    pub files: FileStats,
    pub database: Presence,
    /// SHA-256 of `files.tar.gz`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Live release at backup time (zero-downtime only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub app_name: String,
    pub id: String,
    pub directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_archive: Option<PathBuf>,
    pub file_archive: PathBuf,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionOutcome {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
}

/// Backup ids, newest first, paired with their creation time.
pub type RetentionInput = [(TimestampId, DateTime<Utc>)];

/// Decide which backups survive a sweep.
///
/// Candidates are the newest `max_backups`. Candidates older than
/// `retention_days` are dropped as long as at least one candidate is younger;
/// when every candidate is older they are all kept, so a host that stopped
/// backing up still has its last snapshots. `retention_days == 0` disables
/// the age rule.
pub fn retention_plan(
    backups_desc: &RetentionInput,
    max_backups: usize,
    retention_days: u32,
    now: DateTime<Utc>,
) -> (Vec<TimestampId>, Vec<TimestampId>) {
    let max_backups = max_backups.max(1);
    let (candidates, overflow) = backups_desc.split_at(backups_desc.len().min(max_backups));

    let cutoff = now - ChronoDuration::days(i64::from(retention_days));
    let is_fresh = |created: &DateTime<Utc>| retention_days == 0 || *created >= cutoff;
    let any_fresh = candidates.iter().any(|(_, created)| is_fresh(created));

    let mut keep = Vec::new();
    let mut remove: Vec<TimestampId> = Vec::new();
    for (id, created) in candidates {
        if !any_fresh || is_fresh(created) {
            keep.push(id.clone());
        } else {
            remove.push(id.clone());
        }
    }
    remove.extend(overflow.iter().map(|(id, _)| id.clone()));
    (keep, remove)
}

pub struct BackupManager<'a> {
    settings: &'a Settings,
    datastore: &'a dyn DataStore,
}

impl<'a> BackupManager<'a> {
    pub fn new(settings: &'a Settings, datastore: &'a dyn DataStore) -> Self {
        Self {
            settings,
            datastore,
        }
    }

    fn app_dir(&self, app_name: &str) -> PathBuf {
        paths::app_backups(&self.settings.backup_root, app_name)
    }

    fn excludes(app: &Application) -> Vec<String> {
        let mut excludes = defaults::default_backup_excludes();
        if app.flags.zero_downtime {
            excludes.extend(defaults::default_zero_downtime_excludes());
        }
        excludes
    }

    /// Snapshot data, then files, then write the manifest. Only the file
    /// archive is fatal; a failed dump is recorded as a warning.
    pub fn create_backup(&self, app: &Application, limits: &RunLimits) -> Result<Backup> {
        let (id, dir) = stamp::allocate_dir(&self.app_dir(&app.name), stamp::BACKUP_FORMAT, Utc::now())
            .map_err(|e| Error::backup_failed(&app.name, e.describe()))?;

        match self.write_backup(app, &id, &dir, limits) {
            Ok(backup) => Ok(backup),
            Err(err) => {
                if let Err(cleanup) = io::remove_path(&dir, "discard failed backup") {
                    tracing::warn!(app = %app.name, error = %cleanup.describe(), "Could not remove failed backup");
                }
                Err(err)
            }
        }
    }

    fn write_backup(
        &self,
        app: &Application,
        id: &TimestampId,
        dir: &Path,
        limits: &RunLimits,
    ) -> Result<Backup> {
        let backup_id = id.to_string();
        let mut warnings = Vec::new();

        let data_path = dir.join(DATA_ARCHIVE);
        let database = match self.datastore.dump(app, &data_path, limits) {
            Ok(()) => Presence::Yes,
            Err(err)
                if matches!(
                    err.code,
                    ErrorCode::DeployInterrupted | ErrorCode::DeployStageTimeout
                ) =>
            {
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(app = %app.name, error = %err.describe(), "Database dump skipped");
                warnings.push(format!("database dump skipped: {}", err.describe()));
                let _ = io::remove_path(&data_path, "remove partial dump");
                Presence::No
            }
        };

        let files_path = dir.join(FILES_ARCHIVE);
        let stats = archive::create_tar_gz(&app.root_path, &files_path, &Self::excludes(app))
            .map_err(|e| Error::backup_failed(&app.name, e.describe()))?;

        let manifest = BackupManifest {
            app: app.name.clone(),
            timestamp: id.created_at(),
            backup_id: backup_id.clone(),
            files: FileStats {
                count: stats.file_count,
                size: stats.archive_size,
            },
            database,
            checksum: Some(stats.sha256),
            release: if app.flags.zero_downtime {
                release::current_release(&app.root_path)
            } else {
                None
            },
            warnings,
        };
        io::write_json_atomic(&dir.join(MANIFEST_FILE), &manifest, "write backup manifest")
            .map_err(|e| Error::backup_failed(&app.name, e.describe()))?;

        crate::log_status!(
            "backup",
            "Created backup {} for {} ({} files, database: {})",
            backup_id,
            app.name,
            manifest.files.count,
            if database == Presence::Yes { "yes" } else { "no" }
        );

        Ok(Backup {
            app_name: app.name.clone(),
            id: backup_id,
            directory: dir.to_path_buf(),
            data_archive: (database == Presence::Yes).then_some(data_path),
            file_archive: files_path,
            manifest,
        })
    }

    fn load_dir(&self, app_name: &str, id: &str, dir: PathBuf) -> Result<Backup> {
        let manifest: BackupManifest = io::read_json(&dir.join(MANIFEST_FILE), "read backup manifest")?;
        let data_path = dir.join(DATA_ARCHIVE);
        Ok(Backup {
            app_name: app_name.to_string(),
            id: id.to_string(),
            data_archive: (manifest.database == Presence::Yes && data_path.is_file()).then_some(data_path),
            file_archive: dir.join(FILES_ARCHIVE),
            directory: dir,
            manifest,
        })
    }

    pub fn load(&self, app_name: &str, id: &str) -> Result<Backup> {
        let parsed: TimestampId = id
            .parse()
            .map_err(|_| Error::backup_not_found(app_name, id))?;
        let dir = self.app_dir(app_name).join(parsed.to_string());
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::backup_not_found(app_name, id));
        }
        self.load_dir(app_name, id, dir)
    }

    /// Complete backups, newest first. Directories without a manifest are
    /// in-progress or abandoned and are skipped.
    pub fn list(&self, app_name: &str) -> Result<Vec<Backup>> {
        let root = self.app_dir(app_name);
        let mut backups = Vec::new();
        for id in stamp::list_ids_desc(&root)? {
            let id = id.to_string();
            let dir = root.join(&id);
            if !dir.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match self.load_dir(app_name, &id, dir) {
                Ok(backup) => backups.push(backup),
                Err(err) => {
                    tracing::warn!(app = app_name, backup = %id, error = %err.describe(), "Skipping unreadable backup")
                }
            }
        }
        Ok(backups)
    }

    pub fn latest(&self, app_name: &str) -> Result<Option<Backup>> {
        Ok(self.list(app_name)?.into_iter().next())
    }

    /// Replace the application's files and data with a backup.
    ///
    /// Verifies the archive checksum before touching anything, clears every
    /// non-excluded path, extracts, then restores the data dump. Running it
    /// twice with the same id leaves the same state.
    pub fn restore(&self, app: &Application, backup_id: &str, limits: &RunLimits) -> Result<Backup> {
        let backup = self.load(&app.name, backup_id)?;
        let fail = |problem: String| Error::rollback_failed(&app.name, Some(backup_id.to_string()), problem);

        if let Some(expected) = &backup.manifest.checksum {
            let actual = archive::file_sha256(&backup.file_archive).map_err(|e| fail(e.describe()))?;
            if &actual != expected {
                return Err(fail(format!(
                    "checksum mismatch for {} (expected {}, found {})",
                    backup.file_archive.display(),
                    expected,
                    actual
                )));
            }
        } else if !backup.file_archive.is_file() {
            return Err(fail(format!("{} is missing", backup.file_archive.display())));
        }

        let excludes = Self::excludes(app);
        archive::clear_tree(&app.root_path, &excludes).map_err(|e| fail(e.describe()))?;
        archive::extract_tar_gz(&backup.file_archive, &app.root_path).map_err(|e| fail(e.describe()))?;

        if let Some(data) = &backup.data_archive {
            self.datastore
                .restore(app, data, limits)
                .map_err(|e| fail(format!("database restore: {}", e.describe())))?;
        }

        match &backup.manifest.release {
            Some(release_id) => {
                if paths::release(&app.root_path, release_id).is_dir() {
                    release::switch_current(&app.root_path, release_id).map_err(|e| fail(e.describe()))?;
                } else {
                    tracing::warn!(app = %app.name, release = %release_id, "Recorded release no longer exists; current left as is");
                }
            }
            // Nothing was live when the backup was taken.
            None if app.flags.zero_downtime => {
                io::remove_path(&paths::current(&app.root_path), "remove current link")
                    .map_err(|e| fail(e.describe()))?;
            }
            None => {}
        }

        crate::log_status!("backup", "Restored {} from backup {}", app.name, backup_id);
        Ok(backup)
    }

    /// Apply the retention policy to one application's backups.
    pub fn cleanup_retention(&self, app_name: &str) -> Result<RetentionOutcome> {
        let backups = self.list(app_name)?;
        let input: Vec<(TimestampId, DateTime<Utc>)> = backups
            .iter()
            .filter_map(|b| {
                let id: TimestampId = b.id.parse().ok()?;
                let created = id.created_at();
                Some((id, created))
            })
            .collect();

        let (keep, remove) = retention_plan(
            &input,
            self.settings.max_backups,
            self.settings.retention_days,
            Utc::now(),
        );

        let root = self.app_dir(app_name);
        let mut outcome = RetentionOutcome {
            kept: keep.iter().map(|id| id.to_string()).collect(),
            removed: Vec::new(),
        };
        for id in remove {
            let id = id.to_string();
            io::remove_path(&root.join(&id), "remove expired backup")?;
            outcome.removed.push(id);
        }

        if !outcome.removed.is_empty() {
            crate::log_status!(
                "backup",
                "Retention removed {} backup(s) of {}",
                outcome.removed.len(),
                app_name
            );
        }
        Ok(outcome)
    }

    /// Data-only dump under `<BACKUP_ROOT>/<app>/database/`.
    pub fn dump_database(&self, app: &Application, limits: &RunLimits) -> Result<PathBuf> {
        let dir = self.app_dir(&app.name).join("database");
        io::ensure_dir(&dir, "create database dump directory")?;
        let id = TimestampId::new(Utc::now(), stamp::BACKUP_FORMAT, 0);
        let mut path = dir.join(format!("{}.sql.gz", id));
        let mut seq = 1;
        while path.exists() {
            path = dir.join(format!("{}.sql.gz", TimestampId::new(Utc::now(), stamp::BACKUP_FORMAT, seq)));
            seq += 1;
        }

        self.datastore
            .dump(app, &path, limits)
            .map_err(|e| Error::backup_failed(&app.name, e.describe()))?;
        crate::log_status!("backup", "Dumped database of {} to {}", app.name, path.display());
        Ok(path)
    }
}
