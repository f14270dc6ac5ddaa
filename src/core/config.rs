//! Config Store: flat `KEY=value` records in two scopes.
//!
//! `<config_dir>/global.conf` holds global defaults, `<config_dir>/apps/<name>.conf`
//! holds per-application overrides. Lookups go application, then global, then
//! the built-in table in [`crate::defaults`]. Records are validated on load:
//! unknown keys, keys in the wrong scope and malformed lines are errors that
//! carry the offending line number.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::defaults;
use crate::error::{Error, Result};
use crate::paths;
use crate::secret::Secret;
use crate::utils::dotenv::{self, DotenvDocument};
use crate::utils::validation;

/// Records may hold credentials.
pub const RECORD_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Global,
    App,
    Both,
}

impl KeyScope {
    fn allows(self, file: KeyScope) -> bool {
        self == KeyScope::Both || self == file
    }

    fn label(self) -> &'static str {
        match self {
            KeyScope::Global => "global",
            KeyScope::App => "application",
            KeyScope::Both => "any",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub name: &'static str,
    pub scope: KeyScope,
    pub secret: bool,
}

const fn key(name: &'static str, scope: KeyScope) -> KeySpec {
    KeySpec {
        name,
        scope,
        secret: false,
    }
}

pub const KEYS: &[KeySpec] = &[
    // Identity
    key("APP_NAME", KeyScope::App),
    key("APP_PATH", KeyScope::App),
    key("DOMAIN", KeyScope::App),
    key("PHP_VERSION", KeyScope::App),
    // Data store
    key("DB_NAME", KeyScope::App),
    key("DB_USER", KeyScope::App),
    KeySpec {
        name: "DB_PASSWORD",
        scope: KeyScope::App,
        secret: true,
    },
    key("DB_HOST", KeyScope::Both),
    // Features
    key("SSL_ENABLED", KeyScope::Both),
    key("SSL_EMAIL", KeyScope::Both),
    key("QUEUE_ENABLED", KeyScope::Both),
    key("SCHEDULER_ENABLED", KeyScope::Both),
    key("ZERO_DOWNTIME", KeyScope::Both),
    key("BACKUP_SCHEDULE", KeyScope::Both),
    // Source
    key("DEPLOY_METHOD", KeyScope::Both),
    key("REPO_URL", KeyScope::App),
    key("BRANCH", KeyScope::Both),
    key("SOURCE_PATH", KeyScope::App),
    // Host-wide settings
    key("APPS_ROOT", KeyScope::Global),
    key("BACKUP_ROOT", KeyScope::Global),
    key("REPORT_DIR", KeyScope::Global),
    key("STATE_DIR", KeyScope::Global),
    key("DEFAULT_PHP_VERSION", KeyScope::Global),
    key("DOMAIN_SUFFIX", KeyScope::Global),
    key("MAX_BACKUPS", KeyScope::Global),
    key("RETENTION_DAYS", KeyScope::Global),
    key("KEEP_RELEASES", KeyScope::Global),
    key("STAGE_TIMEOUT", KeyScope::Global),
    key("REQUIRE_ROOT", KeyScope::Global),
    key("FRAMEWORKS", KeyScope::Global),
    key("REQUIRED_TOOLS", KeyScope::Global),
    key("STAGES", KeyScope::Both),
    // Command templates
    key("PRE_DEPLOY_HOOK", KeyScope::Both),
    key("POST_DEPLOY_HOOK", KeyScope::Both),
    key("CLONE_COMMAND", KeyScope::Both),
    key("CODE_UPDATE_COMMAND", KeyScope::Both),
    key("DEPENDENCY_COMMAND", KeyScope::Both),
    key("DB_PROVISION_COMMAND", KeyScope::Both),
    key("MIGRATE_COMMAND", KeyScope::Both),
    key("ASSET_COMMAND", KeyScope::Both),
    key("OPTIMIZE_COMMAND", KeyScope::Both),
    key("RELOAD_COMMAND", KeyScope::Both),
    key("QUEUE_COMMAND", KeyScope::Both),
    key("SCHEDULER_COMMAND", KeyScope::Both),
    key("VERIFY_COMMAND", KeyScope::Both),
    key("VERIFY_URL", KeyScope::Both),
    key("DB_DUMP_COMMAND", KeyScope::Both),
    key("DB_RESTORE_COMMAND", KeyScope::Both),
    key("DB_OPTIMIZE_COMMAND", KeyScope::Both),
    key("SSL_COMMAND", KeyScope::Both),
];

pub fn key_spec(name: &str) -> Option<&'static KeySpec> {
    KEYS.iter().find(|spec| spec.name == name)
}

// ============================================================================
// Config Record
// ============================================================================

/// One `KEY=value` file. Key order and comments survive a rewrite.
#[derive(Debug, Clone)]
pub struct ConfigRecord {
    path: PathBuf,
    scope: KeyScope,
    doc: DotenvDocument,
}

impl ConfigRecord {
    pub fn empty(path: PathBuf, scope: KeyScope) -> Self {
        Self {
            path,
            scope,
            doc: DotenvDocument::default(),
        }
    }

    pub fn parse(content: &str, path: PathBuf, scope: KeyScope) -> Result<Self> {
        let doc = DotenvDocument::parse(content).map_err(|e| dotenv::malformed_to_error(&path, e))?;

        for (name, _, line) in doc.entries() {
            validate_key(name, scope, &path, line)?;
        }

        Ok(Self { path, scope, doc })
    }

    /// Load a record; a missing file is an empty record.
    pub fn load(path: &Path, scope: KeyScope) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty(path.to_path_buf(), scope));
        }
        let content = crate::utils::io::read_file(path, &format!("read {}", path.display()))?;
        Self::parse(&content, path.to_path_buf(), scope)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.doc.get(key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key, self.scope, &self.path, 0)?;
        self.doc.set(key, value);
        Ok(())
    }

    /// Write-temp-then-rename, owner-only.
    pub fn save(&self) -> Result<()> {
        self.doc.save(&self.path, RECORD_MODE)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.doc.entries().map(|(k, v, _)| (k, v))
    }
}

fn validate_key(name: &str, scope: KeyScope, path: &Path, line: usize) -> Result<()> {
    let spec = key_spec(name).ok_or_else(|| {
        Error::config_unknown_key(
            name,
            path.display().to_string(),
            line,
            format!("unknown key {}", name),
        )
    })?;

    if !spec.scope.allows(scope) {
        return Err(Error::config_unknown_key(
            name,
            path.display().to_string(),
            line,
            format!(
                "{} is a {} key and cannot be set in a {} record",
                name,
                spec.scope.label(),
                scope.label()
            ),
        ));
    }
    Ok(())
}

// ============================================================================
// Merged view
// ============================================================================

/// Application record layered over the global record and built-in defaults.
/// Immutable once built; credential changes go through [`ConfigStore::set_credential`].
#[derive(Debug, Clone)]
pub struct MergedConfig {
    app: Option<ConfigRecord>,
    global: ConfigRecord,
}

impl MergedConfig {
    pub fn new(app: Option<ConfigRecord>, global: ConfigRecord) -> Self {
        Self { app, global }
    }

    pub fn global_only(global: ConfigRecord) -> Self {
        Self { app: None, global }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.app
            .as_ref()
            .and_then(|r| r.get(key))
            .or_else(|| self.global.get(key))
            .map(str::to_string)
            .or_else(|| defaults::default_value(key))
    }

    /// Explicitly set in the application record (not inherited).
    pub fn app_value(&self, key: &str) -> Option<&str> {
        self.app.as_ref().and_then(|r| r.get(key)).filter(|v| !v.is_empty())
    }

    pub fn get_or_empty(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }

    /// Command template for `key`; `None` when it is set to an empty value.
    pub fn command(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Some(value) => parse_bool(key, &value),
            None => Ok(false),
        }
    }

    pub fn secret(&self, key: &str) -> Option<Secret> {
        self.get(key).filter(|v| !v.is_empty()).map(Secret::new)
    }
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" | "" => Ok(false),
        _ => Err(Error::config_invalid_value(
            key,
            Some(value.to_string()),
            "expected true/false",
        )),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Error::config_invalid_value(key, Some(value.to_string()), "expected a non-negative integer")
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Settings
// ============================================================================

/// Host-wide settings parsed once from the global record.
#[derive(Debug, Clone)]
pub struct Settings {
    pub apps_root: PathBuf,
    pub backup_root: PathBuf,
    pub report_dir: PathBuf,
    pub state_dir: PathBuf,
    pub default_runtime_version: String,
    pub domain_suffix: String,
    pub max_backups: usize,
    pub retention_days: u32,
    pub keep_releases: usize,
    pub stage_timeout: Duration,
    pub require_root: bool,
    pub stages: Vec<String>,
    pub frameworks: Vec<String>,
    pub required_tools: Vec<String>,
}

impl Settings {
    pub fn from_global(global: &ConfigRecord) -> Result<Self> {
        let merged = MergedConfig::global_only(global.clone());
        let value = |key: &str| merged.get_or_empty(key);
        let path = |key: &str| paths::expand(Path::new(&value(key)));

        let max_backups: usize = parse_number("MAX_BACKUPS", &value("MAX_BACKUPS"))?;
        if max_backups == 0 {
            return Err(Error::config_invalid_value(
                "MAX_BACKUPS",
                Some("0".to_string()),
                "must keep at least one backup",
            ));
        }
        let keep_releases: usize = parse_number("KEEP_RELEASES", &value("KEEP_RELEASES"))?;
        if keep_releases == 0 {
            return Err(Error::config_invalid_value(
                "KEEP_RELEASES",
                Some("0".to_string()),
                "must keep at least one release",
            ));
        }
        let timeout_secs: u64 = parse_number("STAGE_TIMEOUT", &value("STAGE_TIMEOUT"))?;
        if timeout_secs == 0 {
            return Err(Error::config_invalid_value(
                "STAGE_TIMEOUT",
                Some("0".to_string()),
                "must be at least one second",
            ));
        }

        Ok(Self {
            apps_root: path("APPS_ROOT"),
            backup_root: path("BACKUP_ROOT"),
            report_dir: path("REPORT_DIR"),
            state_dir: path("STATE_DIR"),
            default_runtime_version: value("DEFAULT_PHP_VERSION"),
            domain_suffix: value("DOMAIN_SUFFIX"),
            max_backups,
            retention_days: parse_number("RETENTION_DAYS", &value("RETENTION_DAYS"))?,
            keep_releases,
            stage_timeout: Duration::from_secs(timeout_secs),
            require_root: parse_bool("REQUIRE_ROOT", &value("REQUIRE_ROOT"))?,
            stages: split_list(&value("STAGES")),
            frameworks: split_list(&value("FRAMEWORKS")),
            required_tools: split_list(&value("REQUIRED_TOOLS")),
        })
    }
}

/// Comma-separated stage list of a merged view.
pub fn stage_list(config: &MergedConfig) -> Vec<String> {
    split_list(&config.get_or_empty("STAGES"))
}

// ============================================================================
// Config Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_global(&self) -> Result<ConfigRecord> {
        ConfigRecord::load(&paths::global_config(&self.dir), KeyScope::Global)
    }

    pub fn app_exists(&self, name: &str) -> bool {
        paths::app_config(&self.dir, name).exists()
    }

    pub fn load_app(&self, name: &str) -> Result<Option<ConfigRecord>> {
        validation::require_identifier(name, "app")?;
        let path = paths::app_config(&self.dir, name);
        if !path.exists() {
            return Ok(None);
        }
        ConfigRecord::load(&path, KeyScope::App).map(Some)
    }

    /// Merged view for one application.
    pub fn merged(&self, name: &str, global: &ConfigRecord) -> Result<MergedConfig> {
        Ok(MergedConfig::new(self.load_app(name)?, global.clone()))
    }

    /// Create a new application record with the given values and persist it.
    pub fn create_app(&self, name: &str, values: &[(&str, String)]) -> Result<ConfigRecord> {
        validation::require_identifier(name, "app")?;
        let mut record = ConfigRecord::empty(paths::app_config(&self.dir, name), KeyScope::App);
        for (key, value) in values {
            record.set(key, value)?;
        }
        record.save()?;
        Ok(record)
    }

    /// Update one key of an application record and rewrite it atomically.
    pub fn set_credential(&self, name: &str, key: &str, value: &Secret) -> Result<()> {
        let mut record = match self.load_app(name)? {
            Some(record) => record,
            None => ConfigRecord::empty(paths::app_config(&self.dir, name), KeyScope::App),
        };
        record.set(key, value.expose())?;
        record.save()?;
        crate::log_status!("config", "Updated {} for {}", key, name);
        Ok(())
    }

    /// Names of all application records, sorted.
    pub fn list_app_names(&self) -> Result<Vec<String>> {
        let dir = paths::app_configs(&self.dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("read {}", dir.display())),
                ))
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("conf") {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn record(content: &str, scope: KeyScope) -> Result<ConfigRecord> {
        ConfigRecord::parse(content, PathBuf::from("/etc/shipyard/test.conf"), scope)
    }

    #[test]
    fn app_record_parses_known_keys() {
        let rec = record(
            "# shop\nAPP_NAME=shop\nDOMAIN=shop.example.com\nDB_PASSWORD=\"p w\"\n",
            KeyScope::App,
        )
        .unwrap();
        assert_eq!(rec.get("DOMAIN"), Some("shop.example.com"));
        assert_eq!(rec.get("DB_PASSWORD"), Some("p w"));
    }

    #[test]
    fn unknown_key_is_rejected_with_line_number() {
        let err = record("APP_NAME=shop\nDOMIAN=typo\n", KeyScope::App).unwrap_err();
        assert_eq!(err.code.as_str(), "config.unknown_key");
        assert_eq!(err.details["line"], 2);
        assert_eq!(err.details["key"], "DOMIAN");
    }

    #[test]
    fn global_only_key_in_app_record_is_rejected() {
        let err = record("MAX_BACKUPS=3\n", KeyScope::App).unwrap_err();
        assert_eq!(err.code.as_str(), "config.unknown_key");

        let err = record("DB_PASSWORD=x\n", KeyScope::Global).unwrap_err();
        assert_eq!(err.code.as_str(), "config.unknown_key");
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = record("APP_NAME=shop\njust words\n", KeyScope::App).unwrap_err();
        assert_eq!(err.details["line"], 2);
    }

    #[test]
    fn merged_lookup_prefers_app_then_global_then_default() {
        let global = record("BRANCH=develop\nSSL_ENABLED=true\n", KeyScope::Global).unwrap();
        let app = record("BRANCH=release\n", KeyScope::App).unwrap();
        let merged = MergedConfig::new(Some(app), global);

        assert_eq!(merged.get("BRANCH").as_deref(), Some("release"));
        assert!(merged.get_bool("SSL_ENABLED").unwrap());
        assert_eq!(merged.get("DEPLOY_METHOD").as_deref(), Some("git"));
        assert_eq!(merged.get("PRE_DEPLOY_HOOK"), None);
    }

    #[test]
    fn empty_command_disables_it() {
        let global = record("ASSET_COMMAND=\n", KeyScope::Global).unwrap();
        let merged = MergedConfig::global_only(global);
        assert_eq!(merged.command("ASSET_COMMAND"), None);
        assert!(merged.command("MIGRATE_COMMAND").is_some());
    }

    #[test]
    fn settings_from_empty_global_use_defaults() {
        let settings = Settings::from_global(&record("", KeyScope::Global).unwrap()).unwrap();
        assert_eq!(settings.max_backups, 5);
        assert_eq!(settings.retention_days, 30);
        assert_eq!(settings.apps_root, PathBuf::from("/var/www"));
        assert_eq!(settings.stage_timeout, Duration::from_secs(900));
        assert!(settings.require_root);
        assert!(settings.frameworks.contains(&"laravel/framework".to_string()));
    }

    #[test]
    fn settings_reject_zero_max_backups() {
        let err = Settings::from_global(&record("MAX_BACKUPS=0\n", KeyScope::Global).unwrap())
            .unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");

        let err = Settings::from_global(&record("RETENTION_DAYS=soon\n", KeyScope::Global).unwrap())
            .unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn set_credential_rewrites_atomically_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store
            .create_app("shop", &[("APP_NAME", "shop".to_string()), ("DOMAIN", "shop.test".to_string())])
            .unwrap();

        store
            .set_credential("shop", "DB_PASSWORD", &Secret::new("generated"))
            .unwrap();

        let path = paths::app_config(dir.path(), "shop");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "APP_NAME=shop\nDOMAIN=shop.test\nDB_PASSWORD=generated\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(store.list_app_names().unwrap(), vec!["shop".to_string()]);
    }
}
