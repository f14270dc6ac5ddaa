//! Application Registry: discovers applications under `APPS_ROOT`.
//!
//! A directory is an application when it (or its `current/` release) holds
//! the `artisan` marker and a `composer.json` whose `require` names a known
//! framework. Applications are returned sorted by name and are immutable for
//! the rest of the run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::config::{ConfigRecord, ConfigStore, MergedConfig, Settings};
use crate::defaults::{APP_MARKER, PACKAGE_FILE};
use crate::error::{Error, Result};
use crate::paths;
use crate::secret::{self, Secret};
use crate::utils::dotenv::DotenvDocument;
use crate::utils::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMethod {
    Git,
    Local,
}

impl DeployMethod {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(DeployMethod::Git),
            "local" => Ok(DeployMethod::Local),
            other => Err(Error::config_invalid_value(
                "DEPLOY_METHOD",
                Some(other.to_string()),
                "expected 'git' or 'local'",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseRef {
    pub name: String,
    pub user: String,
    pub host: String,
    #[serde(skip)]
    pub password: Option<Secret>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AppFlags {
    pub ssl: bool,
    pub queue: bool,
    pub scheduler: bool,
    pub zero_downtime: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub name: String,
    pub root_path: PathBuf,
    pub domain: String,
    pub runtime_version: String,
    pub deployment_method: DeployMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub database: DatabaseRef,
    pub flags: AppFlags,
    #[serde(skip)]
    pub config: MergedConfig,
}

impl Application {
    /// Directory serving traffic: `current/` for zero-downtime apps.
    pub fn live_dir(&self) -> PathBuf {
        if self.flags.zero_downtime {
            paths::current(&self.root_path)
        } else {
            self.root_path.clone()
        }
    }

    pub fn env_file(&self) -> PathBuf {
        paths::env_file(&self.root_path, self.flags.zero_downtime)
    }

    fn from_config(
        name: &str,
        root_path: PathBuf,
        config: MergedConfig,
        settings: &Settings,
    ) -> Result<Self> {
        let flags = AppFlags {
            ssl: config.get_bool("SSL_ENABLED")?,
            queue: config.get_bool("QUEUE_ENABLED")?,
            scheduler: config.get_bool("SCHEDULER_ENABLED")?,
            zero_downtime: config.get_bool("ZERO_DOWNTIME")?,
        };
        let runtime_version = resolve_runtime_version(&root_path, &config, flags.zero_downtime, settings);
        let domain = config
            .app_value("DOMAIN")
            .map(str::to_string)
            .unwrap_or_else(|| default_domain(name, settings));

        Ok(Self {
            name: name.to_string(),
            domain,
            runtime_version,
            deployment_method: DeployMethod::parse(&config.get_or_empty("DEPLOY_METHOD"))?,
            repo_url: config.app_value("REPO_URL").map(str::to_string),
            branch: config.get_or_empty("BRANCH"),
            source_path: config.app_value("SOURCE_PATH").map(|p| paths::expand(Path::new(p))),
            database: DatabaseRef {
                name: config
                    .app_value("DB_NAME")
                    .map(str::to_string)
                    .unwrap_or_else(|| db_identifier(name)),
                user: config
                    .app_value("DB_USER")
                    .map(str::to_string)
                    .unwrap_or_else(|| db_identifier(name)),
                host: config.get_or_empty("DB_HOST"),
                password: config.secret("DB_PASSWORD"),
            },
            flags,
            root_path,
            config,
        })
    }
}

fn default_domain(name: &str, settings: &Settings) -> String {
    if settings.domain_suffix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, settings.domain_suffix.trim_start_matches('.'))
    }
}

/// Database and user names: app name with anything outside `[A-Za-z0-9_]`
/// replaced, capped at MySQL's 32-character user limit.
pub fn db_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(32)
        .collect()
}

// ============================================================================
// Validity predicate
// ============================================================================

fn code_root(dir: &Path) -> PathBuf {
    let current = paths::current(dir);
    if current.join(APP_MARKER).exists() {
        current
    } else {
        dir.to_path_buf()
    }
}

fn read_composer(dir: &Path) -> Option<serde_json::Value> {
    let content = fs::read_to_string(dir.join(PACKAGE_FILE)).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "Unparseable composer.json");
            None
        }
    }
}

pub fn is_valid_app(dir: &Path, frameworks: &[String]) -> bool {
    let root = code_root(dir);
    if !root.join(APP_MARKER).is_file() {
        return false;
    }
    let Some(composer) = read_composer(&root) else {
        return false;
    };
    composer
        .get("require")
        .and_then(|r| r.as_object())
        .is_some_and(|require| frameworks.iter().any(|f| require.contains_key(f)))
}

// ============================================================================
// Runtime version
// ============================================================================

fn resolve_runtime_version(
    root: &Path,
    config: &MergedConfig,
    zero_downtime: bool,
    settings: &Settings,
) -> String {
    if let Some(explicit) = config.app_value("PHP_VERSION") {
        return explicit.to_string();
    }
    if let Ok(env) = DotenvDocument::load(&paths::env_file(root, zero_downtime)) {
        if let Some(v) = env.get("PHP_VERSION").filter(|v| !v.is_empty()) {
            return v.to_string();
        }
    }
    read_composer(&code_root(root))
        .and_then(|c| {
            c.get("require")?
                .get("php")?
                .as_str()
                .and_then(parse_runtime_constraint)
        })
        .unwrap_or_else(|| settings.default_runtime_version.clone())
}

/// `major.minor` implied by a composer constraint. With alternatives
/// (`^8.1|^8.2`) the highest lower bound wins.
pub fn parse_runtime_constraint(constraint: &str) -> Option<String> {
    constraint
        .split('|')
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .filter_map(alternative_floor)
        .max()
        .map(|(major, minor)| format!("{}.{}", major, minor))
}

fn alternative_floor(alt: &str) -> Option<(u64, u64)> {
    let normalized = alt.split_whitespace().collect::<Vec<_>>().join(", ");
    if let Ok(req) = semver::VersionReq::parse(&normalized) {
        let floor = req
            .comparators
            .iter()
            .filter(|c| {
                matches!(
                    c.op,
                    semver::Op::Exact
                        | semver::Op::Greater
                        | semver::Op::GreaterEq
                        | semver::Op::Tilde
                        | semver::Op::Caret
                        | semver::Op::Wildcard
                )
            })
            .map(|c| (c.major, c.minor.unwrap_or(0)))
            .max();
        if floor.is_some() {
            return floor;
        }
    }

    let re = Regex::new(r"(\d+)\.(\d+)").ok()?;
    let caps = re.captures(alt)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

// ============================================================================
// Registry
// ============================================================================

pub struct Registry<'a> {
    store: &'a ConfigStore,
    global: &'a ConfigRecord,
    settings: &'a Settings,
}

impl<'a> Registry<'a> {
    pub fn new(store: &'a ConfigStore, global: &'a ConfigRecord, settings: &'a Settings) -> Self {
        Self {
            store,
            global,
            settings,
        }
    }

    /// Candidate directories under `APPS_ROOT` that pass the validity predicate.
    fn candidates(&self) -> Result<Vec<(String, PathBuf)>> {
        let root = &self.settings.apps_root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("scan {}", root.display())),
                ))
            }
        };

        let mut found = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_app(&path, &self.settings.frameworks) {
                tracing::debug!(path = %path.display(), "Skipping directory without a known framework");
                continue;
            }
            if validation::require_identifier(&name, "app").is_err() {
                tracing::warn!(path = %path.display(), "Skipping application with an unusable name");
                continue;
            }
            found.push((name, path));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Discover applications, creating records for new ones.
    pub fn scan(&self) -> Result<Vec<Application>> {
        let candidates = self.candidates()?;

        let mut seen: HashMap<String, &PathBuf> = HashMap::new();
        for (name, path) in &candidates {
            if let Some(existing) = seen.insert(name.to_lowercase(), path) {
                return Err(Error::validation_duplicate_application(
                    name.clone(),
                    vec![existing.display().to_string(), path.display().to_string()],
                ));
            }
        }

        candidates
            .into_iter()
            .map(|(name, path)| {
                if !self.store.app_exists(&name) {
                    self.create_record(&name, &path, None)?;
                }
                self.build(&name, path)
            })
            .collect()
    }

    /// Look up one application: a scanned directory, or a record whose
    /// `APP_PATH` points elsewhere.
    pub fn resolve(&self, name: &str) -> Result<Application> {
        validation::require_identifier(name, "app")?;

        if let Some(record) = self.store.load_app(name)? {
            if let Some(path) = record.get("APP_PATH").filter(|p| !p.is_empty()) {
                let path = paths::expand(Path::new(path));
                return self.build(name, path);
            }
        }

        let path = self.settings.apps_root.join(name);
        if path.is_dir() && (is_valid_app(&path, &self.settings.frameworks) || self.store.app_exists(name)) {
            if !self.store.app_exists(name) {
                self.create_record(name, &path, None)?;
            }
            return self.build(name, path);
        }

        Err(Error::app_not_found(name))
    }

    /// Create the record and directory layout for a new application.
    pub fn register(&self, name: &str, domain: &str) -> Result<Application> {
        validation::require_identifier(name, "name")?;
        validation::require_non_empty(domain, "domain", "Domain cannot be empty")?;
        if self.store.app_exists(name) {
            return Err(Error::validation_invalid_argument(
                "name",
                format!("Application '{}' already has a config record", name),
                Some(name.to_string()),
                None,
            ));
        }

        let root = self.settings.apps_root.join(name);
        crate::utils::io::ensure_dir(&root, "create application root")?;
        self.create_record(name, &root, Some(domain))?;
        let app = self.build(name, root)?;

        if app.flags.zero_downtime {
            crate::release::ensure_layout(&app.root_path)?;
        }
        Ok(app)
    }

    fn create_record(&self, name: &str, root: &Path, domain: Option<&str>) -> Result<()> {
        let password = secret::generate_password(24);
        let db = db_identifier(name);
        let domain = domain
            .map(str::to_string)
            .unwrap_or_else(|| default_domain(name, self.settings));

        self.store.create_app(
            name,
            &[
                ("APP_NAME", name.to_string()),
                ("APP_PATH", root.display().to_string()),
                ("DOMAIN", domain),
                ("DB_NAME", db.clone()),
                ("DB_USER", db),
                ("DB_PASSWORD", password.expose().to_string()),
            ],
        )?;
        crate::log_status!("registry", "Created config record for {}", name);
        Ok(())
    }

    fn build(&self, name: &str, root: PathBuf) -> Result<Application> {
        let config = self.store.merged(name, self.global)?;
        Application::from_config(name, root, config, self.settings)
    }
}
