//! The concrete deployment stages.
//!
//! Each stage runs against a [`StageContext`] that carries the application,
//! the managers it may call, and what earlier stages produced (the backup of
//! this run, the release being built).

use std::path::PathBuf;
use std::time::Duration;

use crate::backup::{Backup, BackupManager};
use crate::config::{ConfigStore, Settings};
use crate::datastore::DataStore;
use crate::defaults;
use crate::error::{Error, Result};
use crate::exec::{self, RunLimits};
use crate::hooks::{self, HookEvent};
use crate::paths;
use crate::registry::{Application, DeployMethod};
use crate::release;
use crate::secret;
use crate::utils::archive;
use crate::utils::dotenv::DotenvDocument;

use super::types::StageKind;

const VERIFY_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const ENV_FILE_MODE: u32 = 0o600;
const GENERATED_PASSWORD_LEN: usize = 32;

pub struct StageContext<'a> {
    pub app: Application,
    pub settings: &'a Settings,
    pub store: &'a ConfigStore,
    pub datastore: &'a dyn DataStore,
    pub backups: &'a BackupManager<'a>,
    pub run_id: String,
    pub limits: RunLimits,
    /// Backup taken by this run.
    pub backup: Option<Backup>,
    /// Release prepared by this run (zero-downtime only).
    pub release: Option<String>,
    pub activated: bool,
    /// Warnings raised by the running stage; drained into its result.
    pub warnings: Vec<String>,
}

impl StageContext<'_> {
    /// Where build commands run: the release under construction, else the
    /// live directory.
    pub fn work_dir(&self) -> PathBuf {
        match &self.release {
            Some(id) => paths::release(&self.app.root_path, id),
            None => self.live_dir(),
        }
    }

    /// The serving directory, falling back to the root before a first release.
    pub fn live_dir(&self) -> PathBuf {
        let live = self.app.live_dir();
        if live.is_dir() {
            live
        } else {
            self.app.root_path.clone()
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(app = %self.app.name, "{}", message);
        self.warnings.push(message);
    }

    fn run_command(&self, step: &str, key: &str) -> Result<bool> {
        exec::run_configured(&self.app, step, key, &self.work_dir(), &self.limits)
    }
}

pub trait Stage {
    fn kind(&self) -> StageKind;

    /// Whether the stage has anything to do for this application.
    fn applies(&self, _app: &Application) -> bool {
        true
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()>;
}

/// The built-in implementation of `kind`.
pub fn stage_for(kind: StageKind) -> Box<dyn Stage> {
    match kind {
        StageKind::PreHooks => Box::new(HookStage(HookEvent::PreDeploy)),
        StageKind::Backup => Box::new(BackupStage),
        StageKind::CodeUpdate => Box::new(CodeUpdateStage),
        StageKind::Dependencies => Box::new(CommandStage {
            kind,
            key: "DEPENDENCY_COMMAND",
        }),
        StageKind::Database => Box::new(DatabaseStage),
        StageKind::Migrate => Box::new(CommandStage {
            kind,
            key: "MIGRATE_COMMAND",
        }),
        StageKind::Assets => Box::new(CommandStage {
            kind,
            key: "ASSET_COMMAND",
        }),
        StageKind::Optimize => Box::new(CommandStage {
            kind,
            key: "OPTIMIZE_COMMAND",
        }),
        StageKind::Activate => Box::new(ActivateStage),
        StageKind::Workers => Box::new(WorkersStage),
        StageKind::PostHooks => Box::new(HookStage(HookEvent::PostDeploy)),
        StageKind::Verify => Box::new(VerifyStage),
    }
}

// ============================================================================
// Command stages
// ============================================================================

/// A stage that is just one command template run in the work directory.
struct CommandStage {
    kind: StageKind,
    key: &'static str,
}

impl Stage for CommandStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.run_command(self.kind.as_str(), self.key)?;
        Ok(())
    }
}

struct HookStage(HookEvent);

impl Stage for HookStage {
    fn kind(&self) -> StageKind {
        match self.0 {
            HookEvent::PreDeploy => StageKind::PreHooks,
            HookEvent::PostDeploy => StageKind::PostHooks,
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let result = hooks::run_hooks(&ctx.app, self.0, &ctx.live_dir(), &ctx.limits)?;
        for failure in result.failures() {
            ctx.warn(failure);
        }
        Ok(())
    }
}

// ============================================================================
// Backup
// ============================================================================

struct BackupStage;

impl Stage for BackupStage {
    fn kind(&self) -> StageKind {
        StageKind::Backup
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let backup = ctx.backups.create_backup(&ctx.app, &ctx.limits)?;
        for warning in &backup.manifest.warnings {
            ctx.warnings.push(warning.clone());
        }
        ctx.backup = Some(backup);

        if let Err(err) = ctx.backups.cleanup_retention(&ctx.app.name) {
            ctx.warn(format!("retention sweep failed: {}", err.describe()));
        }
        Ok(())
    }
}

// ============================================================================
// Code update
// ============================================================================

struct CodeUpdateStage;

impl Stage for CodeUpdateStage {
    fn kind(&self) -> StageKind {
        StageKind::CodeUpdate
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        if ctx.app.flags.zero_downtime {
            let release = release::prepare_release(&ctx.app, &ctx.limits)?;
            ctx.release = Some(release.release_id);
            return Ok(());
        }

        match (&ctx.app.deployment_method, &ctx.app.source_path) {
            (DeployMethod::Local, Some(source)) => {
                let stats = archive::sync_tree(
                    source,
                    &ctx.app.root_path,
                    &defaults::default_release_copy_excludes(),
                    &defaults::default_backup_excludes(),
                )?;
                tracing::debug!(
                    app = %ctx.app.name,
                    copied = stats.copied,
                    removed = stats.removed,
                    "Synced source tree"
                );
            }
            _ => {
                ctx.run_command("code_update", "CODE_UPDATE_COMMAND")?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Data store provisioning
// ============================================================================

struct DatabaseStage;

impl DatabaseStage {
    fn ensure_password(ctx: &mut StageContext<'_>) -> Result<()> {
        let present = ctx
            .app
            .database
            .password
            .as_ref()
            .is_some_and(|p| !p.is_empty());
        if !present {
            let password = secret::generate_password(GENERATED_PASSWORD_LEN);
            ctx.store.set_credential(&ctx.app.name, "DB_PASSWORD", &password)?;
            ctx.app.database.password = Some(password);
        }
        Ok(())
    }

    fn patch_env_file(ctx: &StageContext<'_>) -> Result<()> {
        let app = &ctx.app;
        let path = app.env_file();
        let mut env = DotenvDocument::load(&path)?;

        let scheme = if app.flags.ssl { "https" } else { "http" };
        env.set("APP_NAME", &app.name);
        env.set("APP_ENV", "production");
        env.set("APP_DEBUG", "false");
        env.set("APP_URL", &format!("{}://{}", scheme, app.domain));
        env.set("DB_HOST", &app.database.host);
        env.set("DB_DATABASE", &app.database.name);
        env.set("DB_USERNAME", &app.database.user);
        if let Some(password) = &app.database.password {
            env.set("DB_PASSWORD", password.expose());
        }
        if env.set_if_absent("APP_KEY", secret::generate_app_key().expose()) {
            crate::log_status!("database", "Generated application key for {}", app.name);
        }

        env.save(&path, ENV_FILE_MODE)
    }
}

impl Stage for DatabaseStage {
    fn kind(&self) -> StageKind {
        StageKind::Database
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        Self::ensure_password(ctx)?;
        ctx.datastore.provision(&ctx.app, &ctx.limits)?;
        Self::patch_env_file(ctx)
    }
}

// ============================================================================
// Traffic switch
// ============================================================================

struct ActivateStage;

impl Stage for ActivateStage {
    fn kind(&self) -> StageKind {
        StageKind::Activate
    }

    fn applies(&self, app: &Application) -> bool {
        app.flags.zero_downtime
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let release_id = ctx.release.clone().ok_or_else(|| {
            Error::stage_failed(
                &ctx.app.name,
                StageKind::Activate.as_str(),
                "no release was prepared in this run; enable the code_update stage",
                None,
            )
        })?;

        release::mark_ready(&ctx.app, &release_id)?;
        let warnings = release::activate(&ctx.app, &release_id, &ctx.limits)?;
        ctx.activated = true;
        ctx.warnings.extend(warnings);

        if let Err(err) = release::prune_releases(&ctx.app, ctx.settings.keep_releases) {
            ctx.warn(format!("release pruning failed: {}", err.describe()));
        }
        Ok(())
    }
}

// ============================================================================
// Workers
// ============================================================================

struct WorkersStage;

impl Stage for WorkersStage {
    fn kind(&self) -> StageKind {
        StageKind::Workers
    }

    fn applies(&self, app: &Application) -> bool {
        app.flags.queue || app.flags.scheduler
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let live = ctx.live_dir();
        if ctx.app.flags.queue {
            exec::run_configured(&ctx.app, "queue", "QUEUE_COMMAND", &live, &ctx.limits)?;
        }
        if ctx.app.flags.scheduler {
            exec::run_configured(&ctx.app, "scheduler", "SCHEDULER_COMMAND", &live, &ctx.limits)?;
        }
        Ok(())
    }
}

// ============================================================================
// Verification
// ============================================================================

struct VerifyStage;

impl VerifyStage {
    fn check_url(app: &Application, url: &str) -> Result<()> {
        let stage = StageKind::Verify.as_str();
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("shipyard/{}", env!("CARGO_PKG_VERSION")))
            .timeout(VERIFY_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| Error::stage_failed(&app.name, stage, format!("GET {}: {}", url, e), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::stage_failed(
                &app.name,
                stage,
                format!("GET {} returned {}", url, status),
                None,
            ));
        }
        Ok(())
    }
}

impl Stage for VerifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Verify
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        exec::run_configured(&ctx.app, "verify", "VERIFY_COMMAND", &ctx.live_dir(), &ctx.limits)?;
        if let Some(url) = ctx.app.config.command("VERIFY_URL") {
            let url = crate::utils::template::render_map(&url, &exec::template_vars(&ctx.app, &ctx.live_dir()));
            Self::check_url(&ctx.app, &url)?;
        }
        Ok(())
    }
}
