//! Pipeline Executor.
//!
//! Runs the configured stages for one application at a time, strictly in
//! [`StageKind`] order. The first failing stage halts the application. Once
//! the backup stage has succeeded the run is rollback-eligible, and any later
//! failure (including a timeout, a panic or an interrupt) restores that
//! backup. Failures never cross the per-application boundary.

mod stages;
mod types;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use chrono::Utc;

pub use stages::{stage_for, Stage, StageContext};
pub use types::{
    build_summary, PipelineRun, PipelineRunSummary, RunError, RunStatus, StageKind, StageResult,
    StageStatus,
};

use crate::backup::BackupManager;
use crate::config::{self, ConfigStore, Settings};
use crate::datastore::DataStore;
use crate::error::{Error, ErrorCode, Result};
use crate::exec::RunLimits;
use crate::history::{self, DeploymentRecord};
use crate::interrupt::CancelToken;
use crate::lock::AppLock;
use crate::registry::Application;
use crate::release;

/// Resolve a configured stage list into stage kinds, in execution order.
///
/// Unknown and repeated names are rejected; the configured order is ignored
/// because the stage order is fixed.
pub fn plan(names: &[String], field: &str) -> Result<Vec<StageKind>> {
    let mut seen = HashSet::new();
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind = StageKind::parse(name).ok_or_else(|| {
            Error::validation_invalid_argument(
                field,
                format!("Unknown stage '{}'", name),
                Some(name.clone()),
                Some(StageKind::all().iter().map(|k| k.as_str().to_string()).collect()),
            )
        })?;
        if !seen.insert(kind) {
            return Err(Error::validation_invalid_argument(
                field,
                format!("Duplicate stage '{}'", name),
                Some(name.clone()),
                None,
            ));
        }
        kinds.push(kind);
    }
    kinds.sort();
    Ok(kinds)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Attach the stage-specific error kind to a failure.
fn classify(kind: StageKind, app: &str, err: Error) -> Error {
    let exit_code = err
        .details
        .get("exitCode")
        .and_then(|v| v.as_i64())
        .map(|c| c as i32);
    let internal = matches!(
        err.code,
        ErrorCode::InternalIoError | ErrorCode::InternalJsonError | ErrorCode::InternalUnexpected
    );
    match (kind, &err.code) {
        (StageKind::Migrate, ErrorCode::DeployStageFailed) => {
            Error::migration_failed(app, err.describe(), exit_code)
        }
        (StageKind::Migrate, _) if internal => Error::migration_failed(app, err.describe(), None),
        (
            StageKind::Backup,
            ErrorCode::BackupFailed | ErrorCode::DeployInterrupted | ErrorCode::DeployStageTimeout,
        ) => err,
        (StageKind::Backup, _) => Error::backup_failed(app, err.describe()),
        _ if internal => Error::stage_failed(app, kind.as_str(), err.describe(), None),
        _ => err,
    }
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    store: &'a ConfigStore,
    datastore: &'a dyn DataStore,
    cancel: CancelToken,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        store: &'a ConfigStore,
        datastore: &'a dyn DataStore,
        cancel: CancelToken,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            store,
            datastore,
            cancel,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run every application in order. After an interrupt the remaining
    /// applications are left untouched and reported as pending.
    pub fn run_all(&self, apps: &[Application]) -> Vec<PipelineRun> {
        let mut runs = Vec::with_capacity(apps.len());
        for app in apps {
            if self.cancel.is_cancelled() {
                runs.push(PipelineRun::new(&app.name));
                continue;
            }
            runs.push(self.run(app));
        }
        runs
    }

    /// Run the application's configured stage list.
    pub fn run(&self, app: &Application) -> PipelineRun {
        match plan(&config::stage_list(&app.config), "STAGES") {
            Ok(kinds) => self.run_with(app, kinds.into_iter().map(stage_for).collect()),
            Err(err) => {
                tracing::error!(app = %app.name, error = %err.describe(), "Invalid stage list");
                PipelineRun::rejected(&app.name, &err)
            }
        }
    }

    /// Run an explicit list of stages.
    pub fn run_with(&self, app: &Application, stages: Vec<Box<dyn Stage>>) -> PipelineRun {
        let _lock = match AppLock::acquire(&self.settings.state_dir, &app.name) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!(app = %app.name, error = %err.describe(), "Skipping locked application");
                return PipelineRun::rejected(&app.name, &err);
            }
        };

        let mut run = PipelineRun::new(&app.name);
        run.transition(RunStatus::Running);
        crate::log_status!("deploy", "Deploying {} ({} stages)", app.name, stages.len());

        let backups = BackupManager::new(self.settings, self.datastore);
        let mut ctx = StageContext {
            app: app.clone(),
            settings: self.settings,
            store: self.store,
            datastore: self.datastore,
            backups: &backups,
            run_id: self.run_id.clone(),
            limits: RunLimits::new(self.settings.stage_timeout, self.cancel.clone()),
            backup: None,
            release: None,
            activated: false,
            warnings: Vec::new(),
        };

        let mut failure = None;
        for stage in &stages {
            let kind = stage.kind();
            if self.cancel.is_cancelled() {
                failure = Some(Error::interrupted(&app.name, kind.as_str()));
                break;
            }
            if !stage.applies(&ctx.app) {
                run.stage_results.push(StageResult::skipped(kind));
                continue;
            }

            match self.run_stage(stage.as_ref(), &mut ctx, &mut run) {
                Ok(()) => {
                    if kind == StageKind::Backup {
                        run.rollback_eligible = true;
                        run.backup_id = ctx.backup.as_ref().map(|b| b.id.clone());
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        run.release_id = ctx.release.clone();

        match failure {
            None => self.finish_success(&mut run),
            Some(err) => self.finish_failure(&mut run, &ctx, &backups, err),
        }
        run
    }

    fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &mut StageContext<'_>,
        run: &mut PipelineRun,
    ) -> Result<()> {
        let kind = stage.kind();
        ctx.limits = RunLimits::new(self.settings.stage_timeout, self.cancel.clone());
        ctx.warnings.clear();
        tracing::info!(app = %ctx.app.name, stage = kind.as_str(), "Stage started");

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(ctx))).unwrap_or_else(|payload| {
            Err(Error::internal_unexpected(format!(
                "stage {} panicked: {}",
                kind.as_str(),
                panic_message(payload.as_ref())
            )))
        });
        let outcome = match outcome {
            Ok(()) if ctx.limits.expired() => Err(Error::stage_timeout(
                &ctx.app.name,
                kind.as_str(),
                self.settings.stage_timeout.as_secs(),
            )),
            other => other,
        }
        .map_err(|err| classify(kind, &ctx.app.name, err));

        let result = StageResult {
            stage: kind,
            status: if outcome.is_ok() {
                StageStatus::Success
            } else {
                StageStatus::Failed
            },
            started_at,
            ended_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            warnings: std::mem::take(&mut ctx.warnings),
            error: outcome.as_ref().err().map(RunError::from),
        };
        match &outcome {
            Ok(()) => tracing::info!(
                app = %ctx.app.name,
                stage = kind.as_str(),
                duration_ms = result.duration_ms,
                "Stage completed"
            ),
            Err(err) => tracing::error!(
                app = %ctx.app.name,
                stage = kind.as_str(),
                code = err.code.as_str(),
                error = %err.describe(),
                "Stage failed"
            ),
        }
        run.stage_results.push(result);
        outcome
    }

    fn finish_success(&self, run: &mut PipelineRun) {
        run.transition(RunStatus::Success);
        let entry = DeploymentRecord {
            app: run.app_name.clone(),
            run_id: self.run_id.clone(),
            deployed_at: Utc::now(),
            release_id: run.release_id.clone(),
            backup_id: run.backup_id.clone(),
        };
        if let Err(err) = history::record(&self.settings.state_dir, &entry) {
            tracing::warn!(app = %run.app_name, error = %err.describe(), "Could not record deployment history");
        }
        crate::log_status!("deploy", "Deployed {}", run.app_name);
    }

    fn finish_failure(
        &self,
        run: &mut PipelineRun,
        ctx: &StageContext<'_>,
        backups: &BackupManager<'_>,
        err: Error,
    ) {
        run.error = Some(RunError::from(&err));

        let backup_id = match (run.rollback_eligible, &ctx.backup) {
            (true, Some(backup)) => backup.id.clone(),
            _ => {
                self.discard_unreleased(ctx);
                run.transition(RunStatus::Failed);
                crate::log_status!(
                    "deploy",
                    "{} failed before a backup existed; state left for inspection",
                    run.app_name
                );
                return;
            }
        };

        run.transition(RunStatus::RollingBack);
        crate::log_status!("rollback", "Rolling back {} to backup {}", run.app_name, backup_id);

        // Rollback must complete even when the run was interrupted.
        let limits = RunLimits::new(self.settings.stage_timeout, CancelToken::detached());
        let restored = panic::catch_unwind(AssertUnwindSafe(|| backups.restore(&ctx.app, &backup_id, &limits)))
            .unwrap_or_else(|payload| Err(Error::internal_unexpected(panic_message(payload.as_ref()))))
            .map_err(|e| match e.code {
                ErrorCode::RollbackFailed => e,
                _ => Error::rollback_failed(&ctx.app.name, Some(backup_id.clone()), e.describe()),
            });

        match restored {
            Ok(_) => {
                self.discard_unreleased(ctx);
                run.transition(RunStatus::RolledBack);
                crate::log_status!("rollback", "Rolled back {}", run.app_name);
            }
            Err(rollback_err) => {
                tracing::error!(app = %run.app_name, error = %rollback_err.describe(), "Rollback failed");
                run.rollback_error = Some(RunError::from(&rollback_err));
                run.transition(RunStatus::Failed);
            }
        }
    }

    /// Remove a release built by this run that is not serving traffic.
    fn discard_unreleased(&self, ctx: &StageContext<'_>) {
        let Some(release_id) = &ctx.release else {
            return;
        };
        if release::current_release(&ctx.app.root_path).as_deref() == Some(release_id.as_str()) {
            return;
        }
        if let Err(err) = release::discard(&ctx.app, release_id) {
            tracing::warn!(app = %ctx.app.name, release = %release_id, error = %err.describe(), "Could not discard release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::CommandDataStore;
    use crate::testing::Fixture;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::fs;

    struct Scripted {
        kind: StageKind,
        action: fn(&mut StageContext<'_>) -> Result<()>,
    }

    impl Stage for Scripted {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn run(&self, ctx: &mut StageContext<'_>) -> Result<()> {
            (self.action)(ctx)
        }
    }

    struct Counting {
        kind: StageKind,
        calls: Rc<Cell<u32>>,
    }

    impl Stage for Counting {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn run(&self, _ctx: &mut StageContext<'_>) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    fn pipeline(fx: &Fixture) -> Pipeline<'_> {
        Pipeline::new(&fx.settings, &fx.store, &CommandDataStore, CancelToken::detached(), "run-1")
    }

    #[test]
    fn plan_orders_stages_and_rejects_bad_names() {
        let names = vec!["verify".to_string(), "backup".to_string(), "migrate".to_string()];
        assert_eq!(
            plan(&names, "STAGES").unwrap(),
            vec![StageKind::Backup, StageKind::Migrate, StageKind::Verify]
        );

        let dup = vec!["backup".to_string(), "backup".to_string()];
        assert!(plan(&dup, "STAGES").unwrap_err().message.contains("Duplicate stage"));

        let unknown = vec!["compile".to_string()];
        assert!(plan(&unknown, "STAGES").unwrap_err().message.contains("Unknown stage"));
    }

    #[test]
    fn default_pipeline_succeeds_and_records_history() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let run = pipeline(&fx).run(&app);

        assert_eq!(run.status, RunStatus::Success, "{:?}", run.error);
        assert!(run.rollback_eligible);
        assert!(run.backup_id.is_some());
        let skipped: Vec<StageKind> = run
            .stage_results
            .iter()
            .filter(|r| r.status == StageStatus::Skipped)
            .map(|r| r.stage)
            .collect();
        assert_eq!(skipped, vec![StageKind::Activate, StageKind::Workers]);

        let env = fs::read_to_string(app.root_path.join(".env")).unwrap();
        assert!(env.contains("DB_DATABASE=shop"));
        assert!(env.contains("APP_KEY=base64:"));
        assert!(history::last_deployed(&fx.settings.state_dir, "shop").is_some());
    }

    #[test]
    fn failure_before_backup_is_not_rolled_back() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let run = pipeline(&fx).run_with(
            &app,
            vec![
                Box::new(Scripted {
                    kind: StageKind::PreHooks,
                    action: |ctx| Err(Error::stage_failed(&ctx.app.name, "pre_hooks", "veto", Some(1))),
                }),
                stage_for(StageKind::Backup),
            ],
        );

        assert_eq!(run.status, RunStatus::Failed);
        assert!(!run.rollback_eligible);
        assert!(run.rollback_error.is_none());
        assert_eq!(run.stage_results.len(), 1);
        assert!(BackupManager::new(&fx.settings, &CommandDataStore)
            .list("shop")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn filesystem_faults_inside_a_stage_are_deployment_errors() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let run = pipeline(&fx).run_with(
            &app,
            vec![
                stage_for(StageKind::Backup),
                Box::new(Scripted {
                    kind: StageKind::CodeUpdate,
                    action: |_| {
                        Err(Error::internal_io(
                            "File exists (os error 17)",
                            Some("create link".to_string()),
                        ))
                    },
                }),
            ],
        );

        assert_eq!(run.status, RunStatus::RolledBack);
        let error = run.error.unwrap();
        assert_eq!(error.kind, "DeploymentError");
        assert_eq!(error.code, "deploy.stage_failed");
        assert!(error.message.contains("File exists"), "{}", error.message);
    }

    #[test]
    fn failure_after_backup_restores_files() {
        let fx = Fixture::new();
        let app = fx.app("shop", "MIGRATE_COMMAND=\"echo broken > routes.php; exit 1\"\n");
        fs::write(app.root_path.join("routes.php"), "original").unwrap();

        let run = pipeline(&fx).run_with(
            &app,
            vec![stage_for(StageKind::Backup), stage_for(StageKind::Migrate)],
        );

        assert_eq!(run.status, RunStatus::RolledBack);
        let error = run.error.unwrap();
        assert_eq!(error.kind, "MigrationError");
        assert_eq!(error.code, "migration.failed");
        assert_eq!(
            fs::read_to_string(app.root_path.join("routes.php")).unwrap(),
            "original"
        );
    }

    #[test]
    fn panicking_stage_triggers_rollback() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let run = pipeline(&fx).run_with(
            &app,
            vec![
                stage_for(StageKind::Backup),
                Box::new(Scripted {
                    kind: StageKind::Optimize,
                    action: |ctx| {
                        fs::write(ctx.app.root_path.join("junk.php"), "x").unwrap();
                        panic!("cache compiler exploded")
                    },
                }),
            ],
        );

        assert_eq!(run.status, RunStatus::RolledBack);
        assert!(run.error.unwrap().message.contains("cache compiler exploded"));
        assert!(!app.root_path.join("junk.php").exists());
    }

    #[test]
    fn rollback_failure_is_reported_separately() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let run = pipeline(&fx).run_with(
            &app,
            vec![
                stage_for(StageKind::Backup),
                Box::new(Scripted {
                    kind: StageKind::Migrate,
                    action: |ctx| {
                        let backup = ctx.backup.as_ref().unwrap();
                        fs::write(&backup.file_archive, "corrupted").unwrap();
                        Err(Error::stage_failed(&ctx.app.name, "migrate", "boom", Some(1)))
                    },
                }),
            ],
        );

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, "MigrationError");
        assert_eq!(run.rollback_error.unwrap().kind, "RollbackError");
    }

    #[test]
    fn interrupt_stops_at_the_next_stage_boundary_and_rolls_back() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let calls = Rc::new(Cell::new(0));

        let run = pipeline(&fx).run_with(
            &app,
            vec![
                stage_for(StageKind::Backup),
                Box::new(Scripted {
                    kind: StageKind::Dependencies,
                    action: |ctx| {
                        ctx.limits.cancel.cancel();
                        Ok(())
                    },
                }),
                Box::new(Counting {
                    kind: StageKind::Migrate,
                    calls: Rc::clone(&calls),
                }),
            ],
        );

        assert_eq!(calls.get(), 0);
        assert_eq!(run.stage_results.len(), 2);
        assert_eq!(run.status, RunStatus::RolledBack);
        assert_eq!(run.error.unwrap().code, "deploy.interrupted");
    }

    #[test]
    fn locked_application_is_rejected_untouched() {
        let fx = Fixture::new();
        let app = fx.app("shop", "");
        let _held = AppLock::acquire(&fx.settings.state_dir, "shop").unwrap();

        let run = pipeline(&fx).run(&app);

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().code, "run.locked");
        assert!(run.stage_results.is_empty());
    }

    #[test]
    fn interrupted_batch_leaves_remaining_apps_pending() {
        let fx = Fixture::new();
        let apps = vec![fx.app("alpha", ""), fx.app("beta", "")];
        let cancel = CancelToken::detached();
        cancel.cancel();
        let pipeline = Pipeline::new(&fx.settings, &fx.store, &CommandDataStore, cancel, "run-1");

        let runs = pipeline.run_all(&apps);

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Pending));
    }
}
