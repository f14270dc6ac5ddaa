use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The closed set of deployment stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    PreHooks,
    Backup,
    CodeUpdate,
    Dependencies,
    Database,
    Migrate,
    Assets,
    Optimize,
    Activate,
    Workers,
    PostHooks,
    Verify,
}

impl StageKind {
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::PreHooks,
            StageKind::Backup,
            StageKind::CodeUpdate,
            StageKind::Dependencies,
            StageKind::Database,
            StageKind::Migrate,
            StageKind::Assets,
            StageKind::Optimize,
            StageKind::Activate,
            StageKind::Workers,
            StageKind::PostHooks,
            StageKind::Verify,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::PreHooks => "pre_hooks",
            StageKind::Backup => "backup",
            StageKind::CodeUpdate => "code_update",
            StageKind::Dependencies => "dependencies",
            StageKind::Database => "database",
            StageKind::Migrate => "migrate",
            StageKind::Assets => "assets",
            StageKind::Optimize => "optimize",
            StageKind::Activate => "activate",
            StageKind::Workers => "workers",
            StageKind::PostHooks => "post_hooks",
            StageKind::Verify => "verify",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().replace('-', "_").to_ascii_lowercase();
        Self::all().iter().copied().find(|k| k.as_str() == name)
    }
}

/// Lifecycle of one application's run.
///
/// `Pending -> Running -> {Success | Failed}`, and on a failure after the
/// backup stage `Running -> RollingBack -> {RolledBack | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    RollingBack,
    RolledBack,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::RollingBack => "rolling_back",
            RunStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::RolledBack)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Success)
                | (Running, Failed)
                | (Running, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// An error as it appears in a run record: taxonomy kind plus machine code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: String,
    pub code: String,
    pub message: String,
}

impl From<&Error> for RunError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            code: err.code.as_str().to_string(),
            message: err.describe(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl StageResult {
    pub fn skipped(stage: StageKind) -> Self {
        let now = Utc::now();
        Self {
            stage,
            status: StageStatus::Skipped,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            warnings: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of running the pipeline for one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub app_name: String,
    pub status: RunStatus,
    pub stage_results: Vec<StageResult>,
    pub rollback_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            status: RunStatus::Pending,
            stage_results: Vec::new(),
            rollback_eligible: false,
            error: None,
            rollback_error: None,
            backup_id: None,
            release_id: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn transition(&mut self, next: RunStatus) {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                app = %self.app_name,
                from = self.status.as_str(),
                to = next.as_str(),
                "Unexpected run status transition"
            );
        }
        match next {
            RunStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.ended_at = Some(Utc::now()),
            _ => {}
        }
        self.status = next;
    }

    /// Terminal failure recorded before any stage ran.
    pub fn rejected(app_name: impl Into<String>, err: &Error) -> Self {
        let mut run = Self::new(app_name);
        run.error = Some(RunError::from(err));
        run.transition(RunStatus::Failed);
        run
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn summary(&self) -> PipelineRunSummary {
        build_summary(&self.stage_results)
    }
}

pub fn build_summary(results: &[StageResult]) -> PipelineRunSummary {
    let count = |status: StageStatus| results.iter().filter(|r| r.status == status).count();
    PipelineRunSummary {
        total_stages: results.len(),
        succeeded: count(StageStatus::Success),
        failed: count(StageStatus::Failed),
        skipped: count(StageStatus::Skipped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip_in_order() {
        let names: Vec<&str> = StageKind::all().iter().map(|k| k.as_str()).collect();
        assert_eq!(names.first(), Some(&"pre_hooks"));
        assert_eq!(names.last(), Some(&"verify"));
        assert_eq!(StageKind::parse("Code-Update"), Some(StageKind::CodeUpdate));
        assert_eq!(StageKind::parse("compile"), None);
        let mut sorted = StageKind::all().to_vec();
        sorted.sort();
        assert_eq!(sorted, StageKind::all());
    }

    #[test]
    fn rollback_states_only_follow_running() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::RollingBack));
        assert!(RunStatus::RollingBack.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::RollingBack));
        assert!(!RunStatus::Success.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn rejected_runs_are_terminal_failures() {
        let err = Error::run_locked("shop", "/tmp/shop.lock");
        let run = PipelineRun::rejected("shop", &err);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().map(|e| e.code.as_str()), Some("run.locked"));
        assert!(run.ended_at.is_some());
        assert!(run.stage_results.is_empty());
    }

    #[test]
    fn summary_counts_statuses() {
        let mut failed = StageResult::skipped(StageKind::Migrate);
        failed.status = StageStatus::Failed;
        let results = vec![StageResult::skipped(StageKind::PreHooks), failed];
        let summary = build_summary(&results);
        assert_eq!(summary.total_stages, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
    }
}
