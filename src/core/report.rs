//! Run Reporter.
//!
//! One JSON document per orchestration run, written to `REPORT_DIR`.
//! Writing a report never fails the run: errors are logged and the run's
//! recorded outcomes stay as they are.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::history;
use crate::host::{self, ServerInfo};
use crate::pipeline::{PipelineRun, RunError, RunStatus, StageResult};
use crate::registry::Application;
use crate::utils::io;

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Applications not started because the run was interrupted.
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationReport {
    pub name: String,
    pub path: PathBuf,
    pub status: RunStatus,
    pub runtime_version: String,
    pub last_deployed: Option<DateTime<Utc>>,
    pub stages: Vec<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: ReportSummary,
    pub applications: Vec<ApplicationReport>,
    pub server_info: ServerInfo,
}

impl RunReport {
    /// Pair every application with its run. `runs` is in `apps` order.
    pub fn build(
        run_id: &str,
        started_at: DateTime<Utc>,
        apps: &[Application],
        runs: &[PipelineRun],
        state_dir: &Path,
    ) -> Self {
        let applications: Vec<ApplicationReport> = apps
            .iter()
            .zip(runs)
            .map(|(app, run)| ApplicationReport {
                name: app.name.clone(),
                path: app.root_path.clone(),
                status: run.status,
                runtime_version: app.runtime_version.clone(),
                last_deployed: history::last_deployed(state_dir, &app.name).map(|h| h.deployed_at),
                stages: run.stage_results.clone(),
                error: run.error.clone(),
                rollback_error: run.rollback_error.clone(),
                backup_id: run.backup_id.clone(),
                release_id: run.release_id.clone(),
            })
            .collect();

        let count = |pred: fn(RunStatus) -> bool| applications.iter().filter(|a| pred(a.status)).count();
        let summary = ReportSummary {
            total: applications.len(),
            successful: count(|s| s == RunStatus::Success),
            failed: count(|s| matches!(s, RunStatus::Failed | RunStatus::RolledBack)),
            pending: count(|s| !s.is_terminal()),
        };

        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            timestamp: started_at,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
            summary,
            applications,
            server_info: host::server_info(),
        }
    }

    /// 0 when every application deployed.
    pub fn exit_code(&self) -> i32 {
        if self.summary.successful == self.summary.total {
            0
        } else {
            1
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "deploy-{}-{}.json",
            self.timestamp.format("%Y%m%d_%H%M%S"),
            self.run_id
        )
    }

    /// Write the report atomically into `dir`. Returns the path on success.
    pub fn write(&self, dir: &Path) -> Option<PathBuf> {
        let path = dir.join(self.file_name());
        match io::write_json_atomic(&path, self, "write run report") {
            Ok(()) => {
                crate::log_status!("report", "Run report written to {}", path.display());
                Some(path)
            }
            Err(err) => {
                tracing::error!(error = %err.describe(), dir = %dir.display(), "Could not write run report");
                None
            }
        }
    }
}
