//! Last successful deployment per application, kept under
//! `<state_dir>/history/<app>.json`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;
use crate::utils::io;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub app: String,
    pub run_id: String,
    pub deployed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

pub fn record(state_dir: &Path, entry: &DeploymentRecord) -> Result<()> {
    io::write_json_atomic(
        &paths::history(state_dir, &entry.app),
        entry,
        "write deployment history",
    )
}

/// `None` when the application was never deployed or the file is unreadable.
pub fn last_deployed(state_dir: &Path, app: &str) -> Option<DeploymentRecord> {
    let path = paths::history(state_dir, app);
    if !path.exists() {
        return None;
    }
    match io::read_json(&path, "read deployment history") {
        Ok(entry) => Some(entry),
        Err(err) => {
            tracing::warn!(app, error = %err.describe(), "Ignoring unreadable deployment history");
            None
        }
    }
}
