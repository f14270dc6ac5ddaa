use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseSource {
    Git,
    Local,
}

/// Written to `<release>/.shipyard-release.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub app: String,
    pub release_id: String,
    pub created_at: DateTime<Utc>,
    pub source: ReleaseSource,
    /// Set once every build stage has completed inside the release.
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub app_name: String,
    pub release_id: String,
    pub directory: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ready: bool,
    pub active: bool,
}
