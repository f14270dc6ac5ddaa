//! Output types for commands that act on several applications.

use serde::Serialize;

use crate::error::{Error, Result};

/// Standardized bulk execution result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult<T: Serialize> {
    pub action: String,
    pub results: Vec<ItemOutcome<T>>,
    pub summary: BulkSummary,
}

/// Outcome for a single item in a bulk operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome<T: Serialize> {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(flatten)]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Summary of bulk operation results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T: Serialize> BulkResult<T> {
    /// Collect per-item results. Item failures are recorded, never raised.
    pub fn collect(action: impl Into<String>, outcomes: Vec<(String, Result<T>)>) -> Self {
        let results: Vec<ItemOutcome<T>> = outcomes
            .into_iter()
            .map(|(id, outcome)| match outcome {
                Ok(value) => ItemOutcome {
                    id,
                    result: Some(value),
                    error: None,
                    error_kind: None,
                },
                Err(err) => ItemOutcome::failed(id, &err),
            })
            .collect();

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        Self {
            action: action.into(),
            summary: BulkSummary {
                total: results.len(),
                succeeded: results.len() - failed,
                failed,
            },
            results,
        }
    }

    /// Exit code for the whole batch: 0 only when every item succeeded.
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed == 0 {
            0
        } else {
            1
        }
    }
}

impl<T: Serialize> ItemOutcome<T> {
    pub fn failed(id: String, err: &Error) -> Self {
        Self {
            id,
            result: None,
            error: Some(err.describe()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}
