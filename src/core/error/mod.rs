mod codes;

pub use codes::{all_codes, parse_code};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidValue,
    ConfigUnknownKey,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationDuplicateApplication,

    AppNotFound,
    BackupNotFound,
    ReleaseNotFound,

    DependencyMissingTool,

    BackupFailed,
    MigrationFailed,

    DeployStageFailed,
    DeployStageTimeout,
    DeployInterrupted,
    RunLocked,

    RollbackFailed,

    SslFailed,

    RunNoApplications,
    RunInsufficientPrivilege,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigUnknownKey => "config.unknown_key",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationDuplicateApplication => "validation.duplicate_application",

            ErrorCode::AppNotFound => "app.not_found",
            ErrorCode::BackupNotFound => "backup.not_found",
            ErrorCode::ReleaseNotFound => "release.not_found",

            ErrorCode::DependencyMissingTool => "dependency.missing_tool",

            ErrorCode::BackupFailed => "backup.failed",
            ErrorCode::MigrationFailed => "migration.failed",

            ErrorCode::DeployStageFailed => "deploy.stage_failed",
            ErrorCode::DeployStageTimeout => "deploy.stage_timeout",
            ErrorCode::DeployInterrupted => "deploy.interrupted",
            ErrorCode::RunLocked => "run.locked",

            ErrorCode::RollbackFailed => "rollback.failed",

            ErrorCode::SslFailed => "ssl.failed",

            ErrorCode::RunNoApplications => "run.no_applications",
            ErrorCode::RunInsufficientPrivilege => "run.insufficient_privilege",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Taxonomy name an operator sees in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ConfigUnknownKey
            | ErrorCode::ValidationMissingArgument
            | ErrorCode::ValidationInvalidArgument
            | ErrorCode::ValidationDuplicateApplication
            | ErrorCode::AppNotFound
            | ErrorCode::ReleaseNotFound => "ValidationError",

            ErrorCode::DependencyMissingTool => "DependencyError",

            ErrorCode::BackupFailed | ErrorCode::BackupNotFound => "BackupError",
            ErrorCode::MigrationFailed => "MigrationError",

            ErrorCode::DeployStageFailed
            | ErrorCode::DeployStageTimeout
            | ErrorCode::DeployInterrupted
            | ErrorCode::RunLocked => "DeploymentError",

            ErrorCode::RollbackFailed => "RollbackError",
            ErrorCode::SslFailed => "SSLError",

            ErrorCode::RunNoApplications | ErrorCode::RunInsufficientPrivilege => {
                "PreconditionError"
            }

            ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => "InternalError",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUnknownKeyDetails {
    pub key: String,
    pub path: String,
    pub line: usize,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateApplicationDetails {
    pub name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingToolDetails {
    pub tool: String,
    pub context: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailureDetails {
    pub app: String,
    pub stage: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFailedDetails {
    pub app: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackFailedDetails {
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLockedDetails {
    pub app: String,
    pub lock_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.code.kind()
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn validation_duplicate_application(name: impl Into<String>, paths: Vec<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ValidationDuplicateApplication,
            format!(
                "Application name '{}' is used by more than one directory (names are case-insensitive)",
                name
            ),
            to_details(DuplicateApplicationDetails { name, paths }),
        )
        .with_hint("Rename one of the directories so every application name is unique")
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key {}", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for {}: {}", key, problem),
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    pub fn config_unknown_key(
        key: impl Into<String>,
        path: impl Into<String>,
        line: usize,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let path = path.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigUnknownKey,
            format!("{}:{}: {}", path, line, problem),
            to_details(ConfigUnknownKeyDetails {
                key,
                path,
                line,
                problem,
            }),
        )
    }

    pub fn app_not_found(name: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::AppNotFound, "Application not found", name, None)
            .with_hint("Run 'shipyard list' to see discovered applications")
    }

    pub fn backup_not_found(app: impl Into<String>, id: impl Into<String>) -> Self {
        Self::not_found(
            ErrorCode::BackupNotFound,
            "Backup not found",
            id,
            Some(app.into()),
        )
    }

    pub fn release_not_found(app: impl Into<String>, id: impl Into<String>) -> Self {
        Self::not_found(
            ErrorCode::ReleaseNotFound,
            "Release not found",
            id,
            Some(app.into()),
        )
    }

    fn not_found(code: ErrorCode, message: &str, id: impl Into<String>, app: Option<String>) -> Self {
        let id = id.into();
        Self::new(
            code,
            format!("{}: {}", message, id),
            to_details(NotFoundDetails { id, app }),
        )
    }

    pub fn dependency_missing_tool(tool: impl Into<String>, context: impl Into<String>) -> Self {
        let tool = tool.into();
        Self::new(
            ErrorCode::DependencyMissingTool,
            format!("Required tool '{}' is not installed", tool),
            to_details(MissingToolDetails {
                tool,
                context: context.into(),
            }),
        )
        .with_hint("Run 'shipyard provision' to see which tools are missing")
    }

    pub fn backup_failed(app: impl Into<String>, problem: impl Into<String>) -> Self {
        let app = app.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::BackupFailed,
            format!("Backup of '{}' failed: {}", app, problem),
            to_details(BackupFailedDetails { app, problem }),
        )
    }

    pub fn migration_failed(
        app: impl Into<String>,
        problem: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::stage_error(
            ErrorCode::MigrationFailed,
            app.into(),
            "migrate".to_string(),
            problem.into(),
            exit_code,
        )
    }

    pub fn stage_failed(
        app: impl Into<String>,
        stage: impl Into<String>,
        problem: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::stage_error(
            ErrorCode::DeployStageFailed,
            app.into(),
            stage.into(),
            problem.into(),
            exit_code,
        )
    }

    pub fn stage_timeout(app: impl Into<String>, stage: impl Into<String>, secs: u64) -> Self {
        Self::stage_error(
            ErrorCode::DeployStageTimeout,
            app.into(),
            stage.into(),
            format!("exceeded the {}s stage timeout", secs),
            None,
        )
        .with_hint("Raise STAGE_TIMEOUT in the global config if the stage is legitimately slow")
    }

    pub fn interrupted(app: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::stage_error(
            ErrorCode::DeployInterrupted,
            app.into(),
            stage.into(),
            "interrupted by signal".to_string(),
            None,
        )
    }

    fn stage_error(
        code: ErrorCode,
        app: String,
        stage: String,
        problem: String,
        exit_code: Option<i32>,
    ) -> Self {
        let message = format!("Stage '{}' failed for '{}': {}", stage, app, problem);
        Self::new(
            code,
            message,
            to_details(StageFailureDetails {
                app,
                stage,
                problem,
                exit_code,
            }),
        )
    }

    pub fn rollback_failed(
        app: impl Into<String>,
        backup_id: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let app = app.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::RollbackFailed,
            format!("Rollback of '{}' failed: {}", app, problem),
            to_details(RollbackFailedDetails {
                app,
                backup_id,
                problem,
            }),
        )
        .with_hint("The application is in an unknown state; inspect it before re-running")
    }

    pub fn ssl_failed(app: impl Into<String>, problem: impl Into<String>) -> Self {
        let app = app.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::SslFailed,
            format!("Certificate issuance for '{}' failed: {}", app, problem),
            to_details(BackupFailedDetails { app, problem }),
        )
    }

    pub fn run_no_applications(apps_root: impl Into<String>) -> Self {
        let root = apps_root.into();
        Self::new(
            ErrorCode::RunNoApplications,
            format!("No applications found under {}", root),
            serde_json::json!({ "appsRoot": root }),
        )
        .with_hint("Run 'shipyard setup-app <name> <domain>' or set APPS_ROOT")
    }

    pub fn run_insufficient_privilege() -> Self {
        Self::new(
            ErrorCode::RunInsufficientPrivilege,
            "This command must be run as root",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Re-run with sudo, or set REQUIRE_ROOT=false in the global config")
    }

    pub fn run_locked(app: impl Into<String>, lock_path: impl Into<String>) -> Self {
        let app = app.into();
        let mut err = Self::new(
            ErrorCode::RunLocked,
            format!("Another run is already operating on '{}'", app),
            to_details(RunLockedDetails {
                app,
                lock_path: lock_path.into(),
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Human-readable description including the underlying cause from details.
    pub fn describe(&self) -> String {
        let cause = self
            .details
            .get("error")
            .or_else(|| self.details.get("problem"))
            .and_then(Value::as_str);
        match cause {
            Some(cause) if !self.message.contains(cause) => format!("{}: {}", self.message, cause),
            _ => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_a_taxonomy_kind() {
        for code in all_codes() {
            assert!(code.kind().ends_with("Error"), "{:?}", code);
        }
    }

    #[test]
    fn rollback_failure_is_distinct_from_stage_failure() {
        let stage = Error::migration_failed("shop", "SQLSTATE[42S01]", Some(1));
        let rollback = Error::rollback_failed("shop", Some("20260101_000000".into()), "disk full");
        assert_eq!(stage.kind(), "MigrationError");
        assert_eq!(rollback.kind(), "RollbackError");
        assert_ne!(stage.code, rollback.code);
    }

    #[test]
    fn describe_includes_io_cause() {
        let err = Error::internal_io("permission denied", Some("write manifest".into()));
        assert_eq!(err.describe(), "IO error: permission denied");
    }

    #[test]
    fn stage_details_carry_stage_name() {
        let err = Error::stage_failed("shop", "dependencies", "composer exited 2", Some(2));
        assert_eq!(err.details["stage"], "dependencies");
        assert_eq!(err.details["exitCode"], 2);
    }
}
