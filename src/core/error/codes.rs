use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ConfigUnknownKey,
        ErrorCode::ValidationMissingArgument,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::ValidationDuplicateApplication,
        ErrorCode::AppNotFound,
        ErrorCode::BackupNotFound,
        ErrorCode::ReleaseNotFound,
        ErrorCode::DependencyMissingTool,
        ErrorCode::BackupFailed,
        ErrorCode::MigrationFailed,
        ErrorCode::DeployStageFailed,
        ErrorCode::DeployStageTimeout,
        ErrorCode::DeployInterrupted,
        ErrorCode::RunLocked,
        ErrorCode::RollbackFailed,
        ErrorCode::SslFailed,
        ErrorCode::RunNoApplications,
        ErrorCode::RunInsufficientPrivilege,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_their_string_form() {
        for code in all_codes() {
            assert_eq!(parse_code(code.as_str()), Some(*code));
        }
        assert_eq!(parse_code("nope.nothing"), None);
    }
}
