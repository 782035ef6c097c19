use std::path::PathBuf;

use serde_json::json;

use fal_domain::UnsupportedEnvironmentKind;

use super::outcome::ExecutionOutcome;

/// A user-fixable configuration problem.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Path: {} already exists", path.display())]
pub struct DestinationExistsError {
    pub path: PathBuf,
}

pub fn is_configuration_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ConfigurationError>().is_some())
}

/// Maps a failed operation onto the outcome envelope the CLI prints.
#[must_use]
pub fn outcome_for_error(err: &anyhow::Error) -> ExecutionOutcome {
    for cause in err.chain() {
        if let Some(config) = cause.downcast_ref::<ConfigurationError>() {
            return ExecutionOutcome::user_error(
                config.message().to_string(),
                json!({ "reason": "configuration" }),
            );
        }
        if let Some(exists) = cause.downcast_ref::<DestinationExistsError>() {
            return ExecutionOutcome::failure(
                exists.to_string(),
                json!({ "reason": "destination_exists", "path": exists.path }),
            );
        }
        if let Some(kind) = cause.downcast_ref::<UnsupportedEnvironmentKind>() {
            return ExecutionOutcome::failure(
                kind.to_string(),
                json!({ "reason": "unsupported_environment_kind", "kind": kind.kind }),
            );
        }
    }
    ExecutionOutcome::failure(format!("{err:#}"), json!({ "reason": "execution" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tooling::outcome::CommandStatus;
    use anyhow::Context;

    #[test]
    fn configuration_errors_are_user_errors_through_context() {
        let err = Err::<(), _>(ConfigurationError::new("bad profile"))
            .context("running model")
            .unwrap_err();
        assert!(is_configuration_error(&err));
        let outcome = outcome_for_error(&err);
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.message, "bad profile");
    }

    #[test]
    fn destination_exists_reports_path() {
        let err = anyhow::Error::new(DestinationExistsError {
            path: PathBuf::from("/srv/scripts"),
        });
        let outcome = outcome_for_error(&err);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.message, "Path: /srv/scripts already exists");
        assert_eq!(outcome.details["path"], json!("/srv/scripts"));
    }

    #[test]
    fn unknown_errors_are_failures() {
        let err = anyhow::anyhow!("connection reset");
        assert!(!is_configuration_error(&err));
        let outcome = outcome_for_error(&err);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.exit_code(), 2);
    }
}
