//! Domain-level error taxonomy for lintrun.

use crate::config::ConfigError;
use crate::domain::check_run::{CheckStatus, Conclusion};
use crate::github::ReportError;

/// Errors produced while decoding an inbound event.
///
/// Any of these means the event is irrelevant to us: no check run is
/// touched and nothing is reported.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("payload missing required field: {0}")]
    MissingField(&'static str),

    #[error("payload field {0} is not valid")]
    InvalidField(&'static str),

    #[error("payload carries neither check_run nor check_suite")]
    NotACheckEvent,

    #[error("{kind} action {action:?} does not trigger a check")]
    UnrecognizedAction { kind: &'static str, action: String },
}

/// Rejected check-run lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid check run status transition: {current} -> {requested}")]
    InvalidTransition {
        current: CheckStatus,
        requested: CheckStatus,
    },

    #[error("check run already concluded {current}, refusing to conclude {requested}")]
    ConclusionOverwrite {
        current: Conclusion,
        requested: Conclusion,
    },

    #[error("check run is {current}, annotations are only accepted while in_progress")]
    AnnotationRejected { current: CheckStatus },
}

/// Errors the handler surfaces to the invoking runtime.
///
/// Stage failures (checkout, linter, timeout) never appear here: they end
/// up as a completed check run instead.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("reporting to the host failed: {0}")]
    Report(#[from] ReportError),

    #[error("lifecycle error: {0}")]
    Transition(#[from] TransitionError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError::InvalidTransition {
            current: CheckStatus::Completed,
            requested: CheckStatus::InProgress,
        };
        assert_eq!(
            err.to_string(),
            "invalid check run status transition: completed -> in_progress"
        );
    }

    #[test]
    fn test_conclusion_overwrite_display() {
        let err = TransitionError::ConclusionOverwrite {
            current: Conclusion::Success,
            requested: Conclusion::Failure,
        };
        let msg = err.to_string();
        assert!(msg.contains("success"));
        assert!(msg.contains("failure"));
    }

    #[test]
    fn test_unrecognized_action_display() {
        let err = ParseError::UnrecognizedAction {
            kind: "check_run",
            action: "completed".to_string(),
        };
        assert!(err.to_string().contains("\"completed\""));
    }
}
