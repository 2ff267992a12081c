//! Error taxonomy shared by every pipeline component.
//!
//! Callers branch on [`PipelineError::kind`] to tell user errors (bad input,
//! unknown language) apart from service-state errors (no model to serve) and
//! pipeline faults.

use crate::training::RunStage;
use thiserror::Error;

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownLanguage,
    ModelUnavailable,
    Conflict,
    NotFound,
    TrainingRunFailed,
    Validation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Language code is not registered or is deactivated
    #[error("Unknown or inactive language code: '{0}'")]
    UnknownLanguage(String),

    /// No ready model for the scope, or inference kept failing
    #[error("No model available for {scope}: {reason}")]
    ModelUnavailable { scope: String, reason: String },

    /// Duplicate unique key on create, or an illegal state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing entity on lookup or update
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Fatal training pipeline fault
    #[error("Training run failed during {stage}: {cause}")]
    TrainingRunFailed { stage: RunStage, cause: String },

    /// Blank text submitted for translation
    #[error("Input text is empty")]
    EmptyInput,

    /// Malformed input (out-of-range rating, bad field value, ...)
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn model_unavailable(scope: impl ToString, reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            scope: scope.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownLanguage(_) => ErrorKind::UnknownLanguage,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TrainingRunFailed { .. } => ErrorKind::TrainingRunFailed,
            Self::EmptyInput | Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Only service-state errors are worth retrying later; everything else
    /// fails the same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelUnavailable { .. })
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            PipelineError::UnknownLanguage("xx".into()).kind(),
            ErrorKind::UnknownLanguage
        );
        assert_eq!(PipelineError::EmptyInput.kind(), ErrorKind::Validation);
        assert_eq!(
            PipelineError::Validation("rating".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PipelineError::not_found("language", 7).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            PipelineError::TrainingRunFailed {
                stage: RunStage::Evaluating,
                cause: "empty eval set".into()
            }
            .kind(),
            ErrorKind::TrainingRunFailed
        );
    }

    #[test]
    fn test_only_model_unavailable_is_retryable() {
        assert!(PipelineError::model_unavailable("en->sw", "no ready version").is_retryable());
        assert!(!PipelineError::UnknownLanguage("xx".into()).is_retryable());
        assert!(!PipelineError::Conflict("dup".into()).is_retryable());
        assert!(!PipelineError::EmptyInput.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = PipelineError::not_found("contribution", 42);
        assert_eq!(err.to_string(), "contribution not found: 42");

        let err = PipelineError::TrainingRunFailed {
            stage: RunStage::Assembling,
            cause: "snapshot is empty".into(),
        };
        assert!(err.to_string().contains("assembling"));
        assert!(err.to_string().contains("snapshot is empty"));
    }
}
