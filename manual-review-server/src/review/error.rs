//! Errors raised by review operations.

use manual_review_core::{EvaluatorId, InvalidId, ReviewState, StepKey, SubmissionKey, UnitId};
use thiserror::Error;

use super::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The step has been soft-deleted and cannot be acted on.
    #[error("unable to process step {step}: it has been removed")]
    Removed { step: StepKey },

    /// The requested state change is not allowed from the step's current state.
    #[error("cannot move step {step} from {before} to {after}")]
    Transition {
        step: StepKey,
        before: ReviewState,
        after: ReviewState,
    },

    /// No candidate submission could be assigned to the evaluator.
    #[error("no submission of unit {unit_id} can be assigned to {evaluator}")]
    NotAssignable {
        unit_id: UnitId,
        evaluator: EvaluatorId,
    },

    /// Stored records contradict each other.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A review process already exists for the submission.
    #[error("review process already started for {0}")]
    AlreadyStarted(SubmissionKey),

    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error("{0} not found")]
    NotFound(String),

    /// The summary already tracks the maximum number of unremoved steps.
    #[error("submission {0} has reached the limit of unremoved review steps")]
    CountLimit(SubmissionKey),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ReviewError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        ReviewError::NotFound(what.to_string())
    }

    /// Whether retrying the whole read-modify-commit cycle may succeed.
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReviewError::Repository(RepositoryError::Conflict { .. })
        )
    }
}
