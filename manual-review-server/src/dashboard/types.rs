//! Types for the review timeline shown on the dashboard.

use manual_review_core::{AssignerKind, EvaluatorId};
use serde::{Deserialize, Serialize};

/// Something that happened to a submission's review process.
///
/// Serialized with serde's adjacently tagged representation:
/// ```json
/// { "type": "ReviewWritten", "data": { "evaluator": "bob", "completed": true } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReviewEventType {
    /// An empty summary was created for the submission.
    ReviewProcessStarted,

    /// A step was created, reactivated or un-removed.
    EvaluatorAssigned {
        evaluator: EvaluatorId,
        assigner_kind: AssignerKind,
    },

    StepRemoved {
        evaluator: EvaluatorId,
    },

    StepExpired {
        evaluator: EvaluatorId,
    },

    /// Review contents were saved.
    ReviewWritten {
        evaluator: EvaluatorId,
        /// Whether the step is `COMPLETED` after the write.
        completed: bool,
    },

    /// The student's final score for the unit was (re)computed.
    FinalScoreSet {
        score: f64,
    },
}
