//! Request and response bodies shared by the server and its clients.

use serde::{Deserialize, Serialize};

use crate::ids::{EvaluatorId, StepKey, StudentKey, SubmissionKey, UnitId};
use crate::scoring::ScoringMethod;

fn default_true() -> bool {
    true
}

fn default_num_reviewers() -> u32 {
    1
}

/// Body of `PUT /api/staff/{user_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertStaffRequest {
    pub email: String,
    #[serde(default = "default_true")]
    pub can_grade: bool,
    #[serde(default)]
    pub can_override: bool,
}

/// Body of `PUT /api/units/{unit_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertUnitRequest {
    pub title: String,
    #[serde(default = "default_num_reviewers")]
    pub num_reviewers: u32,
    #[serde(default)]
    pub scoring_method: ScoringMethod,
}

/// Body of `PUT /api/students/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertStudentRequest {
    pub email: String,
}

/// Body of `POST /api/submissions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub unit_id: UnitId,
    pub reviewee_key: StudentKey,
    #[serde(default)]
    pub contents: serde_json::Value,
}

/// Body of `POST /api/assign`.
///
/// Without an `evaluator_id` the least loaded graders are picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignRequest {
    pub unit_id: UnitId,
    pub reviewee_key: StudentKey,
    #[serde(default)]
    pub evaluator_id: Option<EvaluatorId>,
}

/// Body of `POST /api/reviews/next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextReviewRequest {
    pub unit_id: UnitId,
    pub evaluator_id: EvaluatorId,
}

/// Body of `POST /api/steps/{key}/review`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReviewRequest {
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub mark_completed: bool,
}

/// Result of asking for a submission to be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// These evaluators received a new step.
    Assigned { evaluators: Vec<EvaluatorId> },
    /// The submission already has open work assigned.
    AlreadyAssigned,
    /// Nobody is eligible to grade it; it stays in the unassigned pool.
    NoEvaluators,
}

/// Response carrying the step an operation touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepKeyResponse {
    pub step_key: StepKey,
}

/// Response of `POST /api/steps/{key}/review`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReviewResponse {
    pub step_key: StepKey,
    /// Set when this review completed the submission's last open step.
    pub final_score: Option<f64>,
}

/// Response of `POST /api/submissions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_key: SubmissionKey,
    #[serde(flatten)]
    pub outcome: AssignmentOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staff_request_defaults() {
        let req: UpsertStaffRequest = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert!(req.can_grade);
        assert!(!req.can_override);
    }

    #[test]
    fn test_unit_request_defaults() {
        let req: UpsertUnitRequest = serde_json::from_str(r#"{"title":"Essay"}"#).unwrap();
        assert_eq!(req.num_reviewers, 1);
        assert_eq!(req.scoring_method, ScoringMethod::Average);
    }

    #[test]
    fn test_outcome_is_tagged() {
        let json = serde_json::to_value(AssignmentOutcome::Assigned {
            evaluators: vec![EvaluatorId::from("bob")],
        })
        .unwrap();
        assert_eq!(json["outcome"], "assigned");
        assert_eq!(json["evaluators"][0], "bob");

        let json = serde_json::to_value(AssignmentOutcome::NoEvaluators).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "no_evaluators"}));
    }

    #[test]
    fn test_submit_response_flattens_outcome() {
        let resp = SubmitResponse {
            submission_key: SubmissionKey::from("u:s"),
            outcome: AssignmentOutcome::AlreadyAssigned,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"submission_key": "u:s", "outcome": "already_assigned"})
        );
    }
}
