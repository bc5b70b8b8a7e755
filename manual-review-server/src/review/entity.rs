//! Persistent records of the review subsystem.
//!
//! A `ManualEvaluationSummary` aggregates the states of all steps of one
//! submission. Its counters are private: they only move through
//! `increment_count`/`decrement_count`, which the transition functions call in
//! pairs so the summary always matches a recount of its steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use manual_review_core::{
    AssignerKind, EvaluatorId, InvalidId, ReviewState, ScoringMethod, StepKey, StudentKey,
    SubmissionKey, UnitId,
};
use serde::{Deserialize, Serialize};

use super::error::ReviewError;

/// Upper bound on `assigned + completed + expired` for one summary.
pub const MAX_UNREMOVED_REVIEW_STEPS: u32 = 100;

/// Addresses one student's submission to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionRef {
    pub unit_id: UnitId,
    pub submission_key: SubmissionKey,
    pub reviewee_key: StudentKey,
}

impl SubmissionRef {
    pub fn new(unit_id: UnitId, reviewee_key: StudentKey) -> Self {
        let submission_key = SubmissionKey::new(&unit_id, &reviewee_key);
        Self {
            unit_id,
            submission_key,
            reviewee_key,
        }
    }

    pub fn step_key(&self, evaluator: &EvaluatorId) -> StepKey {
        StepKey::new(&self.submission_key, evaluator)
    }

    /// Both parts must be usable in a key.
    pub fn validate(&self) -> Result<(), InvalidId> {
        self.unit_id.validate()?;
        self.reviewee_key.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEvaluationSummary {
    pub submission_key: SubmissionKey,
    pub reviewee_key: StudentKey,
    pub unit_id: UnitId,
    assigned_count: u32,
    completed_count: u32,
    expired_count: u32,
    pub create_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

impl ManualEvaluationSummary {
    pub fn new(target: &SubmissionRef, now: DateTime<Utc>) -> Self {
        Self {
            submission_key: target.submission_key.clone(),
            reviewee_key: target.reviewee_key.clone(),
            unit_id: target.unit_id.clone(),
            assigned_count: 0,
            completed_count: 0,
            expired_count: 0,
            create_date: now,
            change_date: now,
        }
    }

    pub fn submission_ref(&self) -> SubmissionRef {
        SubmissionRef {
            unit_id: self.unit_id.clone(),
            submission_key: self.submission_key.clone(),
            reviewee_key: self.reviewee_key.clone(),
        }
    }

    /// Steps in `ASSIGNED` or `IN_PROGRESS`.
    pub fn assigned_count(&self) -> u32 {
        self.assigned_count
    }

    pub fn completed_count(&self) -> u32 {
        self.completed_count
    }

    pub fn expired_count(&self) -> u32 {
        self.expired_count
    }

    pub fn total_count(&self) -> u32 {
        self.assigned_count + self.completed_count + self.expired_count
    }

    /// Never assigned, or every step has since been removed.
    pub fn is_unassigned(&self) -> bool {
        self.total_count() == 0
    }

    fn counter_mut(&mut self, state: ReviewState) -> &mut u32 {
        match state {
            ReviewState::Assigned | ReviewState::InProgress => &mut self.assigned_count,
            ReviewState::Completed => &mut self.completed_count,
            ReviewState::Expired => &mut self.expired_count,
        }
    }

    /// Count one more step in `state`.
    pub fn increment_count(&mut self, state: ReviewState) -> Result<(), ReviewError> {
        if self.total_count() >= MAX_UNREMOVED_REVIEW_STEPS {
            return Err(ReviewError::CountLimit(self.submission_key.clone()));
        }
        *self.counter_mut(state) += 1;
        Ok(())
    }

    /// Count one fewer step in `state`. Saturates at zero.
    pub fn decrement_count(&mut self, state: ReviewState) {
        let counter = self.counter_mut(state);
        *counter = counter.saturating_sub(1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEvaluationStep {
    pub key: StepKey,
    pub submission_key: SubmissionKey,
    pub reviewee_key: StudentKey,
    pub unit_id: UnitId,
    pub evaluator: EvaluatorId,
    pub assigner_kind: AssignerKind,
    pub state: ReviewState,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub score: f64,
    /// Opaque sharing metadata kept alongside the step.
    #[serde(default)]
    pub drive_permission_list: Option<String>,
    pub create_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

impl ManualEvaluationStep {
    /// A fresh `ASSIGNED` step.
    pub fn assigned(
        target: &SubmissionRef,
        evaluator: &EvaluatorId,
        assigner_kind: AssignerKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: target.step_key(evaluator),
            submission_key: target.submission_key.clone(),
            reviewee_key: target.reviewee_key.clone(),
            unit_id: target.unit_id.clone(),
            evaluator: evaluator.clone(),
            assigner_kind,
            state: ReviewState::Assigned,
            removed: false,
            comments: None,
            score: 0.0,
            drive_permission_list: None,
            create_date: now,
            change_date: now,
        }
    }

    pub fn submission_ref(&self) -> SubmissionRef {
        SubmissionRef {
            unit_id: self.unit_id.clone(),
            submission_key: self.submission_key.clone(),
            reviewee_key: self.reviewee_key.clone(),
        }
    }

    /// Counts toward the evaluator's open workload.
    pub fn is_open(&self) -> bool {
        !self.removed && self.state.is_open()
    }
}

/// A course staff member who may act as evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStaff {
    pub user_id: EvaluatorId,
    pub email: String,
    pub can_grade: bool,
    pub can_override: bool,
    /// Unremoved steps held by this evaluator.
    #[serde(default)]
    pub num_assigned: i64,
    /// Unremoved steps this evaluator has completed.
    #[serde(default)]
    pub num_graded: i64,
}

impl CourseStaff {
    pub fn new(user_id: EvaluatorId, email: String) -> Self {
        Self {
            user_id,
            email,
            can_grade: true,
            can_override: false,
            num_assigned: 0,
            num_graded: 0,
        }
    }

    /// Reviews still owed. Lower means a better candidate for new work.
    pub fn workload(&self) -> i64 {
        self.num_assigned - self.num_graded
    }
}

/// The slice of a student record this subsystem writes: final unit scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub key: StudentKey,
    pub email: String,
    #[serde(default)]
    pub scores: BTreeMap<UnitId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub key: SubmissionKey,
    pub unit_id: UnitId,
    pub reviewee_key: StudentKey,
    #[serde(default)]
    pub contents: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn submission_ref(&self) -> SubmissionRef {
        SubmissionRef {
            unit_id: self.unit_id.clone(),
            submission_key: self.key.clone(),
            reviewee_key: self.reviewee_key.clone(),
        }
    }
}

/// Review settings of a subjective assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewUnit {
    pub unit_id: UnitId,
    pub title: String,
    pub num_reviewers: u32,
    #[serde(default)]
    pub scoring_method: ScoringMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> ManualEvaluationSummary {
        let target = SubmissionRef::new(UnitId::from("u1"), StudentKey::from("alice"));
        ManualEvaluationSummary::new(&target, Utc::now())
    }

    #[test]
    fn test_in_progress_counts_as_assigned() {
        let mut s = summary();
        s.increment_count(ReviewState::Assigned).unwrap();
        s.increment_count(ReviewState::InProgress).unwrap();
        assert_eq!(s.assigned_count(), 2);
        s.decrement_count(ReviewState::InProgress);
        assert_eq!(s.assigned_count(), 1);
    }

    #[test]
    fn test_decrement_saturates() {
        let mut s = summary();
        s.decrement_count(ReviewState::Expired);
        assert_eq!(s.expired_count(), 0);
    }

    #[test]
    fn test_increment_stops_at_limit() {
        let mut s = summary();
        for _ in 0..MAX_UNREMOVED_REVIEW_STEPS {
            s.increment_count(ReviewState::Completed).unwrap();
        }
        let err = s.increment_count(ReviewState::Assigned).unwrap_err();
        assert!(matches!(err, ReviewError::CountLimit(_)));
        assert_eq!(s.total_count(), MAX_UNREMOVED_REVIEW_STEPS);

        // Freeing one slot allows one more.
        s.decrement_count(ReviewState::Completed);
        s.increment_count(ReviewState::Assigned).unwrap();
    }

    #[test]
    fn test_summary_json_keeps_counters() {
        let mut s = summary();
        s.increment_count(ReviewState::Expired).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        let back: ManualEvaluationSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expired_count(), 1);
        assert_eq!(back, s);
    }

    #[test]
    fn test_step_keys_follow_submission() {
        let target = SubmissionRef::new(UnitId::from("u1"), StudentKey::from("alice"));
        let step = ManualEvaluationStep::assigned(
            &target,
            &EvaluatorId::from("bob"),
            AssignerKind::Auto,
            Utc::now(),
        );
        assert_eq!(step.key.as_str(), "u1:alice:bob");
        assert_eq!(step.state, ReviewState::Assigned);
        assert!(step.is_open());
    }

    #[test]
    fn test_workload() {
        let mut staff = CourseStaff::new(EvaluatorId::from("bob"), "bob@example.com".into());
        staff.num_assigned = 5;
        staff.num_graded = 3;
        assert_eq!(staff.workload(), 2);
    }
}
