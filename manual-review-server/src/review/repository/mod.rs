//! Storage abstraction for review records.
//!
//! The `ReviewRepository` trait is the only way the manager touches storage.
//! Reads of mutable records return a `Versioned` value; writes go through
//! `commit`, which applies a whole `WriteBatch` atomically and rejects it with
//! `RepositoryError::Conflict` if any record changed since it was read. The
//! manager retries on conflict, which gives every operation transactional
//! read-modify-write semantics on top of either backend.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use manual_review_core::{
    AssignerKind, EvaluatorId, ReviewState, StepKey, StudentKey, SubmissionKey, UnitId,
};
use thiserror::Error;

use super::entity::{
    CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, ReviewUnit, Student, Submission,
};
use crate::dashboard::types::ReviewEventType;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {what} in storage")]
    Corruption { what: String },

    /// A record in a `WriteBatch` was modified after it was read.
    #[error("concurrent modification of {entity}")]
    Conflict { entity: String },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        RepositoryError::Corruption { what: what.into() }
    }

    pub fn conflict(entity: impl Into<String>) -> Self {
        RepositoryError::Conflict {
            entity: entity.into(),
        }
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// One record to write, guarded by the version it was read at.
///
/// `expected_version: None` means the record must not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Write<T> {
    pub value: T,
    pub expected_version: Option<u64>,
}

/// Records to write atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub summaries: Vec<Write<ManualEvaluationSummary>>,
    pub steps: Vec<Write<ManualEvaluationStep>>,
    pub staff: Vec<Write<CourseStaff>>,
    pub students: Vec<Write<Student>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(
        mut self,
        value: ManualEvaluationSummary,
        expected_version: Option<u64>,
    ) -> Self {
        self.summaries.push(Write {
            value,
            expected_version,
        });
        self
    }

    pub fn step(mut self, value: ManualEvaluationStep, expected_version: Option<u64>) -> Self {
        self.steps.push(Write {
            value,
            expected_version,
        });
        self
    }

    pub fn staff(mut self, value: CourseStaff, expected_version: Option<u64>) -> Self {
        self.staff.push(Write {
            value,
            expected_version,
        });
        self
    }

    pub fn student(mut self, value: Student, expected_version: Option<u64>) -> Self {
        self.students.push(Write {
            value,
            expected_version,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
            && self.steps.is_empty()
            && self.staff.is_empty()
            && self.students.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SummaryOrder {
    /// Fewest completed, then fewest assigned, then oldest.
    #[default]
    AssignmentPriority,
    CreateDate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryQuery {
    pub unit_id: Option<UnitId>,
    /// Only summaries with no open step (`assigned_count == 0`).
    pub without_open_steps: bool,
    /// Only summaries with at least one completed step.
    pub with_completed: bool,
    pub order: SummaryOrder,
    pub limit: Option<usize>,
}

impl SummaryQuery {
    pub fn matches(&self, summary: &ManualEvaluationSummary) -> bool {
        self.unit_id.as_ref().is_none_or(|u| *u == summary.unit_id)
            && (!self.without_open_steps || summary.assigned_count() == 0)
            && (!self.with_completed || summary.completed_count() > 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepOrder {
    #[default]
    CreateDate,
    ChangeDate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepQuery {
    pub unit_id: Option<UnitId>,
    pub evaluator: Option<EvaluatorId>,
    pub submission_key: Option<SubmissionKey>,
    pub state: Option<ReviewState>,
    pub assigner_kind: Option<AssignerKind>,
    pub removed: Option<bool>,
    /// Only steps whose `change_date <= changed_before`.
    pub changed_before: Option<DateTime<Utc>>,
    pub order: StepOrder,
    pub limit: Option<usize>,
}

impl StepQuery {
    pub fn matches(&self, step: &ManualEvaluationStep) -> bool {
        self.unit_id.as_ref().is_none_or(|u| *u == step.unit_id)
            && self.evaluator.as_ref().is_none_or(|e| *e == step.evaluator)
            && self
                .submission_key
                .as_ref()
                .is_none_or(|k| *k == step.submission_key)
            && self.state.is_none_or(|s| s == step.state)
            && self.assigner_kind.is_none_or(|k| k == step.assigner_kind)
            && self.removed.is_none_or(|r| r == step.removed)
            && self.changed_before.is_none_or(|t| step.change_date <= t)
    }
}

/// An audit record for a submission's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewEvent {
    /// Assigned by storage; ignored when logging.
    pub id: i64,
    pub submission_key: SubmissionKey,
    pub event_type: ReviewEventType,
    pub recorded_at: DateTime<Utc>,
}

impl ReviewEvent {
    pub fn new(
        submission_key: SubmissionKey,
        event_type: ReviewEventType,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            submission_key,
            event_type,
            recorded_at,
        }
    }
}

/// Storage for review records.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn get_summary(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Versioned<ManualEvaluationSummary>>, RepositoryError>;

    async fn get_step(
        &self,
        key: &StepKey,
    ) -> Result<Option<Versioned<ManualEvaluationStep>>, RepositoryError>;

    async fn get_staff(
        &self,
        user_id: &EvaluatorId,
    ) -> Result<Option<Versioned<CourseStaff>>, RepositoryError>;

    async fn get_student(
        &self,
        key: &StudentKey,
    ) -> Result<Option<Versioned<Student>>, RepositoryError>;

    async fn get_submission(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Submission>, RepositoryError>;

    async fn get_unit(&self, unit_id: &UnitId) -> Result<Option<ReviewUnit>, RepositoryError>;

    async fn list_summaries(
        &self,
        query: &SummaryQuery,
    ) -> Result<Vec<Versioned<ManualEvaluationSummary>>, RepositoryError>;

    async fn list_steps(
        &self,
        query: &StepQuery,
    ) -> Result<Vec<ManualEvaluationStep>, RepositoryError>;

    /// All staff, ordered by user id.
    async fn list_staff(&self) -> Result<Vec<CourseStaff>, RepositoryError>;

    /// All units, ordered by unit id.
    async fn list_units(&self) -> Result<Vec<ReviewUnit>, RepositoryError>;

    /// Submissions ordered by submission time, optionally for one unit.
    async fn list_submissions(
        &self,
        unit_id: Option<&UnitId>,
    ) -> Result<Vec<Submission>, RepositoryError>;

    /// Upsert unit settings.
    async fn put_unit(&self, unit: ReviewUnit) -> Result<(), RepositoryError>;

    /// Upsert a submission.
    async fn put_submission(&self, submission: Submission) -> Result<(), RepositoryError>;

    /// Apply all writes or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError>;

    async fn log_event(&self, event: &ReviewEvent) -> Result<(), RepositoryError>;

    /// Events of one submission, newest first.
    async fn get_events(
        &self,
        submission_key: &SubmissionKey,
        limit: usize,
    ) -> Result<Vec<ReviewEvent>, RepositoryError>;

    /// Events across all submissions, newest first.
    async fn get_recent_events(&self, limit: usize) -> Result<Vec<ReviewEvent>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::entity::SubmissionRef;

    fn step() -> ManualEvaluationStep {
        let target = SubmissionRef::new(UnitId::from("u1"), StudentKey::from("alice"));
        ManualEvaluationStep::assigned(
            &target,
            &EvaluatorId::from("bob"),
            AssignerKind::Auto,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn test_empty_step_query_matches_everything() {
        assert!(StepQuery::default().matches(&step()));
    }

    #[test]
    fn test_step_query_filters() {
        let step = step();
        let query = StepQuery {
            unit_id: Some(UnitId::from("u1")),
            assigner_kind: Some(AssignerKind::Auto),
            state: Some(ReviewState::Assigned),
            removed: Some(false),
            ..Default::default()
        };
        assert!(query.matches(&step));

        let query = StepQuery {
            evaluator: Some(EvaluatorId::from("carol")),
            ..Default::default()
        };
        assert!(!query.matches(&step));

        let query = StepQuery {
            changed_before: Some(step.change_date - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!query.matches(&step));

        let query = StepQuery {
            changed_before: Some(step.change_date),
            ..Default::default()
        };
        assert!(query.matches(&step));
    }

    #[test]
    fn test_write_batch_builder() {
        let batch = WriteBatch::new().step(step(), None);
        assert!(!batch.is_empty());
        assert!(WriteBatch::new().is_empty());
    }
}
