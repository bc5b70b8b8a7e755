//! In-memory implementation of `ReviewRepository`.
//!
//! All records live in one set of maps behind a single `RwLock`, so a commit
//! can validate every expected version and apply the batch under one write
//! guard. State is lost on restart; used for tests and throwaway servers.

use std::collections::HashMap;

use async_trait::async_trait;
use manual_review_core::{EvaluatorId, StepKey, StudentKey, SubmissionKey, UnitId};
use tokio::sync::RwLock;

use super::{
    RepositoryError, ReviewEvent, ReviewRepository, StepOrder, StepQuery, SummaryOrder,
    SummaryQuery, Versioned, Write, WriteBatch,
};
use crate::review::entity::{
    CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, ReviewUnit, Student, Submission,
};

type Table<T> = HashMap<String, Versioned<T>>;

#[derive(Default)]
struct Tables {
    summaries: Table<ManualEvaluationSummary>,
    steps: Table<ManualEvaluationStep>,
    staff: Table<CourseStaff>,
    students: Table<Student>,
    submissions: HashMap<SubmissionKey, Submission>,
    units: HashMap<UnitId, ReviewUnit>,
    events: Vec<ReviewEvent>,
    next_event_id: i64,
}

/// Check that every write in `writes` matches the stored version.
fn check_versions<T>(
    table: &Table<T>,
    writes: &[Write<T>],
    key: impl Fn(&T) -> String,
    kind: &str,
) -> Result<(), RepositoryError> {
    for write in writes {
        let k = key(&write.value);
        let current = table.get(&k).map(|v| v.version);
        if current != write.expected_version {
            return Err(RepositoryError::conflict(format!("{} {}", kind, k)));
        }
    }
    Ok(())
}

fn apply<T>(table: &mut Table<T>, writes: Vec<Write<T>>, key: impl Fn(&T) -> String) {
    for write in writes {
        let version = write.expected_version.unwrap_or(0) + 1;
        table.insert(
            key(&write.value),
            Versioned {
                value: write.value,
                version,
            },
        );
    }
}

fn summary_key(s: &ManualEvaluationSummary) -> String {
    s.submission_key.0.clone()
}

fn step_key(s: &ManualEvaluationStep) -> String {
    s.key.0.clone()
}

fn staff_key(s: &CourseStaff) -> String {
    s.user_id.0.clone()
}

fn student_key(s: &Student) -> String {
    s.key.0.clone()
}

fn take<T>(items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(n) => items.into_iter().take(n).collect(),
        None => items,
    }
}

pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewRepository for InMemoryRepository {
    async fn get_summary(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Versioned<ManualEvaluationSummary>>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.summaries.get(key.as_str()).cloned())
    }

    async fn get_step(
        &self,
        key: &StepKey,
    ) -> Result<Option<Versioned<ManualEvaluationStep>>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.steps.get(key.as_str()).cloned())
    }

    async fn get_staff(
        &self,
        user_id: &EvaluatorId,
    ) -> Result<Option<Versioned<CourseStaff>>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.staff.get(user_id.as_str()).cloned())
    }

    async fn get_student(
        &self,
        key: &StudentKey,
    ) -> Result<Option<Versioned<Student>>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.students.get(key.as_str()).cloned())
    }

    async fn get_submission(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Submission>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.submissions.get(key).cloned())
    }

    async fn get_unit(&self, unit_id: &UnitId) -> Result<Option<ReviewUnit>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.units.get(unit_id).cloned())
    }

    async fn list_summaries(
        &self,
        query: &SummaryQuery,
    ) -> Result<Vec<Versioned<ManualEvaluationSummary>>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut results: Vec<_> = tables
            .summaries
            .values()
            .filter(|v| query.matches(&v.value))
            .cloned()
            .collect();
        match query.order {
            SummaryOrder::AssignmentPriority => results.sort_by(|a, b| {
                (
                    a.value.completed_count(),
                    a.value.assigned_count(),
                    a.value.create_date,
                    &a.value.submission_key,
                )
                    .cmp(&(
                        b.value.completed_count(),
                        b.value.assigned_count(),
                        b.value.create_date,
                        &b.value.submission_key,
                    ))
            }),
            SummaryOrder::CreateDate => results.sort_by(|a, b| {
                (a.value.create_date, &a.value.submission_key)
                    .cmp(&(b.value.create_date, &b.value.submission_key))
            }),
        }
        Ok(take(results, query.limit))
    }

    async fn list_steps(
        &self,
        query: &StepQuery,
    ) -> Result<Vec<ManualEvaluationStep>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut results: Vec<_> = tables
            .steps
            .values()
            .map(|v| &v.value)
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        match query.order {
            StepOrder::CreateDate => {
                results.sort_by(|a, b| (a.create_date, &a.key).cmp(&(b.create_date, &b.key)))
            }
            StepOrder::ChangeDate => {
                results.sort_by(|a, b| (a.change_date, &a.key).cmp(&(b.change_date, &b.key)))
            }
        }
        Ok(take(results, query.limit))
    }

    async fn list_staff(&self) -> Result<Vec<CourseStaff>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut staff: Vec<_> = tables.staff.values().map(|v| v.value.clone()).collect();
        staff.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(staff)
    }

    async fn list_units(&self) -> Result<Vec<ReviewUnit>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut units: Vec<_> = tables.units.values().cloned().collect();
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(units)
    }

    async fn list_submissions(
        &self,
        unit_id: Option<&UnitId>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut submissions: Vec<_> = tables
            .submissions
            .values()
            .filter(|s| unit_id.is_none_or(|u| *u == s.unit_id))
            .cloned()
            .collect();
        submissions.sort_by(|a, b| (a.submitted_at, &a.key).cmp(&(b.submitted_at, &b.key)));
        Ok(submissions)
    }

    async fn put_unit(&self, unit: ReviewUnit) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.units.insert(unit.unit_id.clone(), unit);
        Ok(())
    }

    async fn put_submission(&self, submission: Submission) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.submissions.insert(submission.key.clone(), submission);
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;

        check_versions(&tables.summaries, &batch.summaries, summary_key, "summary")?;
        check_versions(&tables.steps, &batch.steps, step_key, "step")?;
        check_versions(&tables.staff, &batch.staff, staff_key, "staff")?;
        check_versions(&tables.students, &batch.students, student_key, "student")?;

        apply(&mut tables.summaries, batch.summaries, summary_key);
        apply(&mut tables.steps, batch.steps, step_key);
        apply(&mut tables.staff, batch.staff, staff_key);
        apply(&mut tables.students, batch.students, student_key);
        Ok(())
    }

    async fn log_event(&self, event: &ReviewEvent) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.next_event_id += 1;
        let mut event = event.clone();
        event.id = tables.next_event_id;
        tables.events.push(event);
        Ok(())
    }

    async fn get_events(
        &self,
        submission_key: &SubmissionKey,
        limit: usize,
    ) -> Result<Vec<ReviewEvent>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut events: Vec<_> = tables
            .events
            .iter()
            .filter(|e| e.submission_key == *submission_key)
            .cloned()
            .collect();
        events.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<ReviewEvent>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut events = tables.events.clone();
        events.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::types::ReviewEventType;
    use crate::review::entity::SubmissionRef;
    use chrono::{DateTime, Duration, Utc};
    use manual_review_core::{AssignerKind, ReviewState};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn target(student: &str) -> SubmissionRef {
        SubmissionRef::new(UnitId::from("u1"), StudentKey::from(student))
    }

    fn summary(student: &str, created: i64) -> ManualEvaluationSummary {
        ManualEvaluationSummary::new(&target(student), at(created))
    }

    #[tokio::test]
    async fn test_insert_then_get_versions() {
        let repo = InMemoryRepository::new();
        let s = summary("alice", 0);
        repo.commit(WriteBatch::new().summary(s.clone(), None))
            .await
            .unwrap();

        let stored = repo.get_summary(&s.submission_key).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value, s);

        repo.commit(WriteBatch::new().summary(s.clone(), Some(1)))
            .await
            .unwrap();
        let stored = repo.get_summary(&s.submission_key).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_and_writes_nothing() {
        let repo = InMemoryRepository::new();
        let s = summary("alice", 0);
        repo.commit(WriteBatch::new().summary(s.clone(), None))
            .await
            .unwrap();

        let step = ManualEvaluationStep::assigned(
            &target("alice"),
            &EvaluatorId::from("bob"),
            AssignerKind::Human,
            at(1),
        );
        // The step is new, but the summary version is stale.
        let err = repo
            .commit(
                WriteBatch::new()
                    .step(step.clone(), None)
                    .summary(s.clone(), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
        assert!(repo.get_step(&step.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assignment_priority_order() {
        let repo = InMemoryRepository::new();
        let mut completed = summary("a", 0);
        completed.increment_count(ReviewState::Completed).unwrap();
        let mut assigned = summary("b", 1);
        assigned.increment_count(ReviewState::Assigned).unwrap();
        let fresh_newer = summary("c", 3);
        let fresh_older = summary("d", 2);

        let mut batch = WriteBatch::new();
        for s in [&completed, &assigned, &fresh_newer, &fresh_older] {
            batch = batch.summary(s.clone(), None);
        }
        repo.commit(batch).await.unwrap();

        let listed = repo
            .list_summaries(&SummaryQuery::default())
            .await
            .unwrap();
        let order: Vec<&str> = listed
            .iter()
            .map(|v| v.value.reviewee_key.as_str())
            .collect();
        assert_eq!(order, vec!["d", "c", "b", "a"]);

        let limited = repo
            .list_summaries(&SummaryQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let repo = InMemoryRepository::new();
        let key = SubmissionKey::from("u1:alice");
        for i in 0..3 {
            repo.log_event(&ReviewEvent::new(
                key.clone(),
                ReviewEventType::ReviewProcessStarted,
                at(i),
            ))
            .await
            .unwrap();
        }
        repo.log_event(&ReviewEvent::new(
            SubmissionKey::from("u1:bob"),
            ReviewEventType::ReviewProcessStarted,
            at(10),
        ))
        .await
        .unwrap();

        let events = repo.get_events(&key, 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].recorded_at, at(2));
        assert!(events[0].id > events[1].id);

        let recent = repo.get_recent_events(10).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].submission_key.as_str(), "u1:bob");
    }

    fn arb_step() -> impl Strategy<Value = ManualEvaluationStep> {
        (
            0usize..3,
            0usize..3,
            0usize..4,
            any::<bool>(),
            any::<bool>(),
            0i64..100,
        )
            .prop_map(|(student, evaluator, state, auto, removed, changed)| {
                let target = target(&format!("s{}", student));
                let kind = if auto {
                    AssignerKind::Auto
                } else {
                    AssignerKind::Human
                };
                let mut step = ManualEvaluationStep::assigned(
                    &target,
                    &EvaluatorId::from(format!("e{}", evaluator)),
                    kind,
                    at(0),
                );
                step.state = ReviewState::ALL[state];
                step.removed = removed;
                step.change_date = at(0) + Duration::seconds(changed);
                step
            })
    }

    proptest! {
        /// `list_steps` returns exactly the stored steps the query matches.
        #[test]
        fn list_steps_matches_filter(
            steps in proptest::collection::vec(arb_step(), 0..30),
            cutoff in 0i64..100,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let repo = InMemoryRepository::new();
                let mut unique = HashMap::new();
                for step in steps {
                    unique.insert(step.key.clone(), step);
                }
                let mut batch = WriteBatch::new();
                for step in unique.values() {
                    batch = batch.step(step.clone(), None);
                }
                repo.commit(batch).await.unwrap();

                let query = StepQuery {
                    assigner_kind: Some(AssignerKind::Auto),
                    state: Some(ReviewState::Assigned),
                    removed: Some(false),
                    changed_before: Some(at(cutoff)),
                    order: StepOrder::ChangeDate,
                    ..Default::default()
                };
                let listed = repo.list_steps(&query).await.unwrap();
                let expected = unique.values().filter(|s| query.matches(s)).count();
                assert_eq!(listed.len(), expected);
                for pair in listed.windows(2) {
                    assert!(pair[0].change_date <= pair[1].change_date);
                }
            });
        }
    }
}
