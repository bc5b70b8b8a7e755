//! Status types for the status endpoint.
//!
//! Aggregates review step states per unit so an admin can see at a glance
//! where work is piling up.

use std::collections::BTreeMap;

use manual_review_core::{ReviewState, UnitId};
use serde::Serialize;

use crate::review::repository::{StepQuery, SummaryQuery};
use crate::review::{
    CounterSnapshot, Manager, ManualEvaluationStep, ManualEvaluationSummary, ReviewError,
    ReviewUnit,
};

/// Step counts by state. Removed steps are counted separately.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub expired: usize,
    pub removed: usize,
}

impl StepCounts {
    fn add(&mut self, step: &ManualEvaluationStep) {
        if step.removed {
            self.removed += 1;
            return;
        }
        match step.state {
            ReviewState::Assigned => self.assigned += 1,
            ReviewState::InProgress => self.in_progress += 1,
            ReviewState::Completed => self.completed += 1,
            ReviewState::Expired => self.expired += 1,
        }
    }

    fn merge(&mut self, other: &StepCounts) {
        self.assigned += other.assigned;
        self.in_progress += other.in_progress;
        self.completed += other.completed;
        self.expired += other.expired;
        self.removed += other.removed;
    }
}

/// One unit's row on the status page.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatusEntry {
    pub unit_id: UnitId,
    pub title: String,
    pub num_reviewers: u32,
    /// Submissions with a review summary.
    pub submissions: usize,
    /// Submissions with no open step, waiting for an evaluator.
    pub unassigned: usize,
    pub steps: StepCounts,
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub total_submissions: usize,
    pub steps: StepCounts,
    pub units: Vec<UnitStatusEntry>,
    /// Operations run by this process since it started.
    pub counters: CounterSnapshot,
}

impl StatusData {
    /// Build status data from stored records. Records of unknown units are
    /// ignored.
    pub fn from_records(
        units: Vec<ReviewUnit>,
        summaries: &[ManualEvaluationSummary],
        steps: &[ManualEvaluationStep],
        version: String,
    ) -> Self {
        let mut entries: BTreeMap<UnitId, UnitStatusEntry> = units
            .into_iter()
            .map(|unit| {
                let entry = UnitStatusEntry {
                    unit_id: unit.unit_id.clone(),
                    title: unit.title,
                    num_reviewers: unit.num_reviewers,
                    submissions: 0,
                    unassigned: 0,
                    steps: StepCounts::default(),
                };
                (unit.unit_id, entry)
            })
            .collect();

        for summary in summaries {
            if let Some(entry) = entries.get_mut(&summary.unit_id) {
                entry.submissions += 1;
                if summary.assigned_count() == 0 {
                    entry.unassigned += 1;
                }
            }
        }
        for step in steps {
            if let Some(entry) = entries.get_mut(&step.unit_id) {
                entry.steps.add(step);
            }
        }

        let units: Vec<UnitStatusEntry> = entries.into_values().collect();
        let mut totals = StepCounts::default();
        for unit in &units {
            totals.merge(&unit.steps);
        }

        Self {
            version,
            total_submissions: units.iter().map(|u| u.submissions).sum(),
            steps: totals,
            units,
            counters: CounterSnapshot::default(),
        }
    }

    /// Read everything needed for the status page.
    pub async fn collect(manager: &Manager, version: String) -> Result<Self, ReviewError> {
        let repo = manager.repository();
        let units = repo.list_units().await?;
        let summaries: Vec<ManualEvaluationSummary> = repo
            .list_summaries(&SummaryQuery::default())
            .await?
            .into_iter()
            .map(|s| s.value)
            .collect();
        let steps = repo.list_steps(&StepQuery::default()).await?;
        let mut data = Self::from_records(units, &summaries, &steps, version);
        data.counters = manager.counters();
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::SubmissionRef;
    use chrono::{DateTime, Utc};
    use manual_review_core::{AssignerKind, EvaluatorId, ScoringMethod, StudentKey};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn unit(id: &str) -> ReviewUnit {
        ReviewUnit {
            unit_id: UnitId::from(id),
            title: format!("Unit {}", id),
            num_reviewers: 1,
            scoring_method: ScoringMethod::Average,
        }
    }

    fn step(unit: &str, student: &str, state: ReviewState, removed: bool) -> ManualEvaluationStep {
        let target = SubmissionRef::new(UnitId::from(unit), StudentKey::from(student));
        let mut step = ManualEvaluationStep::assigned(
            &target,
            &EvaluatorId::from("bob"),
            AssignerKind::Auto,
            now(),
        );
        step.state = state;
        step.removed = removed;
        step
    }

    #[test]
    fn test_status_data_empty() {
        let data = StatusData::from_records(vec![], &[], &[], "1.0.0".to_string());
        assert_eq!(data.total_submissions, 0);
        assert!(data.units.is_empty());
        assert_eq!(data.steps, StepCounts::default());
    }

    #[test]
    fn test_status_data_counts_states() {
        let mut open = ManualEvaluationSummary::new(
            &SubmissionRef::new(UnitId::from("u1"), StudentKey::from("alice")),
            now(),
        );
        open.increment_count(ReviewState::Assigned).unwrap();
        let waiting = ManualEvaluationSummary::new(
            &SubmissionRef::new(UnitId::from("u1"), StudentKey::from("dave")),
            now(),
        );
        let summaries = vec![open, waiting];
        let steps = vec![
            step("u1", "alice", ReviewState::Assigned, false),
            step("u1", "dave", ReviewState::Completed, true),
            step("u2", "alice", ReviewState::InProgress, false),
            step("u2", "dave", ReviewState::Expired, false),
            step("gone", "erin", ReviewState::Completed, false),
        ];

        let data = StatusData::from_records(
            vec![unit("u2"), unit("u1")],
            &summaries,
            &steps,
            "abc12345".to_string(),
        );

        assert_eq!(data.version, "abc12345");
        assert_eq!(data.total_submissions, 2);
        let ids: Vec<&str> = data.units.iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);

        let u1 = &data.units[0];
        assert_eq!((u1.submissions, u1.unassigned), (2, 1));
        assert_eq!(u1.steps.assigned, 1);
        assert_eq!(u1.steps.removed, 1);
        assert_eq!(u1.steps.completed, 0);

        let u2 = &data.units[1];
        assert_eq!((u2.steps.in_progress, u2.steps.expired), (1, 1));

        assert_eq!(
            data.steps,
            StepCounts {
                assigned: 1,
                in_progress: 1,
                completed: 0,
                expired: 1,
                removed: 1,
            }
        );
    }

    #[test]
    fn test_status_data_serializes() {
        let data = StatusData::from_records(vec![unit("u1")], &[], &[], "v".to_string());
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["units"][0]["unit_id"], "u1");
        assert_eq!(json["steps"]["in_progress"], 0);
    }

    #[tokio::test]
    async fn test_collect_reports_manager_counters() {
        use crate::review::{AssignmentSettings, InMemoryRepository};
        use manual_review_core::UpsertStaffRequest;
        use std::sync::Arc;

        let manager = Manager::new(
            Arc::new(InMemoryRepository::new()),
            AssignmentSettings::default(),
        );
        manager
            .upsert_staff(
                &EvaluatorId::from("bob"),
                &UpsertStaffRequest {
                    email: "bob@example.com".to_string(),
                    can_grade: true,
                    can_override: false,
                },
            )
            .await
            .unwrap();
        let target = SubmissionRef::new(UnitId::from("u1"), StudentKey::from("alice"));
        let key = manager
            .add_evaluator(&target, &EvaluatorId::from("bob"), None)
            .await
            .unwrap();
        manager.expire_manual_review(&key).await.unwrap();

        let data = StatusData::collect(&manager, "v".to_string()).await.unwrap();
        assert_eq!(data.counters.evaluators_added, 1);
        assert_eq!(data.counters.steps_expired, 1);
        assert_eq!(data.counters.reviews_written, 0);

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["counters"]["steps_expired"], 1);
    }
}
