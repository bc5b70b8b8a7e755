//! End-to-end review flows, run against both storage backends.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use manual_review_core::{
    AssignmentOutcome, EvaluatorId, ReviewState, ScoringMethod, StudentKey, UnitId,
    UpsertStaffRequest, UpsertUnitRequest,
};
use manual_review_server::jobs::{self, Job};
use manual_review_server::review::repository::StepQuery;
use manual_review_server::review::{
    AssignmentSettings, InMemoryRepository, Manager, ManualClock, ReviewContents, ReviewError,
    ReviewRepository, SqliteRepository, SubmissionRef,
};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn backends() -> Vec<(&'static str, Arc<dyn ReviewRepository>)> {
    vec![
        ("memory", Arc::new(InMemoryRepository::new())),
        (
            "sqlite",
            Arc::new(SqliteRepository::new_in_memory().expect("in-memory sqlite")),
        ),
    ]
}

async fn setup(
    repo: Arc<dyn ReviewRepository>,
    num_reviewers: u32,
    staff: &[&str],
) -> (Manager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = Manager::new(repo, AssignmentSettings::default())
        .with_clock(clock.clone())
        .with_seed(11);
    manager
        .put_unit(
            &UnitId::from("essay"),
            &UpsertUnitRequest {
                title: "Essay".to_string(),
                num_reviewers,
                scoring_method: ScoringMethod::Min,
            },
        )
        .await
        .unwrap();
    for user in staff {
        manager
            .upsert_staff(
                &EvaluatorId::from(*user),
                &UpsertStaffRequest {
                    email: format!("{}@example.com", user),
                    can_grade: true,
                    can_override: false,
                },
            )
            .await
            .unwrap();
    }
    (manager, clock)
}

fn contents(score: f64) -> ReviewContents {
    ReviewContents {
        comments: Some("ok".to_string()),
        score: Some(score),
        mark_completed: true,
    }
}

/// Summary counters must always equal a recount of the non-removed steps.
async fn assert_counts_consistent(manager: &Manager, target: &SubmissionRef) {
    let repo = manager.repository();
    let summary = repo
        .get_summary(&target.submission_key)
        .await
        .unwrap()
        .unwrap()
        .value;
    let steps = repo
        .list_steps(&StepQuery {
            submission_key: Some(target.submission_key.clone()),
            removed: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    let count = |f: fn(ReviewState) -> bool| steps.iter().filter(|s| f(s.state)).count() as u32;
    assert_eq!(summary.assigned_count(), count(|s| s.is_open()));
    assert_eq!(
        summary.completed_count(),
        count(|s| s == ReviewState::Completed)
    );
    assert_eq!(summary.expired_count(), count(|s| s == ReviewState::Expired));
}

#[tokio::test]
async fn test_two_reviewers_min_score() {
    for (name, repo) in backends() {
        let (manager, _) = setup(repo, 2, &["bob", "carol", "frank"]).await;
        manager
            .upsert_student(&StudentKey::from("alice"), "alice@example.com")
            .await
            .unwrap();

        let (_, outcome) = manager
            .record_submission(
                &UnitId::from("essay"),
                &StudentKey::from("alice"),
                serde_json::json!({"text": "..."}),
            )
            .await
            .unwrap();
        let AssignmentOutcome::Assigned { evaluators } = outcome else {
            panic!("{}: expected an assignment, got {:?}", name, outcome);
        };
        assert_eq!(evaluators.len(), 2, "{}", name);

        let target = SubmissionRef::new(UnitId::from("essay"), StudentKey::from("alice"));
        let first = manager
            .write_manual_review(&target.step_key(&evaluators[0]), contents(0.9))
            .await
            .unwrap();
        assert_eq!(first.final_score, None, "{}", name);

        let second = manager
            .write_manual_review(&target.step_key(&evaluators[1]), contents(0.6))
            .await
            .unwrap();
        assert_eq!(second.final_score, Some(0.6), "{}", name);
        assert_counts_consistent(&manager, &target).await;

        let student = manager
            .repository()
            .get_student(&StudentKey::from("alice"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(
            student.scores.get(&UnitId::from("essay")),
            Some(&0.6),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_expiry_then_reassignment() {
    for (name, repo) in backends() {
        let (manager, clock) = setup(repo, 1, &["bob", "carol"]).await;
        let target = SubmissionRef::new(UnitId::from("essay"), StudentKey::from("alice"));
        manager.start_review_process_for(&target).await.unwrap();

        let key = manager
            .get_new_manual_review(&UnitId::from("essay"), &EvaluatorId::from("bob"))
            .await
            .unwrap();
        assert_eq!(key, target.step_key(&EvaluatorId::from("bob")), "{}", name);

        clock.advance(Duration::hours(25));
        let report = jobs::run_job(&manager, Job::ExpireReviews, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1, "{}", name);
        assert_counts_consistent(&manager, &target).await;

        // An expired step cannot expire again.
        let err = manager.expire_manual_review(&key).await.unwrap_err();
        assert!(matches!(err, ReviewError::Transition { .. }), "{}", name);

        let report = jobs::run_job(&manager, Job::AssignReview, Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1, "{}", name);

        let carol = manager
            .get_step(&target.step_key(&EvaluatorId::from("carol")))
            .await
            .unwrap();
        assert_eq!(carol.state, ReviewState::Assigned, "{}", name);
        assert_counts_consistent(&manager, &target).await;

        // bob can still finish the expired review late.
        manager.write_manual_review(&key, contents(0.5)).await.unwrap();
        assert_counts_consistent(&manager, &target).await;
    }
}

#[tokio::test]
async fn test_double_remove_is_rejected() {
    for (name, repo) in backends() {
        let (manager, _) = setup(repo, 1, &["bob"]).await;
        manager
            .record_submission(
                &UnitId::from("essay"),
                &StudentKey::from("alice"),
                serde_json::Value::Null,
            )
            .await
            .unwrap();
        let target = SubmissionRef::new(UnitId::from("essay"), StudentKey::from("alice"));
        let key = target.step_key(&EvaluatorId::from("bob"));

        manager.delete_manual_evaluator(&key).await.unwrap();
        let err = manager.delete_manual_evaluator(&key).await.unwrap_err();
        assert!(matches!(err, ReviewError::Removed { .. }), "{}", name);
        assert_counts_consistent(&manager, &target).await;

        let staff = manager
            .repository()
            .get_staff(&EvaluatorId::from("bob"))
            .await
            .unwrap()
            .unwrap()
            .value;
        assert_eq!(staff.num_assigned, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_repair_jobs_are_idempotent() {
    for (name, repo) in backends() {
        let (manager, _) = setup(repo, 1, &["bob", "carol"]).await;
        for student in ["alice", "dave", "erin"] {
            manager
                .record_submission(
                    &UnitId::from("essay"),
                    &StudentKey::from(student),
                    serde_json::Value::Null,
                )
                .await
                .unwrap();
        }

        for job in [
            Job::FixMissingManualEvaluationSummary,
            Job::FixNumAssigned,
            Job::ReassignReview,
            Job::CalculateFinalScore,
        ] {
            let first = jobs::run_job(&manager, job, Duration::hours(24))
                .await
                .unwrap();
            let second = jobs::run_job(&manager, job, Duration::hours(24))
                .await
                .unwrap();
            assert_eq!(first.failed, 0, "{} {}", name, job);
            assert_eq!(second.succeeded, 0, "{} {}", name, job);
        }

        let steps = manager
            .repository()
            .list_steps(&StepQuery::default())
            .await
            .unwrap();
        assert_eq!(steps.len(), 3, "{}", name);
    }
}
