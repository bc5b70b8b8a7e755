//! Batch jobs that assign work and repair drift.
//!
//! Each job re-derives what to do from stored state, so running one twice is
//! harmless. A failure on one item is logged and counted; the job moves on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use manual_review_core::{AssignmentOutcome, EvaluatorId, ReviewState, StepKey};
use serde::Serialize;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::review::repository::{StepQuery, SummaryOrder, SummaryQuery};
use crate::review::{Manager, ReviewError, SubmissionRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    AssignReview,
    ReassignReview,
    CalculateFinalScore,
    FixMissingManualEvaluationSummary,
    FixNumAssigned,
    ExpireReviews,
}

impl Job {
    pub const ALL: [Job; 6] = [
        Job::AssignReview,
        Job::ReassignReview,
        Job::CalculateFinalScore,
        Job::FixMissingManualEvaluationSummary,
        Job::FixNumAssigned,
        Job::ExpireReviews,
    ];

    /// Path segment under `/cron/manual_review/`.
    pub fn name(&self) -> &'static str {
        match self {
            Job::AssignReview => "assign_review",
            Job::ReassignReview => "reassign_review",
            Job::CalculateFinalScore => "calculate_final_score",
            Job::FixMissingManualEvaluationSummary => "fix_missing_manual_evaluation_summary",
            Job::FixNumAssigned => "fix_num_assigned",
            Job::ExpireReviews => "expire_reviews",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Job {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Job::ALL
            .into_iter()
            .find(|job| job.name() == s)
            .ok_or_else(|| format!("unknown job: {}", s))
    }
}

/// What a job run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub scanned: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobReport {
    fn new(job: &'static str) -> Self {
        Self {
            job,
            ..Default::default()
        }
    }

    /// Count one item: `Ok(true)` did work, `Ok(false)` had nothing to do.
    fn record(&mut self, item: impl fmt::Display, result: Result<bool, ReviewError>) {
        self.scanned += 1;
        match result {
            Ok(true) => self.succeeded += 1,
            Ok(false) => self.skipped += 1,
            Err(e) => {
                error!("{}: failed on {}: {}", self.job, item, e);
                self.failed += 1;
            }
        }
    }

    fn finish(self) -> Self {
        info!(
            "{}: scanned {}, succeeded {}, skipped {}, failed {}",
            self.job, self.scanned, self.succeeded, self.skipped, self.failed
        );
        self
    }
}

fn assigned(outcome: AssignmentOutcome) -> bool {
    matches!(outcome, AssignmentOutcome::Assigned { .. })
}

/// Run a job by its cron name.
pub async fn run_job(
    manager: &Manager,
    job: Job,
    review_window: chrono::Duration,
) -> Result<JobReport, ReviewError> {
    match job {
        Job::AssignReview => assign_submissions(manager).await,
        Job::ReassignReview => reassign_from_former_staff(manager).await,
        Job::CalculateFinalScore => calculate_final_scores(manager).await,
        Job::FixMissingManualEvaluationSummary => fix_missing_summaries(manager).await,
        Job::FixNumAssigned => fix_num_assigned(manager).await,
        Job::ExpireReviews => expire_stale_reviews(manager, review_window).await,
    }
}

/// Find evaluators for submissions with no open step.
pub async fn assign_submissions(manager: &Manager) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(Job::AssignReview.name());
    let summaries = manager
        .repository()
        .list_summaries(&SummaryQuery {
            without_open_steps: true,
            order: SummaryOrder::CreateDate,
            ..Default::default()
        })
        .await?;

    for summary in summaries {
        let target = summary.value.submission_ref();
        let result = manager
            .find_and_add_evaluator(&target, None, &[])
            .await
            .map(assigned);
        report.record(&target.submission_key, result);
    }
    Ok(report.finish())
}

/// Move open work away from the listed evaluators.
pub async fn reassign_by_course_staff(
    manager: &Manager,
    ids: &[EvaluatorId],
) -> Result<JobReport, ReviewError> {
    reassign(
        manager,
        "reassign_by_course_staff",
        |evaluator| ids.contains(evaluator),
        ids,
    )
    .await
}

/// Move open work away from everyone except the listed evaluators.
pub async fn reassign_excluding_course_staff(
    manager: &Manager,
    ids: &[EvaluatorId],
) -> Result<JobReport, ReviewError> {
    reassign(
        manager,
        "reassign_excluding_course_staff",
        |evaluator| !ids.contains(evaluator),
        &[],
    )
    .await
}

/// Move open work away from evaluators who are no longer course staff.
pub async fn reassign_from_former_staff(manager: &Manager) -> Result<JobReport, ReviewError> {
    let current: Vec<EvaluatorId> = manager
        .repository()
        .list_staff()
        .await?
        .into_iter()
        .map(|s| s.user_id)
        .collect();
    let mut report = reassign_excluding_course_staff(manager, &current).await?;
    report.job = Job::ReassignReview.name();
    Ok(report)
}

async fn reassign(
    manager: &Manager,
    job: &'static str,
    selects: impl Fn(&EvaluatorId) -> bool,
    exclude: &[EvaluatorId],
) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(job);
    let steps = manager
        .repository()
        .list_steps(&StepQuery {
            removed: Some(false),
            ..Default::default()
        })
        .await?;

    for step in steps
        .into_iter()
        .filter(|s| s.state != ReviewState::Completed && selects(&s.evaluator))
    {
        let target = step.submission_ref();
        let result = reassign_step(manager, &target, &step.key, &step.evaluator, exclude).await;
        report.record(&step.key, result);
    }
    Ok(report.finish())
}

async fn reassign_step(
    manager: &Manager,
    target: &SubmissionRef,
    key: &StepKey,
    evaluator: &EvaluatorId,
    exclude: &[EvaluatorId],
) -> Result<bool, ReviewError> {
    if !manager.release_step(key).await? {
        return Ok(false);
    }
    let mut exclude = exclude.to_vec();
    exclude.push(evaluator.clone());
    let outcome = manager
        .find_and_add_evaluator(target, None, &exclude)
        .await?;
    Ok(assigned(outcome))
}

/// Store final scores for every fully reviewed submission.
pub async fn calculate_final_scores(manager: &Manager) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(Job::CalculateFinalScore.name());
    let summaries = manager
        .repository()
        .list_summaries(&SummaryQuery {
            without_open_steps: true,
            with_completed: true,
            order: SummaryOrder::CreateDate,
            ..Default::default()
        })
        .await?;

    for summary in summaries {
        let target = summary.value.submission_ref();
        let result = manager
            .update_final_score(&target)
            .await
            .map(|score| score.is_some());
        report.record(&target.submission_key, result);
    }
    Ok(report.finish())
}

/// Send submissions that never got a summary through evaluation.
pub async fn fix_missing_summaries(manager: &Manager) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(Job::FixMissingManualEvaluationSummary.name());
    let submissions = manager.repository().list_submissions(None).await?;

    for submission in submissions {
        let target = submission.submission_ref();
        let result = match manager.repository().get_summary(&submission.key).await {
            Ok(Some(_)) => Ok(false),
            Ok(None) => manager
                .submit_for_evaluation(&target, None)
                .await
                .map(|_| true),
            Err(e) => Err(e.into()),
        };
        report.record(&submission.key, result);
    }
    Ok(report.finish())
}

/// Reset every staff member's counters to a recount of their steps.
pub async fn fix_num_assigned(manager: &Manager) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(Job::FixNumAssigned.name());
    let staff = manager.repository().list_staff().await?;

    for member in staff {
        let result = manager.recount_staff(&member.user_id).await;
        report.record(&member.user_id, result);
    }
    Ok(report.finish())
}

/// Expire stale automatic assignments in every unit.
pub async fn expire_stale_reviews(
    manager: &Manager,
    review_window: chrono::Duration,
) -> Result<JobReport, ReviewError> {
    let mut report = JobReport::new(Job::ExpireReviews.name());
    let units = manager.repository().list_units().await?;

    for unit in units {
        match manager
            .expire_old_manual_reviews_for_unit(review_window, &unit.unit_id)
            .await
        {
            Ok(expiry) => {
                report.scanned += expiry.expired.len() + expiry.failed.len();
                report.succeeded += expiry.expired.len();
                report.failed += expiry.failed.len();
            }
            Err(e) => {
                error!("{}: failed on unit {}: {}", report.job, unit.unit_id, e);
                report.failed += 1;
            }
        }
    }
    Ok(report.finish())
}

/// Expire stale reviews and hand out unassigned submissions every `period`.
pub async fn job_loop(manager: Arc<Manager>, period: Duration, review_window: chrono::Duration) {
    let mut interval = interval(period);

    loop {
        interval.tick().await;

        if let Err(e) = expire_stale_reviews(&manager, review_window).await {
            error!("Error expiring stale reviews: {}", e);
        }
        if let Err(e) = assign_submissions(&manager).await {
            error!("Error assigning submissions: {}", e);
        }
    }
}
