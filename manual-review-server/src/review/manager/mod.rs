//! Transactional operations on review records.
//!
//! Every mutating operation reads the records it needs together with their
//! versions, runs a pure transition from `transition`, and commits the result
//! as one `WriteBatch`. A commit that loses a race returns
//! `RepositoryError::Conflict`; the whole read-transition-commit cycle is then
//! retried, up to `TRANSACTION_ATTEMPTS` times.


use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use manual_review_core::{
    calculate_final_score, AssignerKind, AssignmentOutcome, EvaluatorId, ReviewState,
    ScoringMethod, StepKey, StudentKey, SubmissionKey, UnitId, UpsertStaffRequest,
    UpsertUnitRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::counters::{incr, CounterSnapshot, ReviewCounters};
use super::entity::{
    CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, ReviewUnit, Student, Submission,
    SubmissionRef, MAX_UNREMOVED_REVIEW_STEPS,
};
use super::error::ReviewError;
use super::repository::{
    ReviewEvent, ReviewRepository, StepOrder, StepQuery, SummaryOrder, SummaryQuery, Versioned,
    WriteBatch,
};
use super::transition::{self, AutoAssignment, ReviewContents, SkipReason, StepChange};
use crate::dashboard::types::ReviewEventType;

/// Attempts per read-modify-commit cycle before a conflict is returned.
pub const TRANSACTION_ATTEMPTS: usize = 3;

/// Cap on the step keys returned for one evaluator and unit.
pub const MAX_STEP_KEYS: usize = 2 * MAX_UNREMOVED_REVIEW_STEPS as usize;

/// Tuning for `get_new_manual_review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentSettings {
    /// How many of the highest-priority summaries to draw from.
    pub candidate_count: usize,
    /// Skipped or conflicting candidates tolerated before giving up.
    pub max_retries: usize,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            candidate_count: 20,
            max_retries: 5,
        }
    }
}

/// Result of `expire_old_manual_reviews_for_unit`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub expired: Vec<StepKey>,
    pub failed: Vec<StepKey>,
}

/// Result of `write_manual_review`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub step: ManualEvaluationStep,
    /// Set when this write produced a new final score for the student.
    pub final_score: Option<f64>,
}

pub struct Manager {
    repo: Arc<dyn ReviewRepository>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    settings: AssignmentSettings,
    counters: ReviewCounters,
}

impl Manager {
    pub fn new(repo: Arc<dyn ReviewRepository>, settings: AssignmentSettings) -> Self {
        Self {
            repo,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
            settings,
            counters: ReviewCounters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make candidate selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn repository(&self) -> &Arc<dyn ReviewRepository> {
        &self.repo
    }

    pub fn settings(&self) -> AssignmentSettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Run `attempt` until it succeeds, fails with something other than a
    /// commit conflict, or runs out of attempts.
    async fn in_transaction<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, ReviewError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReviewError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() && tries < TRANSACTION_ATTEMPTS => {
                    debug!("{} attempt {} conflicted, retrying: {}", operation, tries, e);
                    incr(&self.counters.transaction_retries);
                    tries += 1;
                }
                Err(e) if e.is_conflict() => {
                    warn!("{} gave up after {} attempts: {}", operation, tries, e);
                    incr(&self.counters.transaction_conflicts);
                    return Err(e);
                }
                result => return result,
            }
        }
    }

    /// Add a transition's records to `batch`.
    ///
    /// The evaluator's staff record is read and adjusted only when its counters
    /// move and the record exists.
    async fn stage(
        &self,
        mut batch: WriteBatch,
        change: StepChange,
        step_version: Option<u64>,
        summary_version: Option<u64>,
    ) -> Result<WriteBatch, ReviewError> {
        if !change.staff.is_zero() {
            if let Some(Versioned { mut value, version }) =
                self.repo.get_staff(&change.step.evaluator).await?
            {
                change.staff.apply(&mut value);
                batch = batch.staff(value, Some(version));
            }
        }
        if let Some(summary) = change.summary {
            batch = batch.summary(summary, summary_version);
        }
        Ok(batch.step(change.step, step_version))
    }

    async fn record(&self, submission_key: &SubmissionKey, event_type: ReviewEventType) {
        let event = ReviewEvent::new(submission_key.clone(), event_type, self.clock.now());
        if let Err(e) = self.repo.log_event(&event).await {
            warn!("Failed to log review event for {}: {}", submission_key, e);
        }
    }

    async fn require_step(
        &self,
        key: &StepKey,
    ) -> Result<Versioned<ManualEvaluationStep>, ReviewError> {
        self.repo
            .get_step(key)
            .await?
            .ok_or_else(|| ReviewError::not_found(format!("review step {}", key)))
    }

    async fn require_summary(
        &self,
        key: &SubmissionKey,
    ) -> Result<Versioned<ManualEvaluationSummary>, ReviewError> {
        self.repo
            .get_summary(key)
            .await?
            .ok_or_else(|| ReviewError::not_found(format!("review summary {}", key)))
    }

    // =========================================================================
    // Step operations
    // =========================================================================

    /// Create an empty summary so the submission can be picked up for review.
    pub async fn start_review_process_for(
        &self,
        target: &SubmissionRef,
    ) -> Result<SubmissionKey, ReviewError> {
        target.validate()?;
        self.in_transaction("start_review_process_for", || async move {
            if self.repo.get_summary(&target.submission_key).await?.is_some() {
                return Err(ReviewError::AlreadyStarted(target.submission_key.clone()));
            }
            let summary = ManualEvaluationSummary::new(target, self.clock.now());
            self.repo
                .commit(WriteBatch::new().summary(summary, None))
                .await?;
            Ok(())
        })
        .await?;

        info!("Started review process for {}", target.submission_key);
        self.record(&target.submission_key, ReviewEventType::ReviewProcessStarted)
            .await;
        Ok(target.submission_key.clone())
    }

    /// Assign `evaluator` to a submission on behalf of a human.
    pub async fn add_evaluator(
        &self,
        target: &SubmissionRef,
        evaluator: &EvaluatorId,
        drive_permission_list: Option<String>,
    ) -> Result<StepKey, ReviewError> {
        target.validate()?;
        evaluator.validate()?;
        let step_key = target.step_key(evaluator);
        let (key, drive) = (&step_key, &drive_permission_list);

        self.in_transaction("add_evaluator", || async move {
            if self.repo.get_staff(evaluator).await?.is_none() {
                return Err(ReviewError::not_found(format!("course staff {}", evaluator)));
            }
            let step = self.repo.get_step(key).await?;
            let summary = self.repo.get_summary(&target.submission_key).await?;
            let step_version = step.as_ref().map(|s| s.version);
            let summary_version = summary.as_ref().map(|s| s.version);

            let change = transition::add_evaluator(
                step.map(|s| s.value),
                summary.map(|s| s.value),
                target,
                evaluator,
                drive.clone(),
                self.clock.now(),
            )?;
            let batch = self
                .stage(WriteBatch::new(), change, step_version, summary_version)
                .await?;
            self.repo.commit(batch).await?;
            Ok(())
        })
        .await?;

        info!("Assigned {} to {}", evaluator, target.submission_key);
        incr(&self.counters.evaluators_added);
        self.record(
            &target.submission_key,
            ReviewEventType::EvaluatorAssigned {
                evaluator: evaluator.clone(),
                assigner_kind: AssignerKind::Human,
            },
        )
        .await;
        Ok(step_key)
    }

    /// Soft-delete a step. Deleting an already removed step is an error.
    pub async fn delete_manual_evaluator(&self, key: &StepKey) -> Result<StepKey, ReviewError> {
        let step = self
            .in_transaction("delete_manual_evaluator", || async move {
                let step = self.require_step(key).await?;
                if step.value.removed {
                    return Err(ReviewError::Removed { step: key.clone() });
                }
                let summary = self.require_summary(&step.value.submission_key).await?;

                let change = transition::remove_step(step.value, summary.value, self.clock.now())?;
                let removed = change.step.clone();
                let batch = self
                    .stage(
                        WriteBatch::new(),
                        change,
                        Some(step.version),
                        Some(summary.version),
                    )
                    .await?;
                self.repo.commit(batch).await?;
                Ok(removed)
            })
            .await?;

        info!("Removed review step {}", key);
        incr(&self.counters.steps_removed);
        self.record(
            &step.submission_key,
            ReviewEventType::StepRemoved {
                evaluator: step.evaluator.clone(),
            },
        )
        .await;
        Ok(step.key)
    }

    /// Remove a step during reassignment.
    ///
    /// Unlike `delete_manual_evaluator`, an already removed step is reported as
    /// `false` and a missing summary is tolerated.
    pub async fn release_step(&self, key: &StepKey) -> Result<bool, ReviewError> {
        let released = self
            .in_transaction("release_step", || async move {
                let step = self.require_step(key).await?;
                if step.value.removed {
                    return Ok(None);
                }
                let now = self.clock.now();
                let summary = self.repo.get_summary(&step.value.submission_key).await?;
                let (change, summary_version) = match summary {
                    Some(summary) => (
                        transition::remove_step(step.value, summary.value, now)?,
                        Some(summary.version),
                    ),
                    None => {
                        warn!("Releasing step {} whose summary is missing", key);
                        let target = step.value.submission_ref();
                        let placeholder = ManualEvaluationSummary::new(&target, now);
                        let mut change = transition::remove_step(step.value, placeholder, now)?;
                        change.summary = None;
                        (change, None)
                    }
                };
                let released = change.step.clone();
                let batch = self
                    .stage(WriteBatch::new(), change, Some(step.version), summary_version)
                    .await?;
                self.repo.commit(batch).await?;
                Ok(Some(released))
            })
            .await?;

        let Some(step) = released else {
            return Ok(false);
        };
        info!("Released review step {}", key);
        incr(&self.counters.steps_removed);
        self.record(
            &step.submission_key,
            ReviewEventType::StepRemoved {
                evaluator: step.evaluator,
            },
        )
        .await;
        Ok(true)
    }

    /// `ASSIGNED|IN_PROGRESS -> EXPIRED`.
    pub async fn expire_manual_review(&self, key: &StepKey) -> Result<StepKey, ReviewError> {
        let step = self
            .in_transaction("expire_manual_review", || async move {
                let step = self.require_step(key).await?;
                transition::check_expirable(&step.value)?;
                let summary = self.require_summary(&step.value.submission_key).await?;

                let change = transition::expire_step(step.value, summary.value, self.clock.now())?;
                let expired = change.step.clone();
                let batch = self
                    .stage(
                        WriteBatch::new(),
                        change,
                        Some(step.version),
                        Some(summary.version),
                    )
                    .await?;
                self.repo.commit(batch).await?;
                Ok(expired)
            })
            .await?;

        info!("Expired review step {}", key);
        incr(&self.counters.steps_expired);
        self.record(
            &step.submission_key,
            ReviewEventType::StepExpired {
                evaluator: step.evaluator.clone(),
            },
        )
        .await;
        Ok(step.key)
    }

    /// Expire every automatic assignment of `unit_id` untouched for `window`.
    ///
    /// A step that fails to expire is reported in `failed`; the sweep goes on.
    pub async fn expire_old_manual_reviews_for_unit(
        &self,
        window: Duration,
        unit_id: &UnitId,
    ) -> Result<ExpiryReport, ReviewError> {
        let cutoff = self.clock.now() - window;
        let stale = self
            .repo
            .list_steps(&StepQuery {
                unit_id: Some(unit_id.clone()),
                state: Some(ReviewState::Assigned),
                assigner_kind: Some(AssignerKind::Auto),
                removed: Some(false),
                changed_before: Some(cutoff),
                order: StepOrder::ChangeDate,
                ..Default::default()
            })
            .await?;

        let mut report = ExpiryReport::default();
        for step in stale {
            match self.expire_manual_review(&step.key).await {
                Ok(key) => report.expired.push(key),
                Err(e) => {
                    error!("Failed to expire review step {}: {}", step.key, e);
                    report.failed.push(step.key);
                }
            }
        }
        Ok(report)
    }

    /// Automatically assign the evaluator a submission of `unit_id`.
    ///
    /// Candidates are drawn at random from the highest-priority summaries so
    /// that concurrent evaluators rarely contend for the same one.
    pub async fn get_new_manual_review(
        &self,
        unit_id: &UnitId,
        evaluator: &EvaluatorId,
    ) -> Result<StepKey, ReviewError> {
        unit_id.validate()?;
        evaluator.validate()?;
        let mut candidates: Vec<ManualEvaluationSummary> = self
            .repo
            .list_summaries(&SummaryQuery {
                unit_id: Some(unit_id.clone()),
                order: SummaryOrder::AssignmentPriority,
                limit: Some(self.settings.candidate_count),
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|s| s.value)
            .filter(|s| !evaluator.is_same_user(&s.reviewee_key))
            .collect();

        let mut retries = 0;
        loop {
            if candidates.is_empty() || retries >= self.settings.max_retries {
                incr(&self.counters.auto_assign_not_assignable);
                return Err(ReviewError::NotAssignable {
                    unit_id: unit_id.clone(),
                    evaluator: evaluator.clone(),
                });
            }

            let index = self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..candidates.len());
            let candidate = candidates.swap_remove(index);

            match self.try_auto_assign(&candidate, evaluator).await {
                Ok(Ok(key)) => {
                    info!("Auto-assigned {} to {}", evaluator, candidate.submission_key);
                    incr(&self.counters.auto_assigned);
                    self.record(
                        &candidate.submission_key,
                        ReviewEventType::EvaluatorAssigned {
                            evaluator: evaluator.clone(),
                            assigner_kind: AssignerKind::Auto,
                        },
                    )
                    .await;
                    return Ok(key);
                }
                Ok(Err(reason)) => {
                    debug!("Skipping {}: {:?}", candidate.submission_key, reason);
                    match reason {
                        SkipReason::SummaryChanged => {
                            incr(&self.counters.auto_assign_summary_changed)
                        }
                        _ => incr(&self.counters.auto_assign_skipped),
                    }
                    retries += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Candidate {} changed while assigning: {}",
                        candidate.submission_key, e
                    );
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One assignment attempt. `Ok(Err(_))` means the candidate was passed over.
    async fn try_auto_assign(
        &self,
        candidate: &ManualEvaluationSummary,
        evaluator: &EvaluatorId,
    ) -> Result<Result<StepKey, SkipReason>, ReviewError> {
        let summary = self.require_summary(&candidate.submission_key).await?;
        if summary.value.change_date != candidate.change_date {
            return Ok(Err(SkipReason::SummaryChanged));
        }

        let step_key = candidate.submission_ref().step_key(evaluator);
        let step = self.repo.get_step(&step_key).await?;
        let step_version = step.as_ref().map(|s| s.version);

        let change = match transition::auto_assign(
            step.map(|s| s.value),
            summary.value,
            evaluator,
            self.clock.now(),
        ) {
            AutoAssignment::Assigned(change) => change,
            AutoAssignment::Skipped(reason) => return Ok(Err(reason)),
        };

        let batch = self
            .stage(WriteBatch::new(), change, step_version, Some(summary.version))
            .await?;
        self.repo.commit(batch).await?;
        Ok(Ok(step_key))
    }

    /// Save review contents, completing the step when `mark_completed` is set.
    ///
    /// Completing the last open step of a submission recomputes the student's
    /// final score for the unit.
    pub async fn write_manual_review(
        &self,
        key: &StepKey,
        contents: ReviewContents,
    ) -> Result<WriteOutcome, ReviewError> {
        let contents = &contents;
        let step = self
            .in_transaction("write_manual_review", || async move {
                let step = self.require_step(key).await?;
                if step.value.removed {
                    return Err(ReviewError::Removed { step: key.clone() });
                }
                let summary = if transition::write_needs_summary(&step.value, contents) {
                    self.repo.get_summary(&step.value.submission_key).await?
                } else {
                    None
                };
                let summary_version = summary.as_ref().map(|s| s.version);

                let change = transition::write_review(
                    step.value,
                    summary.map(|s| s.value),
                    contents.clone(),
                    self.clock.now(),
                )?;
                let written = change.step.clone();
                let batch = self
                    .stage(WriteBatch::new(), change, Some(step.version), summary_version)
                    .await?;
                self.repo.commit(batch).await?;
                Ok(written)
            })
            .await?;

        let completed = step.state == ReviewState::Completed;
        info!("Saved review {} (completed: {})", key, completed);
        incr(&self.counters.reviews_written);
        self.record(
            &step.submission_key,
            ReviewEventType::ReviewWritten {
                evaluator: step.evaluator.clone(),
                completed,
            },
        )
        .await;

        let final_score = if completed {
            self.update_final_score(&step.submission_ref()).await?
        } else {
            None
        };
        Ok(WriteOutcome { step, final_score })
    }

    /// Recompute and store the final score of a fully reviewed submission.
    ///
    /// Returns `None` while any unremoved step is still open, when nothing has
    /// been completed, or when the student record is missing.
    pub async fn update_final_score(
        &self,
        target: &SubmissionRef,
    ) -> Result<Option<f64>, ReviewError> {
        let steps = self
            .repo
            .list_steps(&StepQuery {
                submission_key: Some(target.submission_key.clone()),
                removed: Some(false),
                ..Default::default()
            })
            .await?;
        if steps.iter().any(|s| s.is_open()) {
            return Ok(None);
        }

        let scores: Vec<f64> = steps
            .iter()
            .filter(|s| s.state == ReviewState::Completed)
            .map(|s| s.score)
            .collect();
        let method = self
            .repo
            .get_unit(&target.unit_id)
            .await?
            .map(|u| u.scoring_method)
            .unwrap_or(ScoringMethod::Average);
        let Some(score) = calculate_final_score(&scores, method) else {
            return Ok(None);
        };

        let stored = self
            .in_transaction("update_final_score", || async move {
                let Some(Versioned {
                    value: mut student,
                    version,
                }) = self.repo.get_student(&target.reviewee_key).await?
                else {
                    return Ok(false);
                };
                student.scores.insert(target.unit_id.clone(), score);
                self.repo
                    .commit(WriteBatch::new().student(student, Some(version)))
                    .await?;
                Ok(true)
            })
            .await?;

        if !stored {
            warn!(
                "No student record for {}; final score {} for {} not stored",
                target.reviewee_key, score, target.unit_id
            );
            return Ok(None);
        }

        info!(
            "Final score for {} on {} is {}",
            target.reviewee_key, target.unit_id, score
        );
        incr(&self.counters.final_scores_set);
        self.record(&target.submission_key, ReviewEventType::FinalScoreSet { score })
            .await;
        Ok(Some(score))
    }

    // =========================================================================
    // Evaluator selection
    // =========================================================================

    /// Staff eligible to review `reviewee`, least loaded first.
    ///
    /// With `evaluator_id` only that staff member is considered.
    pub async fn find_evaluators(
        &self,
        reviewee: &StudentKey,
        evaluator_id: Option<&EvaluatorId>,
        exclude: &[EvaluatorId],
    ) -> Result<Vec<CourseStaff>, ReviewError> {
        let mut staff: Vec<CourseStaff> = match evaluator_id {
            Some(id) => self
                .repo
                .get_staff(id)
                .await?
                .map(|s| s.value)
                .into_iter()
                .collect(),
            None => self.repo.list_staff().await?,
        };

        staff.retain(|s| {
            s.can_grade && !s.user_id.is_same_user(reviewee) && !exclude.contains(&s.user_id)
        });
        staff.sort_by(|a, b| {
            a.workload()
                .cmp(&b.workload())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(staff)
    }

    /// Assign evaluators until the unit's `num_reviewers` unremoved, unexpired
    /// steps exist. Evaluators already holding a step are passed over.
    ///
    /// With `evaluator_id` that evaluator is added regardless of the count.
    /// When nobody qualifies the submission is still made assignable.
    pub async fn find_and_add_evaluator(
        &self,
        target: &SubmissionRef,
        evaluator_id: Option<&EvaluatorId>,
        exclude: &[EvaluatorId],
    ) -> Result<AssignmentOutcome, ReviewError> {
        target.validate()?;
        if let Some(id) = evaluator_id {
            id.validate()?;
        }
        let unit = self
            .repo
            .get_unit(&target.unit_id)
            .await?
            .ok_or_else(|| ReviewError::not_found(format!("unit {}", target.unit_id)))?;

        let candidates = self
            .find_evaluators(&target.reviewee_key, evaluator_id, exclude)
            .await?;
        if candidates.is_empty() {
            match self.start_review_process_for(target).await {
                Ok(_) | Err(ReviewError::AlreadyStarted(_)) => {}
                Err(e) => return Err(e),
            }
            info!("No evaluators available for {}", target.submission_key);
            return Ok(AssignmentOutcome::NoEvaluators);
        }

        let steps = self
            .repo
            .list_steps(&StepQuery {
                submission_key: Some(target.submission_key.clone()),
                removed: Some(false),
                ..Default::default()
            })
            .await?;
        // Expired steps keep their evaluator out but no longer count as a review.
        let live = steps
            .iter()
            .filter(|s| s.state != ReviewState::Expired)
            .count();
        let holders: BTreeSet<EvaluatorId> = steps.into_iter().map(|s| s.evaluator).collect();

        let wanted = if evaluator_id.is_some() {
            1
        } else {
            (unit.num_reviewers as usize).saturating_sub(live)
        };

        let mut added = Vec::new();
        for staff in candidates {
            if added.len() >= wanted {
                break;
            }
            if holders.contains(&staff.user_id) {
                continue;
            }
            self.add_evaluator(target, &staff.user_id, None).await?;
            added.push(staff.user_id);
        }

        if added.is_empty() {
            return Ok(AssignmentOutcome::AlreadyAssigned);
        }
        Ok(AssignmentOutcome::Assigned { evaluators: added })
    }

    /// Route a submission to evaluators unless it already has open work.
    pub async fn submit_for_evaluation(
        &self,
        target: &SubmissionRef,
        evaluator_id: Option<&EvaluatorId>,
    ) -> Result<AssignmentOutcome, ReviewError> {
        target.validate()?;
        if let Some(summary) = self.repo.get_summary(&target.submission_key).await? {
            if summary.value.assigned_count() > 0 {
                return Ok(AssignmentOutcome::AlreadyAssigned);
            }
        }
        self.find_and_add_evaluator(target, evaluator_id, &[]).await
    }

    /// Store a student's submission and send it for evaluation.
    pub async fn record_submission(
        &self,
        unit_id: &UnitId,
        reviewee: &StudentKey,
        contents: serde_json::Value,
    ) -> Result<(SubmissionKey, AssignmentOutcome), ReviewError> {
        unit_id.validate()?;
        reviewee.validate()?;
        if self.repo.get_unit(unit_id).await?.is_none() {
            return Err(ReviewError::not_found(format!("unit {}", unit_id)));
        }
        let target = SubmissionRef::new(unit_id.clone(), reviewee.clone());
        self.repo
            .put_submission(Submission {
                key: target.submission_key.clone(),
                unit_id: target.unit_id.clone(),
                reviewee_key: target.reviewee_key.clone(),
                contents,
                submitted_at: self.clock.now(),
            })
            .await?;

        let outcome = self.submit_for_evaluation(&target, None).await?;
        Ok((target.submission_key, outcome))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Keys of every step `evaluator` holds for `unit_id`, removed ones included.
    pub async fn get_review_step_keys_by(
        &self,
        unit_id: &UnitId,
        evaluator: &EvaluatorId,
    ) -> Result<Vec<StepKey>, ReviewError> {
        let steps = self
            .repo
            .list_steps(&StepQuery {
                unit_id: Some(unit_id.clone()),
                evaluator: Some(evaluator.clone()),
                order: StepOrder::CreateDate,
                limit: Some(MAX_STEP_KEYS),
                ..Default::default()
            })
            .await?;
        Ok(steps.into_iter().map(|s| s.key).collect())
    }

    /// The submission of `reviewee` for `unit_id` and the keys of all its steps.
    pub async fn get_submission_and_step_keys(
        &self,
        unit_id: &UnitId,
        reviewee: &StudentKey,
    ) -> Result<Option<(SubmissionKey, Vec<StepKey>)>, ReviewError> {
        let key = SubmissionKey::new(unit_id, reviewee);
        if self.repo.get_submission(&key).await?.is_none() {
            return Ok(None);
        }
        let steps = self
            .repo
            .list_steps(&StepQuery {
                submission_key: Some(key.clone()),
                ..Default::default()
            })
            .await?;
        Ok(Some((key, steps.into_iter().map(|s| s.key).collect())))
    }

    /// Steps for `keys`, position by position.
    pub async fn get_steps_by_keys(
        &self,
        keys: &[StepKey],
    ) -> Result<Vec<Option<ManualEvaluationStep>>, ReviewError> {
        let mut steps = Vec::with_capacity(keys.len());
        for key in keys {
            steps.push(self.repo.get_step(key).await?.map(|s| s.value));
        }
        Ok(steps)
    }

    pub async fn get_step(&self, key: &StepKey) -> Result<ManualEvaluationStep, ReviewError> {
        Ok(self.require_step(key).await?.value)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Create or update a staff member. Workload counters are kept.
    pub async fn upsert_staff(
        &self,
        user_id: &EvaluatorId,
        request: &UpsertStaffRequest,
    ) -> Result<CourseStaff, ReviewError> {
        user_id.validate()?;
        self.in_transaction("upsert_staff", || async move {
            let existing = self.repo.get_staff(user_id).await?;
            let version = existing.as_ref().map(|s| s.version);
            let mut staff = existing
                .map(|s| s.value)
                .unwrap_or_else(|| CourseStaff::new(user_id.clone(), request.email.clone()));
            staff.email = request.email.clone();
            staff.can_grade = request.can_grade;
            staff.can_override = request.can_override;

            self.repo
                .commit(WriteBatch::new().staff(staff.clone(), version))
                .await?;
            Ok(staff)
        })
        .await
    }

    pub async fn put_unit(
        &self,
        unit_id: &UnitId,
        request: &UpsertUnitRequest,
    ) -> Result<ReviewUnit, ReviewError> {
        unit_id.validate()?;
        if request.num_reviewers == 0 {
            return Err(ReviewError::Constraint(
                "num_reviewers must be at least 1".to_string(),
            ));
        }
        let unit = ReviewUnit {
            unit_id: unit_id.clone(),
            title: request.title.clone(),
            num_reviewers: request.num_reviewers,
            scoring_method: request.scoring_method,
        };
        self.repo.put_unit(unit.clone()).await?;
        Ok(unit)
    }

    /// Create or update a student record. Final scores are kept.
    pub async fn upsert_student(
        &self,
        key: &StudentKey,
        email: &str,
    ) -> Result<Student, ReviewError> {
        key.validate()?;
        self.in_transaction("upsert_student", || async move {
            let existing = self.repo.get_student(key).await?;
            let version = existing.as_ref().map(|s| s.version);
            let mut student = existing.map(|s| s.value).unwrap_or_else(|| Student {
                key: key.clone(),
                email: email.to_string(),
                scores: Default::default(),
            });
            student.email = email.to_string();

            self.repo
                .commit(WriteBatch::new().student(student.clone(), version))
                .await?;
            Ok(student)
        })
        .await
    }

    /// Reset a staff member's counters to a recount of their steps.
    ///
    /// Returns whether anything changed.
    pub async fn recount_staff(&self, user_id: &EvaluatorId) -> Result<bool, ReviewError> {
        self.in_transaction("recount_staff", || async move {
            let Some(Versioned {
                value: mut staff,
                version,
            }) = self.repo.get_staff(user_id).await?
            else {
                return Err(ReviewError::not_found(format!("course staff {}", user_id)));
            };
            let steps = self
                .repo
                .list_steps(&StepQuery {
                    evaluator: Some(user_id.clone()),
                    removed: Some(false),
                    ..Default::default()
                })
                .await?;

            let num_assigned = steps.len() as i64;
            let num_graded = steps
                .iter()
                .filter(|s| s.state == ReviewState::Completed)
                .count() as i64;
            if staff.num_assigned == num_assigned && staff.num_graded == num_graded {
                return Ok(false);
            }

            info!(
                "Recounted {}: num_assigned {} -> {}, num_graded {} -> {}",
                user_id, staff.num_assigned, num_assigned, staff.num_graded, num_graded
            );
            staff.num_assigned = num_assigned;
            staff.num_graded = num_graded;
            self.repo
                .commit(WriteBatch::new().staff(staff, Some(version)))
                .await?;
            Ok(true)
        })
        .await
    }
}
