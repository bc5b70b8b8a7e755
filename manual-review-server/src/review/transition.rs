//! Pure step transitions.
//!
//! Each function takes the records read inside one transaction and returns the
//! records to write back. Nothing here touches storage, so every counter rule
//! can be tested directly. The summary is always adjusted in pairs
//! (decrement the old state, increment the new one), and the evaluator delta
//! keeps `num_assigned`/`num_graded` equal to a recount of unremoved steps.

use chrono::{DateTime, Utc};
use manual_review_core::{AssignerKind, EvaluatorId, ReviewState};

use super::entity::{CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, SubmissionRef};
use super::error::ReviewError;

/// Adjustment to an evaluator's counters that accompanies a step change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaffDelta {
    pub num_assigned: i64,
    pub num_graded: i64,
}

impl StaffDelta {
    pub fn is_zero(&self) -> bool {
        self.num_assigned == 0 && self.num_graded == 0
    }

    pub fn apply(&self, staff: &mut CourseStaff) {
        staff.num_assigned = (staff.num_assigned + self.num_assigned).max(0);
        staff.num_graded = (staff.num_graded + self.num_graded).max(0);
    }
}

/// Records to write after a step transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StepChange {
    pub step: ManualEvaluationStep,
    /// `None` when the summary's counters are unaffected.
    pub summary: Option<ManualEvaluationSummary>,
    pub staff: StaffDelta,
}

/// Why an automatic assignment attempt passed over a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The summary changed since the candidate list was read.
    SummaryChanged,
    /// The evaluator already completed this submission once.
    AlreadyCompleted,
    /// The evaluator already holds a live step for this submission.
    AlreadyAssigned,
    /// The summary is full.
    CountLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoAssignment {
    Assigned(StepChange),
    Skipped(SkipReason),
}

fn touch(summary: &mut ManualEvaluationSummary, now: DateTime<Utc>) {
    summary.change_date = now;
}

/// Move the summary's count for one step from `before` to `after`.
fn recount(
    summary: &mut ManualEvaluationSummary,
    before: ReviewState,
    after: ReviewState,
) -> Result<(), ReviewError> {
    summary.decrement_count(before);
    summary.increment_count(after)
}

/// Human assignment of `evaluator` to a submission.
///
/// Creates the step (and the summary if needed), reactivates an expired or
/// completed step, or un-removes a removed one. The step always ends up
/// `HUMAN`-assigned.
pub fn add_evaluator(
    existing: Option<ManualEvaluationStep>,
    summary: Option<ManualEvaluationSummary>,
    target: &SubmissionRef,
    evaluator: &EvaluatorId,
    drive_permission_list: Option<String>,
    now: DateTime<Utc>,
) -> Result<StepChange, ReviewError> {
    let Some(mut step) = existing else {
        let mut summary = summary.unwrap_or_else(|| ManualEvaluationSummary::new(target, now));
        summary.increment_count(ReviewState::Assigned)?;
        touch(&mut summary, now);

        let mut step = ManualEvaluationStep::assigned(target, evaluator, AssignerKind::Human, now);
        step.drive_permission_list = drive_permission_list;
        return Ok(StepChange {
            step,
            summary: Some(summary),
            staff: StaffDelta {
                num_assigned: 1,
                num_graded: 0,
            },
        });
    };

    let Some(mut summary) = summary else {
        return Err(ReviewError::Constraint(format!(
            "step {} has no summary {}",
            step.key, step.submission_key
        )));
    };

    let mut staff = StaffDelta::default();
    let mut summary_changed = true;

    if step.removed {
        step.removed = false;
        staff.num_assigned += 1;
        if step.state == ReviewState::Expired {
            step.state = ReviewState::Assigned;
        }
        if step.state == ReviewState::Completed {
            staff.num_graded += 1;
        }
        summary.increment_count(step.state)?;
    } else {
        match step.state {
            ReviewState::Expired => {
                recount(&mut summary, ReviewState::Expired, ReviewState::Assigned)?;
                step.state = ReviewState::Assigned;
            }
            ReviewState::Completed => {
                recount(&mut summary, ReviewState::Completed, ReviewState::Assigned)?;
                step.state = ReviewState::Assigned;
                staff.num_graded -= 1;
            }
            ReviewState::Assigned | ReviewState::InProgress => summary_changed = false,
        }
    }

    step.assigner_kind = AssignerKind::Human;
    if drive_permission_list.is_some() {
        step.drive_permission_list = drive_permission_list;
    }
    step.change_date = now;

    let summary = if summary_changed {
        touch(&mut summary, now);
        Some(summary)
    } else {
        None
    };
    Ok(StepChange {
        step,
        summary,
        staff,
    })
}

/// Machine assignment of `evaluator` to the submission `summary` tracks.
///
/// Never fails: anything that prevents assignment is reported as a skip so the
/// caller can move on to the next candidate.
pub fn auto_assign(
    existing: Option<ManualEvaluationStep>,
    mut summary: ManualEvaluationSummary,
    evaluator: &EvaluatorId,
    now: DateTime<Utc>,
) -> AutoAssignment {
    let step = match existing {
        None => ManualEvaluationStep::assigned(
            &summary.submission_ref(),
            evaluator,
            AssignerKind::Auto,
            now,
        ),
        Some(step) if step.state == ReviewState::Completed => {
            return AutoAssignment::Skipped(SkipReason::AlreadyCompleted);
        }
        Some(mut step) if step.removed => {
            step.removed = false;
            step.assigner_kind = AssignerKind::Auto;
            step.state = ReviewState::Assigned;
            step.change_date = now;
            step
        }
        Some(_) => return AutoAssignment::Skipped(SkipReason::AlreadyAssigned),
    };

    if summary.increment_count(ReviewState::Assigned).is_err() {
        return AutoAssignment::Skipped(SkipReason::CountLimit);
    }
    touch(&mut summary, now);

    AutoAssignment::Assigned(StepChange {
        step,
        summary: Some(summary),
        staff: StaffDelta {
            num_assigned: 1,
            num_graded: 0,
        },
    })
}

/// Soft-delete a step. Removing twice is an error.
pub fn remove_step(
    mut step: ManualEvaluationStep,
    mut summary: ManualEvaluationSummary,
    now: DateTime<Utc>,
) -> Result<StepChange, ReviewError> {
    if step.removed {
        return Err(ReviewError::Removed { step: step.key });
    }

    let staff = StaffDelta {
        num_assigned: -1,
        num_graded: if step.state == ReviewState::Completed {
            -1
        } else {
            0
        },
    };

    step.removed = true;
    step.change_date = now;
    summary.decrement_count(step.state);
    touch(&mut summary, now);

    Ok(StepChange {
        step,
        summary: Some(summary),
        staff,
    })
}

/// Check that a step may be expired, before its summary is read.
pub fn check_expirable(step: &ManualEvaluationStep) -> Result<(), ReviewError> {
    if step.removed {
        return Err(ReviewError::Removed {
            step: step.key.clone(),
        });
    }
    if !step.state.is_open() {
        return Err(ReviewError::Transition {
            step: step.key.clone(),
            before: step.state,
            after: ReviewState::Expired,
        });
    }
    Ok(())
}

/// `ASSIGNED|IN_PROGRESS -> EXPIRED`.
pub fn expire_step(
    mut step: ManualEvaluationStep,
    mut summary: ManualEvaluationSummary,
    now: DateTime<Utc>,
) -> Result<StepChange, ReviewError> {
    check_expirable(&step)?;

    recount(&mut summary, step.state, ReviewState::Expired)?;
    step.state = ReviewState::Expired;
    step.change_date = now;
    touch(&mut summary, now);

    Ok(StepChange {
        step,
        summary: Some(summary),
        staff: StaffDelta::default(),
    })
}

/// The review contents to store on a step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewContents {
    pub comments: Option<String>,
    pub score: Option<f64>,
    pub mark_completed: bool,
}

/// Whether `write_review` needs the step's summary.
///
/// Only a state change that moves between counters does: completing a step,
/// or reopening an expired one.
pub fn write_needs_summary(step: &ManualEvaluationStep, contents: &ReviewContents) -> bool {
    match step.state {
        ReviewState::Completed => false,
        ReviewState::Expired => true,
        ReviewState::Assigned | ReviewState::InProgress => contents.mark_completed,
    }
}

/// Store review contents and advance the step.
///
/// A completed step only has its contents replaced (re-evaluation). Otherwise
/// the step moves to `COMPLETED` when `mark_completed` is set, or to
/// `IN_PROGRESS`.
pub fn write_review(
    mut step: ManualEvaluationStep,
    summary: Option<ManualEvaluationSummary>,
    contents: ReviewContents,
    now: DateTime<Utc>,
) -> Result<StepChange, ReviewError> {
    if step.removed {
        return Err(ReviewError::Removed { step: step.key });
    }

    let needs_summary = write_needs_summary(&step, &contents);

    step.comments = contents.comments;
    if let Some(score) = contents.score {
        step.score = score;
    }
    step.change_date = now;

    if step.state == ReviewState::Completed {
        return Ok(StepChange {
            step,
            summary: None,
            staff: StaffDelta::default(),
        });
    }

    let after = if contents.mark_completed {
        ReviewState::Completed
    } else {
        ReviewState::InProgress
    };

    if !needs_summary {
        step.state = after;
        return Ok(StepChange {
            step,
            summary: None,
            staff: StaffDelta::default(),
        });
    }

    let Some(mut summary) = summary else {
        return Err(ReviewError::Constraint(format!(
            "no summary {} for step {}",
            step.submission_key, step.key
        )));
    };

    recount(&mut summary, step.state, after)?;
    step.state = after;
    touch(&mut summary, now);

    let staff = StaffDelta {
        num_assigned: 0,
        num_graded: if after == ReviewState::Completed { 1 } else { 0 },
    };
    Ok(StepChange {
        step,
        summary: Some(summary),
        staff,
    })
}
