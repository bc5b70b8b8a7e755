//! The manual review subsystem.
//!
//! A `ManualEvaluationStep` records one evaluator's review of one submission;
//! a `ManualEvaluationSummary` counts the states of all steps of that
//! submission. `transition` holds the pure state changes, `Manager` runs them
//! transactionally against a `ReviewRepository`.

pub mod clock;
pub mod counters;
pub mod entity;
pub mod error;
pub mod manager;
pub mod repository;
pub mod transition;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counters::CounterSnapshot;
pub use entity::{
    CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, ReviewUnit, Student, Submission,
    SubmissionRef, MAX_UNREMOVED_REVIEW_STEPS,
};
pub use error::ReviewError;
pub use manager::{AssignmentSettings, ExpiryReport, Manager, WriteOutcome};
pub use repository::{
    InMemoryRepository, RepositoryError, ReviewEvent, ReviewRepository, SqliteRepository,
};
pub use transition::ReviewContents;
