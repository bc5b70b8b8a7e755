//! In-process operation counters.
//!
//! Counters reset when the process restarts. The audit events are the durable
//! record; these only show what the running instance has been doing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! review_counters {
    ($($(#[$meta:meta])* $field:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct ReviewCounters {
            $(pub(crate) $field: AtomicU64,)*
        }

        /// Point-in-time copy of `ReviewCounters`, shown on `/status`.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct CounterSnapshot {
            $($(#[$meta])* pub $field: u64,)*
        }

        impl ReviewCounters {
            pub fn snapshot(&self) -> CounterSnapshot {
                CounterSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

review_counters!(
    /// Human assignments, including reactivated and un-removed steps.
    evaluators_added,
    steps_removed,
    steps_expired,
    /// Successful automatic assignments.
    auto_assigned,
    /// Candidates passed over because their summary changed after listing.
    auto_assign_summary_changed,
    /// Candidates passed over for any other reason.
    auto_assign_skipped,
    auto_assign_not_assignable,
    reviews_written,
    final_scores_set,
    /// Commit conflicts that were retried.
    transaction_retries,
    /// Operations that still conflicted after the last attempt.
    transaction_conflicts,
);

pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_every_counter() {
        let counters = ReviewCounters::default();
        incr(&counters.steps_expired);
        incr(&counters.steps_expired);
        incr(&counters.transaction_retries);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.steps_expired, 2);
        assert_eq!(snapshot.transaction_retries, 1);
        assert_eq!(
            snapshot,
            CounterSnapshot {
                steps_expired: 2,
                transaction_retries: 1,
                ..Default::default()
            }
        );
    }
}
