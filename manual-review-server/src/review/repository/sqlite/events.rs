//! Review timeline events for the SQLite repository.
//!
//! Events live in `review_events` with the variant name in `event_type` and
//! the full payload as JSON in `event_data`.

use rusqlite::{params, Connection};
use tracing::warn;

use super::super::{RepositoryError, ReviewEvent};
use super::{from_micros, limit_to_i64, to_micros, SqliteRepository};
use crate::dashboard::types::ReviewEventType;
use manual_review_core::SubmissionKey;

fn event_type_variant_name(event_type: &ReviewEventType) -> &'static str {
    match event_type {
        ReviewEventType::ReviewProcessStarted => "ReviewProcessStarted",
        ReviewEventType::EvaluatorAssigned { .. } => "EvaluatorAssigned",
        ReviewEventType::StepRemoved { .. } => "StepRemoved",
        ReviewEventType::StepExpired { .. } => "StepExpired",
        ReviewEventType::ReviewWritten { .. } => "ReviewWritten",
        ReviewEventType::FinalScoreSet { .. } => "FinalScoreSet",
    }
}

type EventRow = (i64, String, String, i64);

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    operation: &'static str,
) -> Result<Vec<ReviewEvent>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    let mut events = Vec::new();
    for row in rows {
        let (id, submission_key, event_data, recorded_at): EventRow =
            row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

        let decoded = serde_json::from_str::<ReviewEventType>(&event_data)
            .map_err(|_| RepositoryError::corruption("event_data JSON"))
            .and_then(|event_type| {
                Ok((event_type, from_micros(recorded_at, "event timestamp")?))
            });
        match decoded {
            Ok((event_type, recorded_at)) => events.push(ReviewEvent {
                id,
                submission_key: SubmissionKey::from(submission_key),
                event_type,
                recorded_at,
            }),
            Err(e) => warn!("Skipping review event {}: {}", id, e),
        }
    }
    Ok(events)
}

impl SqliteRepository {
    pub(super) async fn log_event_impl(&self, event: &ReviewEvent) -> Result<(), RepositoryError> {
        let submission_key = event.submission_key.0.clone();
        let recorded_at = to_micros(event.recorded_at);
        let event_json = serde_json::to_string(&event.event_type)
            .map_err(|e| RepositoryError::storage("log_event serialize", e.to_string()))?;
        let event_type_name = event_type_variant_name(&event.event_type);

        self.with_conn("log_event", move |conn| {
            conn.execute(
                "INSERT INTO review_events (submission_key, event_type, event_data, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![submission_key, event_type_name, event_json, recorded_at],
            )
            .map_err(|e| RepositoryError::storage("log_event", e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub(super) async fn get_events_impl(
        &self,
        submission_key: &SubmissionKey,
        limit: usize,
    ) -> Result<Vec<ReviewEvent>, RepositoryError> {
        let submission_key = submission_key.0.clone();
        let limit = limit_to_i64(Some(limit), "get_events")?;

        self.with_conn("get_events", move |conn| {
            query_events(
                conn,
                "SELECT id, submission_key, event_data, recorded_at
                 FROM review_events
                 WHERE submission_key = ?1
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?2",
                params![submission_key, limit],
                "get_events",
            )
        })
        .await
    }

    pub(super) async fn get_recent_events_impl(
        &self,
        limit: usize,
    ) -> Result<Vec<ReviewEvent>, RepositoryError> {
        let limit = limit_to_i64(Some(limit), "get_recent_events")?;

        self.with_conn("get_recent_events", move |conn| {
            query_events(
                conn,
                "SELECT id, submission_key, event_data, recorded_at
                 FROM review_events
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?1",
                params![limit],
                "get_recent_events",
            )
        })
        .await
    }
}
