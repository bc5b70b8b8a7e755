//! SQLite implementation of `ReviewRepository`.
//!
//! Each record is stored as JSON next to the columns that queries filter and
//! order by. Mutable records carry a `version` column; `commit` checks every
//! expected version and writes the batch inside one SQLite transaction.
//!
//! # Schema Versioning
//!
//! The `schema_version` table records the schema the file was written with.
//! To change the schema, bump `CURRENT_SCHEMA_VERSION` and add a step to
//! `run_migrations()`. A database newer than this binary is refused.
//!
//! # Forward Compatibility
//!
//! New entity fields need `#[serde(default)]` so rows written by older builds
//! still deserialize.

mod events;


use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use manual_review_core::{EvaluatorId, StepKey, StudentKey, SubmissionKey, UnitId};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{
    RepositoryError, ReviewEvent, ReviewRepository, StepOrder, StepQuery, SummaryOrder,
    SummaryQuery, Versioned, WriteBatch,
};
use crate::review::entity::{
    CourseStaff, ManualEvaluationStep, ManualEvaluationSummary, ReviewUnit, Student, Submission,
};

/// Current schema version. Bump together with a new step in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed review repository.
///
/// rusqlite is synchronous, so every call runs on `spawn_blocking` against a
/// shared connection.
pub struct SqliteRepository {
    /// Exposed to tests so they can plant corrupt rows.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and migrate it.
    ///
    /// The connection runs in WAL mode with `synchronous = FULL` and a
    /// 5 second busy timeout.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RepositoryError::storage(
                        "create database directory",
                        format!("{}: {}", parent.display(), e),
                    )
                })?;

                // The directory also holds the WAL and SHM files.
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Err(e) =
                        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                    {
                        warn!("Failed to restrict permissions on state directory: {}", e);
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path_ref, std::fs::Permissions::from_mode(0o600))
            {
                warn!("Failed to restrict permissions on database file: {}", e);
            }
        }

        // Some filesystems silently keep DELETE mode; in-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned journal mode '{}' instead of 'wal'; \
                     the review database requires WAL mode",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // v1: review records
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS review_summaries (
                    submission_key TEXT PRIMARY KEY,
                    unit_id TEXT NOT NULL,
                    reviewee_key TEXT NOT NULL,
                    assigned_count INTEGER NOT NULL,
                    completed_count INTEGER NOT NULL,
                    expired_count INTEGER NOT NULL,
                    create_date INTEGER NOT NULL,
                    summary_json TEXT NOT NULL,
                    version INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_summaries_priority
                    ON review_summaries(unit_id, completed_count, assigned_count, create_date);

                CREATE TABLE IF NOT EXISTS review_steps (
                    step_key TEXT PRIMARY KEY,
                    submission_key TEXT NOT NULL,
                    unit_id TEXT NOT NULL,
                    evaluator TEXT NOT NULL,
                    state TEXT NOT NULL,
                    assigner_kind TEXT NOT NULL,
                    removed INTEGER NOT NULL,
                    create_date INTEGER NOT NULL,
                    change_date INTEGER NOT NULL,
                    step_json TEXT NOT NULL,
                    version INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_steps_submission
                    ON review_steps(submission_key);
                CREATE INDEX IF NOT EXISTS idx_steps_evaluator
                    ON review_steps(evaluator, unit_id, create_date);
                CREATE INDEX IF NOT EXISTS idx_steps_expiry
                    ON review_steps(unit_id, assigner_kind, state, removed, change_date);

                CREATE TABLE IF NOT EXISTS course_staff (
                    user_id TEXT PRIMARY KEY,
                    staff_json TEXT NOT NULL,
                    version INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS students (
                    student_key TEXT PRIMARY KEY,
                    student_json TEXT NOT NULL,
                    version INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS submissions (
                    submission_key TEXT PRIMARY KEY,
                    unit_id TEXT NOT NULL,
                    submitted_at INTEGER NOT NULL,
                    submission_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_submissions_unit
                    ON submissions(unit_id, submitted_at);

                CREATE TABLE IF NOT EXISTS review_units (
                    unit_id TEXT PRIMARY KEY,
                    unit_json TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // v2: per-submission audit timeline for the dashboard
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS review_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    submission_key TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    event_data TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_review_events_lookup
                    ON review_events(submission_key, recorded_at DESC);
                CREATE INDEX IF NOT EXISTS idx_review_events_recent
                    ON review_events(recorded_at DESC);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// A fresh in-memory database.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

pub(super) fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub(super) fn from_micros(value: i64, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| RepositoryError::corruption(what))
}

fn version_to_i64(version: u64, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| {
        RepositoryError::storage(operation, format!("version {} exceeds i64::MAX", version))
    })
}

fn i64_to_version(value: i64, what: &str) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::corruption(what))
}

/// Convert a limit for a SQLite `LIMIT` clause; `None` becomes `-1` (no limit).
pub(super) fn limit_to_i64(
    limit: Option<usize>,
    operation: &'static str,
) -> Result<i64, RepositoryError> {
    match limit {
        None => Ok(-1),
        Some(n) => i64::try_from(n).map_err(|_| {
            RepositoryError::storage(operation, format!("limit {} exceeds i64::MAX", n))
        }),
    }
}

fn to_json<T: Serialize>(value: &T, operation: &'static str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::storage(operation, e.to_string()))
}

fn from_json<T: DeserializeOwned>(json: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(json).map_err(|_| RepositoryError::corruption(what))
}

/// Decode `(json, version)` rows, skipping any that are corrupt.
fn decode_versioned_rows<T: DeserializeOwned>(
    rows: Vec<(String, String, i64)>,
    kind: &str,
) -> Vec<Versioned<T>> {
    let mut results = Vec::with_capacity(rows.len());
    for (key, json, version) in rows {
        let decoded = from_json::<T>(&json, kind)
            .and_then(|value| Ok((value, i64_to_version(version, kind)?)));
        match decoded {
            Ok((value, version)) => results.push(Versioned { value, version }),
            Err(e) => {
                warn!(
                    "Skipping corrupt {} row {}: {}. It will be replaced on the next write.",
                    kind, key, e
                );
            }
        }
    }
    results
}

/// Read one `(json, version)` row by primary key.
fn get_versioned<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: &str,
    kind: &str,
    operation: &'static str,
) -> Result<Option<Versioned<T>>, RepositoryError> {
    let row: Option<(String, i64)> = conn
        .query_row(sql, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    match row {
        Some((json, version)) => Ok(Some(Versioned {
            value: from_json(&json, &format!("{} JSON for {}", kind, key))?,
            version: i64_to_version(version, kind)?,
        })),
        None => Ok(None),
    }
}

/// Fail with `Conflict` unless the stored version equals `expected`.
fn check_version(
    tx: &Transaction<'_>,
    sql: &str,
    key: &str,
    expected: Option<u64>,
    kind: &str,
) -> Result<i64, RepositoryError> {
    let current: Option<i64> = tx
        .query_row(sql, params![key], |row| row.get(0))
        .optional()
        .map_err(|e| RepositoryError::storage("commit version check", e.to_string()))?;
    let current = current.map(|v| i64_to_version(v, kind)).transpose()?;
    if current != expected {
        return Err(RepositoryError::conflict(format!("{} {}", kind, key)));
    }
    version_to_i64(expected.unwrap_or(0) + 1, "commit")
}

fn commit_batch(conn: &mut Connection, batch: WriteBatch) -> Result<(), RepositoryError> {
    let tx = conn
        .transaction()
        .map_err(|e| RepositoryError::storage("begin transaction", e.to_string()))?;

    for write in batch.summaries {
        let s = &write.value;
        let key = s.submission_key.as_str();
        let version = check_version(
            &tx,
            "SELECT version FROM review_summaries WHERE submission_key = ?1",
            key,
            write.expected_version,
            "summary",
        )?;
        tx.execute(
            "INSERT INTO review_summaries (submission_key, unit_id, reviewee_key, assigned_count,
                                           completed_count, expired_count, create_date,
                                           summary_json, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(submission_key) DO UPDATE SET
                 unit_id = excluded.unit_id,
                 reviewee_key = excluded.reviewee_key,
                 assigned_count = excluded.assigned_count,
                 completed_count = excluded.completed_count,
                 expired_count = excluded.expired_count,
                 create_date = excluded.create_date,
                 summary_json = excluded.summary_json,
                 version = excluded.version",
            params![
                key,
                s.unit_id.as_str(),
                s.reviewee_key.as_str(),
                s.assigned_count(),
                s.completed_count(),
                s.expired_count(),
                to_micros(s.create_date),
                to_json(s, "serialize summary")?,
                version
            ],
        )
        .map_err(|e| RepositoryError::storage("write summary", e.to_string()))?;
    }

    for write in batch.steps {
        let s = &write.value;
        let key = s.key.as_str();
        let version = check_version(
            &tx,
            "SELECT version FROM review_steps WHERE step_key = ?1",
            key,
            write.expected_version,
            "step",
        )?;
        tx.execute(
            "INSERT INTO review_steps (step_key, submission_key, unit_id, evaluator, state,
                                       assigner_kind, removed, create_date, change_date,
                                       step_json, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(step_key) DO UPDATE SET
                 submission_key = excluded.submission_key,
                 unit_id = excluded.unit_id,
                 evaluator = excluded.evaluator,
                 state = excluded.state,
                 assigner_kind = excluded.assigner_kind,
                 removed = excluded.removed,
                 create_date = excluded.create_date,
                 change_date = excluded.change_date,
                 step_json = excluded.step_json,
                 version = excluded.version",
            params![
                key,
                s.submission_key.as_str(),
                s.unit_id.as_str(),
                s.evaluator.as_str(),
                s.state.as_str(),
                s.assigner_kind.as_str(),
                s.removed,
                to_micros(s.create_date),
                to_micros(s.change_date),
                to_json(s, "serialize step")?,
                version
            ],
        )
        .map_err(|e| RepositoryError::storage("write step", e.to_string()))?;
    }

    for write in batch.staff {
        let key = write.value.user_id.as_str();
        let version = check_version(
            &tx,
            "SELECT version FROM course_staff WHERE user_id = ?1",
            key,
            write.expected_version,
            "staff",
        )?;
        tx.execute(
            "INSERT INTO course_staff (user_id, staff_json, version) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 staff_json = excluded.staff_json,
                 version = excluded.version",
            params![key, to_json(&write.value, "serialize staff")?, version],
        )
        .map_err(|e| RepositoryError::storage("write staff", e.to_string()))?;
    }

    for write in batch.students {
        let key = write.value.key.as_str();
        let version = check_version(
            &tx,
            "SELECT version FROM students WHERE student_key = ?1",
            key,
            write.expected_version,
            "student",
        )?;
        tx.execute(
            "INSERT INTO students (student_key, student_json, version) VALUES (?1, ?2, ?3)
             ON CONFLICT(student_key) DO UPDATE SET
                 student_json = excluded.student_json,
                 version = excluded.version",
            params![key, to_json(&write.value, "serialize student")?, version],
        )
        .map_err(|e| RepositoryError::storage("write student", e.to_string()))?;
    }

    // Dropping the transaction on any error above rolls it back.
    tx.commit()
        .map_err(|e| RepositoryError::storage("commit transaction", e.to_string()))
}

/// Collect `(key, json, version)` rows from a prepared query.
fn query_versioned_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    operation: &'static str,
) -> Result<Vec<(String, String, i64)>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))
}

// =============================================================================
// ReviewRepository trait implementation
// =============================================================================

#[async_trait]
impl ReviewRepository for SqliteRepository {
    async fn get_summary(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Versioned<ManualEvaluationSummary>>, RepositoryError> {
        let key = key.0.clone();
        self.with_conn("get_summary", move |conn| {
            get_versioned(
                conn,
                "SELECT summary_json, version FROM review_summaries WHERE submission_key = ?1",
                &key,
                "summary",
                "get_summary",
            )
        })
        .await
    }

    async fn get_step(
        &self,
        key: &StepKey,
    ) -> Result<Option<Versioned<ManualEvaluationStep>>, RepositoryError> {
        let key = key.0.clone();
        self.with_conn("get_step", move |conn| {
            get_versioned(
                conn,
                "SELECT step_json, version FROM review_steps WHERE step_key = ?1",
                &key,
                "step",
                "get_step",
            )
        })
        .await
    }

    async fn get_staff(
        &self,
        user_id: &EvaluatorId,
    ) -> Result<Option<Versioned<CourseStaff>>, RepositoryError> {
        let key = user_id.0.clone();
        self.with_conn("get_staff", move |conn| {
            get_versioned(
                conn,
                "SELECT staff_json, version FROM course_staff WHERE user_id = ?1",
                &key,
                "staff",
                "get_staff",
            )
        })
        .await
    }

    async fn get_student(
        &self,
        key: &StudentKey,
    ) -> Result<Option<Versioned<Student>>, RepositoryError> {
        let key = key.0.clone();
        self.with_conn("get_student", move |conn| {
            get_versioned(
                conn,
                "SELECT student_json, version FROM students WHERE student_key = ?1",
                &key,
                "student",
                "get_student",
            )
        })
        .await
    }

    async fn get_submission(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Submission>, RepositoryError> {
        let key = key.0.clone();
        self.with_conn("get_submission", move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT submission_json FROM submissions WHERE submission_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_submission", e.to_string()))?;
            json.map(|j| from_json(&j, "submission JSON")).transpose()
        })
        .await
    }

    async fn get_unit(&self, unit_id: &UnitId) -> Result<Option<ReviewUnit>, RepositoryError> {
        let key = unit_id.0.clone();
        self.with_conn("get_unit", move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT unit_json FROM review_units WHERE unit_id = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_unit", e.to_string()))?;
            json.map(|j| from_json(&j, "unit JSON")).transpose()
        })
        .await
    }

    async fn list_summaries(
        &self,
        query: &SummaryQuery,
    ) -> Result<Vec<Versioned<ManualEvaluationSummary>>, RepositoryError> {
        let unit_id = query.unit_id.as_ref().map(|u| u.0.clone());
        let without_open = query.without_open_steps;
        let with_completed = query.with_completed;
        let limit = limit_to_i64(query.limit, "list_summaries")?;
        let order = match query.order {
            SummaryOrder::AssignmentPriority => {
                "completed_count ASC, assigned_count ASC, create_date ASC, submission_key ASC"
            }
            SummaryOrder::CreateDate => "create_date ASC, submission_key ASC",
        };
        let sql = format!(
            "SELECT submission_key, summary_json, version FROM review_summaries
             WHERE (?1 IS NULL OR unit_id = ?1)
               AND (?2 = 0 OR assigned_count = 0)
               AND (?3 = 0 OR completed_count > 0)
             ORDER BY {}
             LIMIT ?4",
            order
        );

        let rows = self
            .with_conn("list_summaries", move |conn| {
                query_versioned_rows(
                    conn,
                    &sql,
                    params![unit_id, without_open, with_completed, limit],
                    "list_summaries",
                )
            })
            .await?;
        Ok(decode_versioned_rows(rows, "summary"))
    }

    async fn list_steps(
        &self,
        query: &StepQuery,
    ) -> Result<Vec<ManualEvaluationStep>, RepositoryError> {
        let unit_id = query.unit_id.as_ref().map(|u| u.0.clone());
        let evaluator = query.evaluator.as_ref().map(|e| e.0.clone());
        let submission_key = query.submission_key.as_ref().map(|k| k.0.clone());
        let state = query.state.map(|s| s.as_str());
        let assigner_kind = query.assigner_kind.map(|k| k.as_str());
        let removed = query.removed;
        let changed_before = query.changed_before.map(to_micros);
        let limit = limit_to_i64(query.limit, "list_steps")?;
        let order = match query.order {
            StepOrder::CreateDate => "create_date ASC, step_key ASC",
            StepOrder::ChangeDate => "change_date ASC, step_key ASC",
        };
        let sql = format!(
            "SELECT step_key, step_json, version FROM review_steps
             WHERE (?1 IS NULL OR unit_id = ?1)
               AND (?2 IS NULL OR evaluator = ?2)
               AND (?3 IS NULL OR submission_key = ?3)
               AND (?4 IS NULL OR state = ?4)
               AND (?5 IS NULL OR assigner_kind = ?5)
               AND (?6 IS NULL OR removed = ?6)
               AND (?7 IS NULL OR change_date <= ?7)
             ORDER BY {}
             LIMIT ?8",
            order
        );

        let rows = self
            .with_conn("list_steps", move |conn| {
                query_versioned_rows(
                    conn,
                    &sql,
                    params![
                        unit_id,
                        evaluator,
                        submission_key,
                        state,
                        assigner_kind,
                        removed,
                        changed_before,
                        limit
                    ],
                    "list_steps",
                )
            })
            .await?;
        Ok(decode_versioned_rows::<ManualEvaluationStep>(rows, "step")
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    async fn list_staff(&self) -> Result<Vec<CourseStaff>, RepositoryError> {
        let rows = self
            .with_conn("list_staff", |conn| {
                query_versioned_rows(
                    conn,
                    "SELECT user_id, staff_json, version FROM course_staff ORDER BY user_id",
                    [],
                    "list_staff",
                )
            })
            .await?;
        Ok(decode_versioned_rows::<CourseStaff>(rows, "staff")
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    async fn list_units(&self) -> Result<Vec<ReviewUnit>, RepositoryError> {
        let rows = self
            .with_conn("list_units", |conn| {
                query_versioned_rows(
                    conn,
                    "SELECT unit_id, unit_json, 0 FROM review_units ORDER BY unit_id",
                    [],
                    "list_units",
                )
            })
            .await?;
        Ok(decode_versioned_rows::<ReviewUnit>(rows, "unit")
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    async fn list_submissions(
        &self,
        unit_id: Option<&UnitId>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        let unit_id = unit_id.map(|u| u.0.clone());
        let rows = self
            .with_conn("list_submissions", move |conn| {
                query_versioned_rows(
                    conn,
                    "SELECT submission_key, submission_json, 0 FROM submissions
                     WHERE (?1 IS NULL OR unit_id = ?1)
                     ORDER BY submitted_at, submission_key",
                    params![unit_id],
                    "list_submissions",
                )
            })
            .await?;
        Ok(decode_versioned_rows::<Submission>(rows, "submission")
            .into_iter()
            .map(|v| v.value)
            .collect())
    }

    async fn put_unit(&self, unit: ReviewUnit) -> Result<(), RepositoryError> {
        let json = to_json(&unit, "serialize unit")?;
        self.with_conn("put_unit", move |conn| {
            conn.execute(
                "INSERT INTO review_units (unit_id, unit_json) VALUES (?1, ?2)
                 ON CONFLICT(unit_id) DO UPDATE SET unit_json = excluded.unit_json",
                params![unit.unit_id.as_str(), json],
            )
            .map_err(|e| RepositoryError::storage("put_unit", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn put_submission(&self, submission: Submission) -> Result<(), RepositoryError> {
        let json = to_json(&submission, "serialize submission")?;
        self.with_conn("put_submission", move |conn| {
            conn.execute(
                "INSERT INTO submissions (submission_key, unit_id, submitted_at, submission_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(submission_key) DO UPDATE SET
                     unit_id = excluded.unit_id,
                     submitted_at = excluded.submitted_at,
                     submission_json = excluded.submission_json",
                params![
                    submission.key.as_str(),
                    submission.unit_id.as_str(),
                    to_micros(submission.submitted_at),
                    json
                ],
            )
            .map_err(|e| RepositoryError::storage("put_submission", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.with_conn("commit", move |conn| commit_batch(conn, batch))
            .await
    }

    async fn log_event(&self, event: &ReviewEvent) -> Result<(), RepositoryError> {
        self.log_event_impl(event).await
    }

    async fn get_events(
        &self,
        submission_key: &SubmissionKey,
        limit: usize,
    ) -> Result<Vec<ReviewEvent>, RepositoryError> {
        self.get_events_impl(submission_key, limit).await
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<ReviewEvent>, RepositoryError> {
        self.get_recent_events_impl(limit).await
    }
}
