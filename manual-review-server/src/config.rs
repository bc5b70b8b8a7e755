use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::review::AssignmentSettings;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Bearer token for every endpoint except `/health`, `/help` and `/dashboard`.
    /// If not set, those endpoints are disabled (503).
    pub admin_auth_token: Option<String>,
    /// Age after which an untouched automatic assignment expires.
    pub review_window: chrono::Duration,
    /// Period of the background job loop. `None` disables it.
    pub job_interval: Option<Duration>,
    pub assignment: AssignmentSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let admin_auth_token = parse_admin_auth_token(env::var("ADMIN_AUTH_TOKEN").ok());

        let review_window_mins = env::var("REVIEW_WINDOW_MINS")
            .unwrap_or_else(|_| "1440".to_string())
            .parse::<i64>()
            .context("REVIEW_WINDOW_MINS must be a valid number")?;
        if review_window_mins <= 0 {
            anyhow::bail!("REVIEW_WINDOW_MINS must be positive");
        }

        let job_interval = parse_job_interval(
            &env::var("JOB_INTERVAL_SECS").unwrap_or_else(|_| "3600".to_string()),
        )?;

        let candidate_count = env::var("CANDIDATE_COUNT")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<usize>()
            .context("CANDIDATE_COUNT must be a valid number")?;

        let max_retries = env::var("MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<usize>()
            .context("MAX_RETRIES must be a valid number")?;

        Ok(Config {
            port,
            state_dir,
            admin_auth_token,
            review_window: chrono::Duration::minutes(review_window_mins),
            job_interval,
            assignment: AssignmentSettings {
                candidate_count,
                max_retries,
            },
        })
    }
}

/// Parse ADMIN_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so a blank variable never opens the API to unauthenticated requests.
pub fn parse_admin_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse JOB_INTERVAL_SECS. Zero disables the background loop.
pub fn parse_job_interval(value: &str) -> Result<Option<Duration>> {
    let secs = value
        .trim()
        .parse::<u64>()
        .context("JOB_INTERVAL_SECS must be a valid number")?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
