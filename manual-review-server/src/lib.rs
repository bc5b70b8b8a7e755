pub mod api;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod jobs;
pub mod review;
pub mod routes;
pub mod status;

use std::sync::Arc;

pub use error::ApiError;
pub use manual_review_core::get_service_version;
pub use review::Manager;

pub struct AppState {
    pub manager: Arc<Manager>,
    pub admin_auth_token: Option<String>,
    /// Age after which the expiry job expires an untouched automatic assignment.
    pub review_window: chrono::Duration,
}
