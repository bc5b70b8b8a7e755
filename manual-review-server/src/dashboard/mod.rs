//! Dashboard module for inspecting review assignments.
//!
//! This module provides:
//! - Event types for per-submission timelines
//! - API endpoints for units, staff and submission events
//! - An embedded HTML dashboard

pub mod handlers;
pub mod types;

pub use handlers::dashboard_router;
