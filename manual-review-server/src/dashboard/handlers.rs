//! HTTP handlers for the dashboard API.
//!
//! These handlers provide JSON APIs for querying units, staff workloads and
//! submission events, as well as serving the dashboard HTML.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use manual_review_core::{
    AssignerKind, EvaluatorId, ReviewState, StepKey, StudentKey, SubmissionKey, UnitId,
};
use serde::{Deserialize, Serialize};

use crate::auth::validate_auth;
use crate::error::ApiError;
use crate::review::repository::{StepQuery, SummaryQuery};
use crate::review::{CourseStaff, ManualEvaluationStep, ReviewError};
use crate::status::{StatusData, UnitStatusEntry};
use crate::AppState;

/// Maximum number of events to return per submission.
const MAX_EVENTS_PER_SUBMISSION: usize = 100;

/// API response for the unit list endpoint.
#[derive(Debug, Serialize)]
pub struct UnitsApiResponse {
    pub version: String,
    pub units: Vec<UnitStatusEntry>,
}

/// A step as shown on the dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub step_key: StepKey,
    pub submission_key: SubmissionKey,
    pub reviewee_key: StudentKey,
    pub unit_id: UnitId,
    pub evaluator: EvaluatorId,
    pub state: ReviewState,
    pub assigner_kind: AssignerKind,
    pub removed: bool,
    pub score: f64,
    pub created_at: i64,
    pub changed_at: i64,
}

impl From<ManualEvaluationStep> for StepResponse {
    fn from(step: ManualEvaluationStep) -> Self {
        Self {
            step_key: step.key,
            submission_key: step.submission_key,
            reviewee_key: step.reviewee_key,
            unit_id: step.unit_id,
            evaluator: step.evaluator,
            state: step.state,
            assigner_kind: step.assigner_kind,
            removed: step.removed,
            score: step.score,
            created_at: step.create_date.timestamp(),
            changed_at: step.change_date.timestamp(),
        }
    }
}

/// A submission waiting for an evaluator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedResponse {
    pub submission_key: SubmissionKey,
    pub reviewee_key: StudentKey,
    pub completed_count: u32,
    pub expired_count: u32,
    pub created_at: i64,
}

/// API response for one unit's review view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReviewsApiResponse {
    pub version: String,
    pub unit_id: UnitId,
    pub title: String,
    pub num_reviewers: u32,
    pub assigned: Vec<StepResponse>,
    pub removed: Vec<StepResponse>,
    pub unassigned: Vec<UnassignedResponse>,
}

#[derive(Debug, Deserialize)]
pub struct UnitReviewsQuery {
    pub evaluator_id: Option<String>,
}

/// A staff member with their current workload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffResponse {
    pub user_id: EvaluatorId,
    pub email: String,
    pub can_grade: bool,
    pub can_override: bool,
    pub num_assigned: i64,
    pub num_graded: i64,
    pub workload: i64,
}

impl From<CourseStaff> for StaffResponse {
    fn from(staff: CourseStaff) -> Self {
        let workload = staff.workload();
        Self {
            user_id: staff.user_id,
            email: staff.email,
            can_grade: staff.can_grade,
            can_override: staff.can_override,
            num_assigned: staff.num_assigned,
            num_graded: staff.num_graded,
            workload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StaffApiResponse {
    pub version: String,
    pub staff: Vec<StaffResponse>,
}

/// One evaluator's steps, grouped by unit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffDetailApiResponse {
    pub staff: StaffResponse,
    pub units: BTreeMap<UnitId, Vec<StepResponse>>,
}

/// API response for the submission events endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEventsApiResponse {
    pub submission_key: SubmissionKey,
    pub assigned_count: Option<u32>,
    pub completed_count: Option<u32>,
    pub expired_count: Option<u32>,
    pub events: Vec<EventResponse>,
}

/// Single event in the timeline.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: i64,
    pub event_type: super::types::ReviewEventType,
    pub recorded_at: i64,
}

/// Handler: GET /dashboard
///
/// The page holds no data itself; its script asks for the token and calls the
/// API, so it is served without authentication.
pub async fn get_dashboard_html() -> impl IntoResponse {
    Html(include_str!("dashboard.html"))
}

/// Handler: GET /dashboard/api/units
pub async fn get_units_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UnitsApiResponse>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let data = StatusData::collect(&state.manager, crate::get_service_version()).await?;
    Ok(Json(UnitsApiResponse {
        version: data.version,
        units: data.units,
    }))
}

/// Handler: GET /dashboard/api/units/:unit_id/reviews
///
/// Open and completed steps, removed steps and submissions waiting for an
/// evaluator. `evaluator_id` narrows the step lists to one evaluator.
pub async fn get_unit_reviews_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(unit_id): Path<String>,
    Query(query): Query<UnitReviewsQuery>,
) -> Result<Json<UnitReviewsApiResponse>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;

    let unit_id = UnitId::from(unit_id);
    let repo = state.manager.repository();
    let unit = repo
        .get_unit(&unit_id)
        .await?
        .ok_or_else(|| ReviewError::NotFound(format!("unit {}", unit_id)))?;

    let steps = repo
        .list_steps(&StepQuery {
            unit_id: Some(unit_id.clone()),
            evaluator: query.evaluator_id.map(EvaluatorId::from),
            ..Default::default()
        })
        .await?;
    let (removed, assigned): (Vec<_>, Vec<_>) = steps.into_iter().partition(|s| s.removed);

    let unassigned = repo
        .list_summaries(&SummaryQuery {
            unit_id: Some(unit_id.clone()),
            without_open_steps: true,
            ..Default::default()
        })
        .await?
        .into_iter()
        .map(|s| UnassignedResponse {
            submission_key: s.value.submission_key.clone(),
            reviewee_key: s.value.reviewee_key.clone(),
            completed_count: s.value.completed_count(),
            expired_count: s.value.expired_count(),
            created_at: s.value.create_date.timestamp(),
        })
        .collect();

    Ok(Json(UnitReviewsApiResponse {
        version: crate::get_service_version(),
        unit_id,
        title: unit.title,
        num_reviewers: unit.num_reviewers,
        assigned: assigned.into_iter().map(StepResponse::from).collect(),
        removed: removed.into_iter().map(StepResponse::from).collect(),
        unassigned,
    }))
}

/// Handler: GET /dashboard/api/staff
pub async fn get_staff_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StaffApiResponse>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let staff = state.manager.repository().list_staff().await?;
    Ok(Json(StaffApiResponse {
        version: crate::get_service_version(),
        staff: staff.into_iter().map(StaffResponse::from).collect(),
    }))
}

/// Handler: GET /dashboard/api/staff/:user_id
pub async fn get_staff_detail_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<StaffDetailApiResponse>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;

    let user_id = EvaluatorId::from(user_id);
    let repo = state.manager.repository();
    let staff = repo
        .get_staff(&user_id)
        .await?
        .ok_or_else(|| ReviewError::NotFound(format!("course staff {}", user_id)))?;

    let steps = repo
        .list_steps(&StepQuery {
            evaluator: Some(user_id),
            removed: Some(false),
            ..Default::default()
        })
        .await?;
    let mut units: BTreeMap<UnitId, Vec<StepResponse>> = BTreeMap::new();
    for step in steps {
        units
            .entry(step.unit_id.clone())
            .or_default()
            .push(step.into());
    }

    Ok(Json(StaffDetailApiResponse {
        staff: staff.value.into(),
        units,
    }))
}

/// Handler: GET /dashboard/api/submissions/:key/events
pub async fn get_submission_events_api(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<SubmissionEventsApiResponse>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;

    let submission_key = SubmissionKey::from(key);
    let repo = state.manager.repository();
    let events = repo
        .get_events(&submission_key, MAX_EVENTS_PER_SUBMISSION)
        .await?;
    let summary = repo.get_summary(&submission_key).await?.map(|s| s.value);

    let events = events
        .into_iter()
        .map(|e| EventResponse {
            id: e.id,
            event_type: e.event_type,
            recorded_at: e.recorded_at.timestamp(),
        })
        .collect();

    Ok(Json(SubmissionEventsApiResponse {
        submission_key,
        assigned_count: summary.as_ref().map(|s| s.assigned_count()),
        completed_count: summary.as_ref().map(|s| s.completed_count()),
        expired_count: summary.as_ref().map(|s| s.expired_count()),
        events,
    }))
}

pub fn dashboard_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/api/units", get(get_units_api))
        .route(
            "/dashboard/api/units/:unit_id/reviews",
            get(get_unit_reviews_api),
        )
        .route("/dashboard/api/staff", get(get_staff_api))
        .route("/dashboard/api/staff/:user_id", get(get_staff_detail_api))
        .route(
            "/dashboard/api/submissions/:key/events",
            get(get_submission_events_api),
        )
}
