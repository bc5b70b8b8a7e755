//! Handlers for the admin API under `/api` and the job triggers under `/cron`.
//!
//! Every handler checks the bearer token before looking at its body.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use manual_review_core::{
    AssignRequest, AssignmentOutcome, EvaluatorId, NextReviewRequest, StepKey, StepKeyResponse,
    StudentKey, SubmitRequest, SubmitResponse, UnitId, UpsertStaffRequest, UpsertStudentRequest,
    UpsertUnitRequest, WriteReviewRequest, WriteReviewResponse,
};
use std::sync::Arc;

use crate::auth::validate_auth;
use crate::error::ApiError;
use crate::jobs::{run_job, Job, JobReport};
use crate::review::{
    CourseStaff, ManualEvaluationStep, ReviewContents, ReviewUnit, Student, SubmissionRef,
};
use crate::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Unwrap a JSON body, turning axum's rejection into a 400 with our error shape.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Handler: PUT /api/staff/:user_id
pub async fn put_staff(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    payload: Result<Json<UpsertStaffRequest>, JsonRejection>,
) -> ApiResult<CourseStaff> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let staff = state
        .manager
        .upsert_staff(&EvaluatorId::from(user_id), &request)
        .await?;
    Ok(Json(staff))
}

/// Handler: PUT /api/units/:unit_id
pub async fn put_unit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(unit_id): Path<String>,
    payload: Result<Json<UpsertUnitRequest>, JsonRejection>,
) -> ApiResult<ReviewUnit> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let unit = state
        .manager
        .put_unit(&UnitId::from(unit_id), &request)
        .await?;
    Ok(Json(unit))
}

/// Handler: PUT /api/students/:key
pub async fn put_student(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    payload: Result<Json<UpsertStudentRequest>, JsonRejection>,
) -> ApiResult<Student> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let student = state
        .manager
        .upsert_student(&StudentKey::from(key), &request.email)
        .await?;
    Ok(Json(student))
}

/// Handler: POST /api/submissions
pub async fn post_submission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<SubmitResponse> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let (submission_key, outcome) = state
        .manager
        .record_submission(&request.unit_id, &request.reviewee_key, request.contents)
        .await?;
    Ok(Json(SubmitResponse {
        submission_key,
        outcome,
    }))
}

/// Handler: POST /api/assign
///
/// An explicit `evaluator_id` adds that evaluator even when the submission
/// already has its reviewers.
pub async fn post_assign(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<AssignmentOutcome> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let target = SubmissionRef::new(request.unit_id, request.reviewee_key);
    let outcome = match &request.evaluator_id {
        Some(evaluator) => {
            state
                .manager
                .find_and_add_evaluator(&target, Some(evaluator), &[])
                .await?
        }
        None => state.manager.submit_for_evaluation(&target, None).await?,
    };
    Ok(Json(outcome))
}

/// Handler: POST /api/steps/:key/remove
pub async fn remove_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<StepKeyResponse> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let step_key = state
        .manager
        .delete_manual_evaluator(&StepKey::from(key))
        .await?;
    Ok(Json(StepKeyResponse { step_key }))
}

/// Handler: POST /api/steps/:key/expire
pub async fn expire_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<StepKeyResponse> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let step_key = state
        .manager
        .expire_manual_review(&StepKey::from(key))
        .await?;
    Ok(Json(StepKeyResponse { step_key }))
}

/// Handler: POST /api/steps/:key/review
pub async fn write_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    payload: Result<Json<WriteReviewRequest>, JsonRejection>,
) -> ApiResult<WriteReviewResponse> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    if request.score.is_some_and(|s| !s.is_finite()) {
        return Err(ApiError::BadRequest("score must be a finite number".to_string()));
    }
    let contents = ReviewContents {
        comments: request.comments,
        score: request.score,
        mark_completed: request.mark_completed,
    };
    let outcome = state
        .manager
        .write_manual_review(&StepKey::from(key), contents)
        .await?;
    Ok(Json(WriteReviewResponse {
        step_key: outcome.step.key,
        final_score: outcome.final_score,
    }))
}

/// Handler: GET /api/steps/:key
pub async fn get_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<ManualEvaluationStep> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let step = state.manager.get_step(&StepKey::from(key)).await?;
    Ok(Json(step))
}

/// Handler: POST /api/reviews/next
pub async fn next_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NextReviewRequest>, JsonRejection>,
) -> ApiResult<StepKeyResponse> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let request = body(payload)?;
    let step_key = state
        .manager
        .get_new_manual_review(&request.unit_id, &request.evaluator_id)
        .await?;
    Ok(Json(StepKeyResponse { step_key }))
}

/// Handler: GET /api/evaluators/:id/units/:unit_id/steps
///
/// Every step the evaluator holds for the unit, removed ones included.
pub async fn evaluator_steps(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((evaluator, unit_id)): Path<(String, String)>,
) -> ApiResult<Vec<ManualEvaluationStep>> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let keys = state
        .manager
        .get_review_step_keys_by(&UnitId::from(unit_id), &EvaluatorId::from(evaluator))
        .await?;
    let steps = state.manager.get_steps_by_keys(&keys).await?;
    Ok(Json(steps.into_iter().flatten().collect()))
}

/// Handler: POST /cron/manual_review/:job
pub async fn run_cron_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job): Path<String>,
) -> ApiResult<JobReport> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let job: Job = job.parse().map_err(ApiError::BadRequest)?;
    let report = run_job(&state.manager, job, state.review_window).await?;
    Ok(Json(report))
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/staff/:user_id", put(put_staff))
        .route("/api/units/:unit_id", put(put_unit))
        .route("/api/students/:key", put(put_student))
        .route("/api/submissions", post(post_submission))
        .route("/api/assign", post(post_assign))
        .route("/api/steps/:key", get(get_step))
        .route("/api/steps/:key/remove", post(remove_step))
        .route("/api/steps/:key/expire", post(expire_step))
        .route("/api/steps/:key/review", post(write_review))
        .route("/api/reviews/next", post(next_review))
        .route(
            "/api/evaluators/:id/units/:unit_id/steps",
            get(evaluator_steps),
        )
        .route("/cron/manual_review/:job", post(run_cron_job))
}
