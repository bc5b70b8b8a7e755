//! The service's HTTP surface.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::api::api_router;
use crate::auth::validate_auth;
use crate::dashboard::dashboard_router;
use crate::error::ApiError;
use crate::jobs::Job;
use crate::status::StatusData;
use crate::AppState;

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "manual-review"
    }))
}

/// (method, path, description) of every route.
const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Health check"),
    ("GET", "/help", "This listing"),
    (
        "GET",
        "/status",
        "Step counts per unit and state, and operation counters",
    ),
    ("GET", "/dashboard", "Dashboard page"),
    ("GET", "/dashboard/api/units", "Units with step counts"),
    (
        "GET",
        "/dashboard/api/units/{unit_id}/reviews",
        "Assigned, removed and unassigned work of a unit; ?evaluator_id= narrows the steps",
    ),
    ("GET", "/dashboard/api/staff", "Course staff and workloads"),
    ("GET", "/dashboard/api/staff/{user_id}", "One evaluator's steps by unit"),
    (
        "GET",
        "/dashboard/api/submissions/{key}/events",
        "Review timeline of a submission",
    ),
    ("PUT", "/api/staff/{user_id}", "Create or update a staff member"),
    ("PUT", "/api/units/{unit_id}", "Create or update unit review settings"),
    ("PUT", "/api/students/{key}", "Create or update a student record"),
    (
        "POST",
        "/api/submissions",
        "Record a submission and send it for evaluation",
    ),
    ("POST", "/api/assign", "Assign evaluators to a submission"),
    ("GET", "/api/steps/{key}", "Read a review step"),
    ("POST", "/api/steps/{key}/remove", "Remove a review step"),
    ("POST", "/api/steps/{key}/expire", "Expire a review step"),
    ("POST", "/api/steps/{key}/review", "Save review contents"),
    ("POST", "/api/reviews/next", "Hand an evaluator a new submission"),
    (
        "GET",
        "/api/evaluators/{id}/units/{unit_id}/steps",
        "An evaluator's steps for a unit",
    ),
    ("POST", "/cron/manual_review/{job}", "Run a batch job"),
];

async fn help_handler() -> Json<serde_json::Value> {
    let version = crate::get_service_version();
    let endpoints: Vec<serde_json::Value> = ENDPOINTS
        .iter()
        .map(|(method, path, description)| {
            json!({ "method": method, "path": path, "description": description })
        })
        .collect();
    let jobs: Vec<&str> = Job::ALL.iter().map(|job| job.name()).collect();

    Json(json!({
        "service": "manual-review",
        "version": version,
        "description": "Assigns student submissions to course staff for manual review",
        "authentication": "Bearer ADMIN_AUTH_TOKEN, except /health, /help and /dashboard",
        "endpoints": endpoints,
        "jobs": jobs,
        "configuration": {
            "optional_env_vars": [
                "PORT (default: 3000)",
                "STATE_DIR (default: current directory)",
                "ADMIN_AUTH_TOKEN (unset disables the API)",
                "REVIEW_WINDOW_MINS (default: 1440)",
                "JOB_INTERVAL_SECS (default: 3600, 0 disables)",
                "CANDIDATE_COUNT (default: 20)",
                "MAX_RETRIES (default: 5)"
            ]
        }
    }))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusData>, ApiError> {
    validate_auth(&headers, &state.admin_auth_token)?;
    let data = StatusData::collect(&state.manager, crate::get_service_version()).await?;
    Ok(Json(data))
}

pub fn app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .merge(dashboard_router())
        .merge(api_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{AssignmentSettings, InMemoryRepository, Manager};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const TOKEN: &str = "secret";

    fn router(token: Option<&str>) -> Router {
        let repo = Arc::new(InMemoryRepository::new());
        let manager = Manager::new(repo, AssignmentSettings::default()).with_seed(3);
        app_router(Arc::new(AppState {
            manager: Arc::new(manager),
            admin_auth_token: token.map(str::to_string),
            review_window: chrono::Duration::hours(24),
        }))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let app = router(None);
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(body, @r#"
        {
          "service": "manual-review",
          "status": "healthy"
        }
        "#);
    }

    #[tokio::test]
    async fn test_help_lists_jobs() {
        let app = router(None);
        let req = Request::get("/help").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 6);
        assert!(jobs.contains(&Value::from("fix_num_assigned")));
    }

    #[tokio::test]
    async fn test_dashboard_page_is_public() {
        let app = router(None);
        let req = Request::get("/dashboard").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_disabled_without_token() {
        let app = router(None);
        let (status, body) = send(&app, request(Method::GET, "/status", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let app = router(Some("other"));
        let (status, _) = send(&app, request(Method::GET, "/dashboard/api/staff", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = router(Some(TOKEN));
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/api/units/u1")
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_job_is_bad_request() {
        let app = router(Some(TOKEN));
        let (status, body) =
            send(&app, request(Method::POST, "/cron/manual_review/reboot", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown job: reboot");
    }

    #[tokio::test]
    async fn test_review_flow_over_http() {
        let app = router(Some(TOKEN));

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                "/api/units/u1",
                Some(serde_json::json!({"title": "Essay", "num_reviewers": 1})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                "/api/staff/bob",
                Some(serde_json::json!({"email": "bob@example.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                "/api/students/alice",
                Some(serde_json::json!({"email": "alice@example.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                "/api/submissions",
                Some(serde_json::json!({"unit_id": "u1", "reviewee_key": "alice"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submission_key"], "u1:alice");
        assert_eq!(body["outcome"], "assigned");
        assert_eq!(body["evaluators"][0], "bob");

        let (status, body) =
            send(&app, request(Method::GET, "/api/steps/u1:alice:bob", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ASSIGNED");

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                "/api/steps/u1:alice:bob/review",
                Some(serde_json::json!({"score": 0.75, "mark_completed": true})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["final_score"], 0.75);

        // A completed step cannot expire.
        let (status, _) = send(
            &app,
            request(Method::POST, "/api/steps/u1:alice:bob/expire", None),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        let (status, body) = send(&app, request(Method::GET, "/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["steps"]["completed"], 1);
        assert_eq!(body["units"][0]["submissions"], 1);
        assert_eq!(body["counters"]["evaluators_added"], 1);
        assert_eq!(body["counters"]["reviews_written"], 1);
        assert_eq!(body["counters"]["final_scores_set"], 1);

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/evaluators/bob/units/u1/steps", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            request(
                Method::GET,
                "/dashboard/api/submissions/u1:alice/events",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["events"][0]["eventType"]["type"], "FinalScoreSet");
        assert_eq!(body["completedCount"], 1);

        let (status, body) =
            send(&app, request(Method::GET, "/dashboard/api/staff/bob", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["staff"]["numGraded"], 1);
        assert_eq!(body["units"]["u1"][0]["state"], "COMPLETED");

        let (status, _) = send(
            &app,
            request(Method::POST, "/api/steps/u1:alice:bob/remove", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            request(Method::POST, "/api/steps/u1:alice:bob/remove", None),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);

        let (status, body) = send(
            &app,
            request(Method::GET, "/dashboard/api/units/u1/reviews", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"].as_array().unwrap().len(), 1);
        assert_eq!(body["unassigned"][0]["submissionKey"], "u1:alice");
    }

    #[tokio::test]
    async fn test_ids_with_key_separators_are_bad_requests() {
        let app = router(Some(TOKEN));
        let unit = |title: &str| Some(serde_json::json!({"title": title, "num_reviewers": 1}));

        let (status, body) = send(&app, request(Method::PUT, "/api/units/a:b", unit("ab"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("a:b"));

        let (status, _) = send(&app, request(Method::PUT, "/api/units/a", unit("a"))).await;
        assert_eq!(status, StatusCode::OK);

        // Would share the key "a:b:c" with unit "a:b" and student "c".
        let (status, _) = send(
            &app,
            request(
                Method::POST,
                "/api/submissions",
                Some(serde_json::json!({"unit_id": "a", "reviewee_key": "b:c"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                "/api/students/b:c",
                Some(serde_json::json!({"email": "bc@example.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                "/api/staff/x:y",
                Some(serde_json::json!({"email": "xy@example.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request(
                Method::POST,
                "/api/assign",
                Some(serde_json::json!({"unit_id": "a", "reviewee_key": "b:c"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, request(Method::GET, "/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_submissions"], 0);
    }

    #[tokio::test]
    async fn test_next_review_without_work_is_not_found() {
        let app = router(Some(TOKEN));
        let (status, _) = send(
            &app,
            request(
                Method::POST,
                "/api/reviews/next",
                Some(serde_json::json!({"unit_id": "u1", "evaluator_id": "bob"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cron_job_returns_report() {
        let app = router(Some(TOKEN));
        let (status, body) = send(
            &app,
            request(Method::POST, "/cron/manual_review/fix_num_assigned", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(body, @r#"
        {
          "failed": 0,
          "job": "fix_num_assigned",
          "scanned": 0,
          "skipped": 0,
          "succeeded": 0
        }
        "#);
    }
}
