//! HTTP request handlers.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use super::rate_limit::rate_limit_middleware;
use super::request_id::request_id_middleware;
use super::types::{
    AuditRunRequest, AuditRunResponse, AuditStatusResponse, ErrorResponse, HealthResponse,
    MarkLoggedInResponse, OpenLoginResponse, SessionStartRequest, SessionStartResponse,
};
use super::AppState;
use crate::audit::types::AuditStatus;
use crate::audit::{adapter, report, runner};
use crate::evidence::create_evidence_zip;
use crate::pdf::render_report_pdf;
use crate::sanitize::validate_url;

/// Create the API router. Everything except `/health` is rate limited;
/// every response carries a request id.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/:id/open-login", get(open_login))
        .route("/api/sessions/:id/mark-logged-in", post(mark_logged_in))
        .route("/api/audits/run", post(run_audit))
        .route("/api/audits/:id/status", get(audit_status))
        .route("/api/audits/:id/preview.jpg", get(audit_preview))
        .route("/api/audits/:id/result", get(audit_result))
        .route("/api/audits/:id/pdf", get(audit_pdf))
        .route("/api/audits/:id/evidence.zip", get(audit_evidence))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

// ============================================================
// Health
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: state.settings.app_version.clone(),
        active_sessions: state.sessions.active_count(),
    })
}

// ============================================================
// Sessions
// ============================================================

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<SessionStartRequest>,
) -> Result<Json<SessionStartResponse>, AppError> {
    validate_url(&request.url, state.settings.allow_private_ips)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let session = state
        .sessions
        .create(request.url.trim())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    info!(session_id = %session.session_id, url = %session.url, "Session created");

    Ok(Json(SessionStartResponse {
        session_id: session.session_id,
        status: session.status,
        ttl_minutes: state.settings.session_ttl_minutes,
        message: "Session created. Use /api/sessions/{id}/open-login to start manual login."
            .to_string(),
    }))
}

async fn open_login(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<OpenLoginResponse>, AppError> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound("Session not found or expired".to_string()))?;

    state
        .browser
        .create_login_context(&session)
        .await
        .map_err(|e| {
            error!(session_id, error = %e, "Failed to open login page");
            AppError::Internal(format!("Failed to open browser: {e}"))
        })?;

    Ok(Json(OpenLoginResponse {
        ok: true,
        message: "Browser window opened. Complete login and click 'I'm logged in' in the UI."
            .to_string(),
    }))
}

async fn mark_logged_in(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MarkLoggedInResponse>, AppError> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound("Session not found or expired".to_string()))?;

    state
        .browser
        .save_storage_state(&session)
        .await
        .map_err(|e| {
            error!(session_id, error = %e, "Failed to mark logged in");
            AppError::Internal(format!("Failed to save session: {e}"))
        })?;

    state.sessions.mark_authenticated(&session_id);

    // The login context has served its purpose; audits get a fresh one.
    state.browser.close_context(&session_id).await;

    Ok(Json(MarkLoggedInResponse {
        ok: true,
        message: "Session authenticated. Ready to run audit.".to_string(),
    }))
}

// ============================================================
// Audits
// ============================================================

async fn run_audit(
    State(state): State<AppState>,
    Json(request): Json<AuditRunRequest>,
) -> Result<Json<AuditRunResponse>, AppError> {
    let session = state
        .sessions
        .get(&request.session_id)
        .ok_or_else(|| AppError::NotFound("Session not found or expired".to_string()))?;

    if !session.is_authenticated {
        return Err(AppError::Precondition(
            "Session not authenticated. Complete login first.".to_string(),
        ));
    }

    validate_url(&request.url, state.settings.allow_private_ips)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    request.options.validate().map_err(AppError::Validation)?;

    let audit = state
        .audits
        .create(&request.session_id, request.url.trim(), request.options)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tokio::spawn(runner::run_audit(
        state.settings.clone(),
        state.audits.clone(),
        state.browser.clone(),
        session,
        audit.audit_id.clone(),
    ));

    info!(audit_id = %audit.audit_id, session_id = %request.session_id, "Started audit");

    Ok(Json(AuditRunResponse {
        audit_id: audit.audit_id,
        status: AuditStatus::Queued,
        message: "Audit started. Poll /api/audits/{id}/status for progress.".to_string(),
    }))
}

async fn audit_status(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Json<AuditStatusResponse>, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound("Audit not found".to_string()))?;

    let partial_findings = if audit.console_errors.is_empty() && audit.network_failures.is_empty()
    {
        None
    } else {
        Some(json!({
            "console_errors_count": audit.console_errors.len(),
            "network_failures_count": audit.network_failures.len(),
            "pages_visited": audit.visited_urls.len(),
        }))
    };

    Ok(Json(AuditStatusResponse {
        audit_id,
        status: audit.status,
        progress: audit.progress,
        partial_findings,
        error_message: audit.error_message,
    }))
}

async fn audit_preview(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Response, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound("Audit not found".to_string()))?;

    let path = audit
        .preview_image_path
        .ok_or_else(|| AppError::NotFound("Preview not ready".to_string()))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NotFound("Preview not ready".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
        ],
        bytes,
    )
        .into_response())
}

async fn audit_result(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound("Audit not found".to_string()))?;

    match audit.status {
        AuditStatus::Done => {}
        AuditStatus::Error => {
            let message = audit.error_message.as_deref().unwrap_or("unknown error");
            return Err(AppError::Internal(format!("Audit failed: {message}")));
        }
        status => {
            return Err(AppError::Precondition(format!(
                "Audit not complete. Status: {}",
                status.as_str()
            )));
        }
    }

    let report = report::build(&audit);
    Ok(Json(adapter::to_frontend_result(&report)))
}

async fn audit_pdf(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Response, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound("Audit not found".to_string()))?;
    if audit.status != AuditStatus::Done {
        return Err(AppError::Precondition("Audit not complete".to_string()));
    }

    let report = report::build(&audit);
    let bytes = render_report_pdf(&report).map_err(AppError::Internal)?;

    let disposition = format!("attachment; filename=audit-report-{}.pdf", short_id(&audit_id));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn audit_evidence(
    State(state): State<AppState>,
    Path(audit_id): Path<String>,
) -> Result<Response, AppError> {
    let audit = state
        .audits
        .get(&audit_id)
        .ok_or_else(|| AppError::NotFound("Audit not found".to_string()))?;
    if audit.status != AuditStatus::Done {
        return Err(AppError::Precondition("Audit not complete".to_string()));
    }

    let bytes = create_evidence_zip(&audit.artifacts_dir, &audit.screenshots)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let disposition = format!("attachment; filename=evidence-{}.zip", short_id(&audit_id));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ============================================================
// Error Handling
// ============================================================

pub enum AppError {
    Validation(String),
    NotFound(String),
    Precondition(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Precondition(msg) => (StatusCode::BAD_REQUEST, "precondition", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        (status, Json(ErrorResponse::new(kind, message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_state(mutate: impl FnOnce(&mut Settings)) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            artifacts_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        mutate(&mut settings);
        (AppState::new(Arc::new(settings)), dir)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value, request_id)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_path(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_active_sessions() {
        let (state, _dir) = test_state(|_| {});
        state.sessions.create("https://example.test/").unwrap();
        let router = create_router(state);

        let (status, body, request_id) = send(router, get_path("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(request_id.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn start_session_validates_the_url() {
        let (state, _dir) = test_state(|_| {});
        let router = create_router(state.clone());

        let (status, body, _) = send(
            router.clone(),
            post_json("/api/sessions/start", json!({"url": "http://127.0.0.1/"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body, _) = send(
            router,
            post_json("/api/sessions/start", json!({"url": "https://example.test/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");
        assert_eq!(body["ttl_minutes"], 30);
        assert!(body["session_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn private_urls_are_accepted_when_allowed() {
        let (state, _dir) = test_state(|s| s.allow_private_ips = true);
        let router = create_router(state);
        let (status, _, _) = send(
            router,
            post_json("/api/sessions/start", json!({"url": "http://127.0.0.1/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn run_audit_requires_a_live_session() {
        let (state, _dir) = test_state(|_| {});
        let router = create_router(state);
        let (status, body, _) = send(
            router,
            post_json(
                "/api/audits/run",
                json!({"session_id": "nope", "url": "https://example.test/"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Session not found or expired");
    }

    #[tokio::test]
    async fn run_audit_rejects_expired_sessions() {
        let (state, _dir) = test_state(|s| s.session_ttl_minutes = 0);
        let session = state.sessions.create("https://example.test/").unwrap();
        let router = create_router(state);

        let (status, body, _) = send(
            router,
            post_json(
                "/api/audits/run",
                json!({"session_id": session.session_id, "url": "https://example.test/"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Session not found or expired");
    }

    #[tokio::test]
    async fn run_audit_requires_authentication() {
        let (state, _dir) = test_state(|_| {});
        let session = state.sessions.create("https://example.test/").unwrap();
        let router = create_router(state);

        let (status, body, _) = send(
            router,
            post_json(
                "/api/audits/run",
                json!({"session_id": session.session_id, "url": "https://example.test/"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "precondition");
    }

    #[tokio::test]
    async fn run_audit_validates_options() {
        let (state, _dir) = test_state(|_| {});
        let session = state.sessions.create("https://example.test/").unwrap();
        state.sessions.mark_authenticated(&session.session_id);
        let router = create_router(state);

        let (status, body, _) = send(
            router,
            post_json(
                "/api/audits/run",
                json!({
                    "session_id": session.session_id,
                    "url": "https://example.test/",
                    "options": {"max_pages": 0}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "max_pages must be between 1 and 100");
    }

    #[tokio::test]
    async fn accepted_audit_without_storage_state_ends_in_error() {
        let (state, _dir) = test_state(|_| {});
        let session = state.sessions.create("https://example.test/").unwrap();
        state.sessions.mark_authenticated(&session.session_id);
        let router = create_router(state.clone());

        let (status, body, _) = send(
            router,
            post_json(
                "/api/audits/run",
                json!({"session_id": session.session_id, "url": "https://example.test/"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        let audit_id = body["audit_id"].as_str().unwrap().to_string();

        // The background task fails fast: no storage state was captured.
        for _ in 0..50 {
            if state.audits.get(&audit_id).unwrap().status == AuditStatus::Error {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let audit = state.audits.get(&audit_id).unwrap();
        assert_eq!(audit.status, AuditStatus::Error);
        assert!(audit.error_message.is_some());
        assert_eq!(audit.progress.stage, "error");
        assert_eq!(audit.progress.percent, 0);
        assert!(audit.finished_at.is_some());
    }

    #[tokio::test]
    async fn status_and_result_for_unknown_audit_are_404() {
        let (state, _dir) = test_state(|_| {});
        let router = create_router(state);
        let (status, _, _) = send(router.clone(), get_path("/api/audits/nope/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(router, get_path("/api/audits/nope/result")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn result_requires_completion() {
        let (state, _dir) = test_state(|_| {});
        let audit = state
            .audits
            .create("s", "https://example.test/", Default::default())
            .unwrap();
        let router = create_router(state.clone());

        let (status, body, _) = send(
            router.clone(),
            get_path(&format!("/api/audits/{}/result", audit.audit_id)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Audit not complete. Status: queued");

        state.audits.mark_error(&audit.audit_id, "browser exploded");
        let (status, body, _) = send(
            router.clone(),
            get_path(&format!("/api/audits/{}/result", audit.audit_id)),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Audit failed: browser exploded");
    }

    #[tokio::test]
    async fn completed_audit_serves_result_pdf_and_evidence() {
        let (state, _dir) = test_state(|_| {});
        let audit = state
            .audits
            .create("s", "https://example.test/", Default::default())
            .unwrap();
        state.audits.mark_running(&audit.audit_id);
        state.audits.mark_visited(&audit.audit_id, "https://example.test/");
        state.audits.mark_done(&audit.audit_id);
        let router = create_router(state);

        let (status, body, _) = send(
            router.clone(),
            get_path(&format!("/api/audits/{}/result", audit.audit_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overall_score"], 100);
        assert_eq!(body["grade"], "A");

        let response = router
            .clone()
            .oneshot(get_path(&format!("/api/audits/{}/pdf", audit.audit_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );

        let response = router
            .oneshot(get_path(&format!(
                "/api/audits/{}/evidence.zip",
                audit.audit_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    }

    #[tokio::test]
    async fn preview_is_404_until_a_frame_exists() {
        let (state, _dir) = test_state(|_| {});
        let audit = state
            .audits
            .create("s", "https://example.test/", Default::default())
            .unwrap();
        let router = create_router(state.clone());

        let (status, body, _) = send(
            router.clone(),
            get_path(&format!("/api/audits/{}/preview.jpg", audit.audit_id)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Preview not ready");

        let frame = state.settings.audit_dir(&audit.audit_id).join("preview_latest.jpg");
        std::fs::write(&frame, b"jpeg").unwrap();
        state.audits.set_preview(&audit.audit_id, frame);

        let response = router
            .oneshot(get_path(&format!(
                "/api/audits/{}/preview.jpg",
                audit.audit_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(response.headers()[header::CACHE_CONTROL].to_str().unwrap(), "no-store, no-cache, must-revalidate, max-age=0");
    }

    #[tokio::test]
    async fn rate_limit_rejects_after_the_limit_but_spares_health() {
        let (state, _dir) = test_state(|s| s.rate_limit_per_minute = 2);
        let router = create_router(state);

        for _ in 0..2 {
            let (status, _, _) = send(router.clone(), get_path("/api/audits/x/status")).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        let (status, body, _) = send(router.clone(), get_path("/api/audits/x/status")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert_eq!(body["retry_after_seconds"], 60);

        // Health is exempt.
        let (status, _, _) = send(router, get_path("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_clients_are_limited_separately() {
        let (state, _dir) = test_state(|s| s.rate_limit_per_minute = 1);
        let router = create_router(state);

        let request = |ip: &str| {
            Request::builder()
                .uri("/api/audits/x/status")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _, _) = send(router.clone(), request("203.0.113.1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(router.clone(), request("203.0.113.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, _, _) = send(router, request("203.0.113.2")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
