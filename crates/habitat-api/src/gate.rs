//! Kill-switch gate for mutating requests

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::{ApiResponse, AppState};

/// Paths that stay writable while the kill switch is engaged
const ALWAYS_OPEN: [&str; 4] = ["/health", "/api/v1/health", "/api/v1/kill", "/api/v1/events"];

/// Whether a request must be rejected while the kill switch is active
pub fn is_guarded(method: &Method, path: &str) -> bool {
    let mutating = matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    mutating
        && !ALWAYS_OPEN
            .iter()
            .any(|open| path == *open || path.starts_with(&format!("{open}/")))
}

/// Reject mutating requests with `423 Locked` while the kill switch is active
pub async fn kill_switch_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_guarded(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    match state.engine.mutation_allowed().await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::warn!(
                "Rejected {} {}: kill switch active",
                request.method(),
                request.uri().path()
            );
            (
                StatusCode::LOCKED,
                Json(ApiResponse::error(
                    "Kill switch is active; mutating operations are disabled",
                )),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Kill switch state unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}
