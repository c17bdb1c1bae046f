//! Per-request deadline.

use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Default upper bound for a whole request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Fail the request with 504 once `timeout` elapses.
///
/// The handler future is dropped on expiry, which cancels any store or cache
/// call still in flight. Work the handler spawned keeps running; registration
/// relies on this to finish notifying or roll back.
pub async fn request_deadline(
    State(timeout): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(%method, %path, timeout_secs = timeout.as_secs_f64(), "Request timed out");

            #[derive(Serialize)]
            struct ErrorResponse {
                error: &'static str,
            }

            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse {
                    error: "the server took too long to respond",
                }),
            )
                .into_response()
        }
    }
}
