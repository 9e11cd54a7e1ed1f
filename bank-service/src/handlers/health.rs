use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::metrics::get_metrics;
use crate::AppState;

/// Liveness plus the request/reply engine's view of the broker. Reports 503
/// once the reply dispatcher has stopped, since nothing reconnects it.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let rpc = state.authorizer.rpc();
    let (status, label) = if rpc.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(json!({
            "status": label,
            "service": state.config.service_name,
            "version": state.config.service_version,
            "broker": {
                "connected": !rpc.is_closed(),
                "pending_calls": rpc.pending_calls(),
                "unclaimed_replies": rpc.unclaimed_replies(),
            }
        })),
    )
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
