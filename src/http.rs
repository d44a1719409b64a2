/*!
The `/healthz`, `/readyz` and `/metrics` HTTP surface (§6 "HTTP surface"), served with `axum`
the way `githedgehog-dataplane`'s stats server wires a Prometheus handle into a router.
*/
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Anything the readiness probe needs to poll. Implemented separately by the state and history
/// pipelines' broker handles and by the shared DB pool so `http` doesn't depend on their types.
pub trait ReadinessCheck: Send + Sync {
    fn db_ready(&self) -> bool;
    fn state_consumer_joined(&self) -> bool;
    fn history_consumer_joined(&self) -> bool;
}

#[derive(Clone)]
struct AppState {
    metrics_handle: PrometheusHandle,
    readiness: Arc<dyn ReadinessCheck>,
}

pub fn router(metrics_handle: PrometheusHandle, readiness: Arc<dyn ReadinessCheck>) -> Router {
    let state = AppState {
        metrics_handle,
        readiness,
    };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn readyz(State(state): State<AppState>) -> Response {
    let db_ok = state.readiness.db_ready();
    let state_joined = state.readiness.state_consumer_joined();
    let history_joined = state.readiness.history_consumer_joined();
    let ready = db_ok && state_joined && history_joined;

    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "checks": {
            "db": db_ok,
            "state_consumer_joined": state_joined,
            "history_consumer_joined": history_joined,
        }
    });
    if ready {
        (axum::http::StatusCode::OK, Json(body)).into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    ([("content-type", "text/plain; version=1.0.0; charset=utf-8")], state.metrics_handle.render())
        .into_response()
}

/// Serves `router` on `addr` until `shutdown` is cancelled (§5 "Cancellation").
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
