//! Liveness, readiness and metrics endpoints.
//!
//! - `GET /healthz`: 200 while the process is up
//! - `GET /readyz`: 200 once every loop has applied its first full list
//! - `GET /metrics`: Prometheus text format

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use watch_engine::{EngineMetrics, LoopState, LoopStatus, ResourceKind};

/// Shared state of the HTTP handlers.
#[derive(Clone, Debug)]
pub struct HealthState {
    metrics: EngineMetrics,
    loops: Arc<Vec<(ResourceKind, watch::Receiver<LoopStatus>)>>,
}

impl HealthState {
    /// Track the given loop status channels.
    #[must_use]
    pub fn new(metrics: EngineMetrics, loops: Vec<(ResourceKind, watch::Receiver<LoopStatus>)>) -> Self {
        Self {
            metrics,
            loops: Arc::new(loops),
        }
    }

    /// Kinds that have not finished their first list, or have stopped.
    #[must_use]
    pub fn not_ready(&self) -> Vec<ResourceKind> {
        self.loops
            .iter()
            .filter(|(_, status)| {
                let status = status.borrow();
                !status.synced || status.state == LoopState::Stopped
            })
            .map(|(kind, _)| *kind)
            .collect()
    }
}

/// Build the router.
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `0.0.0.0:port` until `cancel` fires.
pub async fn serve(port: u16, state: HealthState, cancel: CancellationToken) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Health server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ControllerError::Http(e.to_string()))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, String) {
    let pending = state.not_ready();
    if pending.is_empty() {
        (StatusCode::OK, "ready".to_string())
    } else {
        let kinds: Vec<&str> = pending.iter().map(|k| k.as_str()).collect();
        (StatusCode::SERVICE_UNAVAILABLE, format!("not synced: {}", kinds.join(", ")))
    }
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match state.metrics.gather_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use watch_engine::ResourceVersion;

    fn status(state: LoopState, synced: bool) -> LoopStatus {
        LoopStatus {
            state,
            synced,
            resource_version: ResourceVersion::from("1"),
        }
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let state = HealthState::new(EngineMetrics::new().unwrap(), Vec::new());
        let (code, body) = get_path(router(state), "/healthz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readyz_waits_for_every_loop() {
        let (pods_tx, pods_rx) = watch::channel(status(LoopState::Streaming, true));
        let (svc_tx, svc_rx) = watch::channel(status(LoopState::Listing, false));
        let state = HealthState::new(
            EngineMetrics::new().unwrap(),
            vec![(ResourceKind::Pod, pods_rx), (ResourceKind::Service, svc_rx)],
        );

        let (code, body) = get_path(router(state.clone()), "/readyz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("services"));

        svc_tx.send_modify(|s| {
            s.state = LoopState::Streaming;
            s.synced = true;
        });
        let (code, _) = get_path(router(state.clone()), "/readyz").await;
        assert_eq!(code, StatusCode::OK);

        pods_tx.send_modify(|s| s.state = LoopState::Stopped);
        assert_eq!(state.not_ready(), vec![ResourceKind::Pod]);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = HealthState::new(EngineMetrics::new().unwrap(), Vec::new());
        let response = router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let state = HealthState::new(EngineMetrics::new().unwrap(), Vec::new());
        let server = tokio::spawn(serve(0, state, cancel.clone()));
        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
