//! Health and metrics endpoint.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::watcher::SyncState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tracing::{info, warn};

/// State shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    /// Watcher sync flags
    pub sync: SyncState,
    /// Metrics registry
    pub metrics: Metrics,
}

/// Creates the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves until the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Serving health checks and metrics");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "OK"
}

/// Ready once every watcher has completed its initial list.
async fn readyz(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.sync.all_synced() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body),
        Err(error) => {
            warn!(%error, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; version=0.0.4")],
                error.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchedKind;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            sync: SyncState::default(),
            metrics: Metrics::new().unwrap(),
        }
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_healthz_is_always_ok() {
        assert_eq!(get_status(router(state()), "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_waits_for_every_watcher() {
        let state = state();
        assert_eq!(get_status(router(state.clone()), "/readyz").await, StatusCode::SERVICE_UNAVAILABLE);

        for kind in [
            WatchedKind::PodNetworks,
            WatchedKind::NetworkClasses,
            WatchedKind::ResourceSlices,
            WatchedKind::ResourceClaims,
        ] {
            state.sync.mark_synced(kind);
        }
        assert_eq!(get_status(router(state), "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_text_format() {
        let state = state();
        state.metrics.record_reconcile("ResourceClaim", "unchanged", std::time::Duration::from_millis(3));

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("pod_network_reconcile_total"));
    }
}
