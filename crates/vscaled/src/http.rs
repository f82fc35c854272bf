//! Metrics HTTP endpoint.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition of the scaler's own metrics |

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use vscale_metrics::ScalerMetrics;

pub fn build_router(metrics: Arc<ScalerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(metrics)
}

/// GET /metrics
pub async fn prometheus_metrics(State(metrics): State<Arc<ScalerMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}
