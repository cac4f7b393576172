//! Read-only monitoring endpoints.
//!
//! Mounted next to the application router; nothing here sits on the
//! request path of gateway calls.

use crate::backend::Backend;
use crate::connection::pool::PoolStats;
use crate::gateway::Gateway;
use crate::metrics::{PerformanceRecorder, PerformanceSnapshot, SignatureSnapshot};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    NotFound(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

type PoolStatsFn = Arc<dyn Fn() -> PoolStats + Send + Sync>;

#[derive(Clone)]
pub struct MonitoringState {
    recorder: Arc<PerformanceRecorder>,
    pool_stats: PoolStatsFn,
}

impl MonitoringState {
    pub fn new<F>(recorder: Arc<PerformanceRecorder>, pool_stats: F) -> Self
    where
        F: Fn() -> PoolStats + Send + Sync + 'static,
    {
        Self {
            recorder,
            pool_stats: Arc::new(pool_stats),
        }
    }

    pub fn for_gateway<B: Backend>(gateway: Arc<Gateway<B>>) -> Self {
        let recorder = Arc::clone(gateway.recorder());
        Self::new(recorder, move || gateway.pool_stats())
    }
}

pub fn router(state: MonitoringState) -> Router {
    Router::new()
        .route("/monitoring/queries", get(query_metrics))
        .route("/monitoring/queries/reset", post(reset_metrics))
        .route("/monitoring/queries/:signature", get(signature_metrics))
        .route("/monitoring/pool", get(pool_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn query_metrics(State(state): State<MonitoringState>) -> Json<PerformanceSnapshot> {
    Json(state.recorder.snapshot())
}

async fn signature_metrics(
    State(state): State<MonitoringState>,
    Path(signature): Path<String>,
) -> Result<Json<SignatureSnapshot>> {
    state
        .recorder
        .stats(&signature)
        .map(|stats| Json(stats.into()))
        .ok_or_else(|| WebError::NotFound(format!("no metrics recorded for '{}'", signature)))
}

async fn reset_metrics(State(state): State<MonitoringState>) -> StatusCode {
    state.recorder.reset();
    info!("performance metrics reset via monitoring endpoint");
    StatusCode::NO_CONTENT
}

async fn pool_stats(State(state): State<MonitoringState>) -> Json<PoolStats> {
    Json((state.pool_stats)())
}
