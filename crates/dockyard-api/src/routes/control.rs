//! Scheduler start/stop endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
}

async fn start(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.start().await;
    Json(json!({ "running": true }))
}

/// Stops dispatching new builds; builds in flight run to completion.
async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.stop().await;
    Json(json!({ "running": false }))
}
