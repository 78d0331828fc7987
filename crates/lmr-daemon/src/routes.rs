//! Observability routes. No CRUD here.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": state.build.service,
        "version": state.build.version,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(state.status()).expect("status serializes"))
}
