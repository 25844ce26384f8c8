//! Shared fixtures for handler tests: an in-process executor and a
//! helper to serve any axum router on an ephemeral port.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serve `router` on 127.0.0.1 and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
pub struct ExecutorState {
    pub healthy: Arc<AtomicBool>,
    pub fail_reload: Arc<AtomicBool>,
    pub health_calls: Arc<AtomicUsize>,
    pub reloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn health(State(state): State<ExecutorState>) -> StatusCode {
    state.health_calls.fetch_add(1, Ordering::SeqCst);
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn reload(
    State(state): State<ExecutorState>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    if state.fail_reload.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.reloads.lock().unwrap().push(body);
    StatusCode::OK
}

/// Fake executor exposing `/health` and `/reload`.
pub async fn spawn_executor(state: ExecutorState) -> String {
    let router = Router::new()
        .route("/health", get(health))
        .route("/reload", post(reload))
        .with_state(state);
    spawn_server(router).await
}
