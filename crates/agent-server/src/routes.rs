use crate::error::ApiError;
use crate::state::AppState;
use agent_core::types::Message;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Clock agent API is running."
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub thread_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::unprocessable(e.body_text()))?;
    if req.message.trim().is_empty() {
        return Err(ApiError::unprocessable("message must not be empty"));
    }

    // Held for the whole turn so requests on one thread don't interleave.
    // Stateless requests share nothing and need no lock.
    let _turn = if state.threads.is_enabled() {
        Some(state.threads.lock_thread(&req.thread_id).await)
    } else {
        None
    };

    let mut conversation = state.threads.load(&req.thread_id).await;
    debug!(
        "Thread {}: {} message(s) of history",
        req.thread_id,
        conversation.len()
    );
    conversation.push(Message::user(req.message));

    let reply = state.agent_loop.run(&mut conversation).await.map_err(|e| {
        error!("Chat turn failed for thread {}: {}", req.thread_id, e);
        ApiError::from(e)
    })?;

    state.threads.commit(&req.thread_id, &conversation).await;

    Ok(Json(ChatResponse {
        response: reply.content,
    }))
}

// ── Threads ─────────────────────────────────────────────────────────────

pub fn thread_routes() -> Router<AppState> {
    Router::new().route("/threads/{thread_id}", delete(clear_thread))
}

async fn clear_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _turn = state.threads.lock_thread(&thread_id).await;
    if state.threads.clear(&thread_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Thread not found: {}", thread_id)))
    }
}
