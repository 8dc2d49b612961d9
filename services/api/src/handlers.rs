//! Axum Handlers for the plain HTTP endpoints
//!
//! Health and test probes, the active call listing, and the single-shot chat
//! endpoint that answers one message with the same completion and fallback
//! rules as a live call.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use callbridge_core::session::resolve_reply;
use std::sync::Arc;
use tracing::info;

use crate::{
    models::{ActiveCallView, ChatRequest, ChatResponse, ErrorResponse, HealthResponse, TestResponse},
    state::AppState,
};

const MAX_CHAT_MESSAGE_BYTES: usize = 16 * 1024;

pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Confirm the service is up.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service is running", body = TestResponse))
)]
pub async fn root() -> Json<TestResponse> {
    Json(TestResponse {
        message: "Call bridge is running.".to_string(),
    })
}

/// Report liveness and the number of calls in progress.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_calls: state.registry.len(),
    })
}

/// List the calls that currently hold a session.
#[utoipa::path(
    get,
    path = "/calls",
    responses((status = 200, description = "Active calls", body = [ActiveCallView]))
)]
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveCallView>> {
    Json(
        state
            .registry
            .snapshot()
            .into_iter()
            .map(ActiveCallView::from)
            .collect(),
    )
}

/// Answer a single message outside of a call.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Reply text", body = ChatResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.len() > MAX_CHAT_MESSAGE_BYTES {
        return Err(ApiError::BadRequest(format!(
            "message exceeds {} bytes",
            MAX_CHAT_MESSAGE_BYTES
        )));
    }

    let reply = resolve_reply(
        state.completion_client.as_ref(),
        &state.session_settings,
        &payload.message,
    )
    .await;
    info!(source = ?reply.source, "Answered chat message");

    Ok(Json(ChatResponse {
        reply: reply.text,
        source: reply.source.into(),
    }))
}
