//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the per-call WebSocket endpoint, the plain HTTP API, and
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ActiveCallView, ChatRequest, ChatResponse, ErrorResponse, HealthResponse, ReplyOrigin,
        TestResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root,
        handlers::health,
        handlers::list_calls,
        handlers::chat,
    ),
    components(
        schemas(ChatRequest, ChatResponse, ReplyOrigin, HealthResponse, TestResponse, ActiveCallView, ErrorResponse)
    ),
    tags(
        (name = "Call Bridge API", description = "Voice call bridge between a telephony platform and a completion backend")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/calls", get(handlers::list_calls))
        .route("/chat", post(handlers::chat))
        .route("/chat/{call_id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
