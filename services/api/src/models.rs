//! API Models
//!
//! Request and response bodies of the plain HTTP endpoints, with `utoipa`
//! schemas for the OpenAPI document.

use callbridge_core::{registry::ActiveCall, session::ReplySource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    #[schema(example = "What are your hours?")]
    pub message: String,
}

/// Where the reply text came from.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOrigin {
    Completion,
    EmptyUtterance,
    Fallback,
}

impl From<ReplySource> for ReplyOrigin {
    fn from(source: ReplySource) -> Self {
        match source {
            ReplySource::Completion => ReplyOrigin::Completion,
            ReplySource::EmptyUtterance => ReplyOrigin::EmptyUtterance,
            ReplySource::Fallback => ReplyOrigin::Fallback,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ChatResponse {
    #[schema(example = "We're open 9 to 5.")]
    pub reply: String,
    pub source: ReplyOrigin,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub active_calls: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TestResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ActiveCallView {
    pub call_id: String,
    #[schema(value_type = String, format = Uuid)]
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

impl From<ActiveCall> for ActiveCallView {
    fn from(call: ActiveCall) -> Self {
        Self {
            call_id: call.call_id,
            connection_id: call.connection_id,
            connected_at: call.connected_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
