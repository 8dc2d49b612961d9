//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! read-only resources handed to every handler and call session.

use crate::config::Config;
use callbridge_core::{
    llm_client::CompletionClient, registry::SessionRegistry, session::SessionSettings,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub completion_client: Arc<dyn CompletionClient>,
    pub session_settings: Arc<SessionSettings>,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}
