//! Main Entrypoint for the Call Bridge Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Resolving the persona the completion backend answers with.
//! 3. Initializing the shared completion client and session registry.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use callbridge_api::{config::Config, router::create_router, state::AppState};
use callbridge_core::{
    llm_client::{CompletionClient, OpenAICompatibleClient},
    registry::SessionRegistry,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads the persona from `PERSONA_PATH` when set, otherwise keeps the configured text.
fn load_persona(config: &Config) -> anyhow::Result<String> {
    match &config.persona_path {
        Some(path) => {
            let persona = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona from {}", path.display()))?;
            let persona = persona.trim().to_string();
            anyhow::ensure!(!persona.is_empty(), "Persona file {} is empty", path.display());
            Ok(persona)
        }
        None => Ok(config.persona.clone()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Resolve Persona ---
    config.persona = load_persona(&config)?;

    // --- 4. Initialize Shared Services ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let completion_client: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
        config.completion_timeout,
    ));

    let app_state = Arc::new(AppState {
        completion_client,
        session_settings: Arc::new(config.session_settings()),
        registry: Arc::new(SessionRegistry::new()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        wire_schema = ?config.wire_schema,
        modalities = ?config.modalities,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
