use callbridge_core::{
    frame::{Modality, WireSchema},
    session::{
        DEFAULT_FALLBACK, DEFAULT_GREETING, DEFAULT_MAX_MALFORMED_FRAMES, DEFAULT_PERSONA,
        SessionSettings,
    },
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub chat_model: String,
    pub log_level: Level,
    pub persona: String,
    pub persona_path: Option<PathBuf>,
    pub greeting: String,
    pub fallback: String,
    pub send_greeting: bool,
    pub modalities: Vec<Modality>,
    pub send_turn_end: bool,
    pub wire_schema: WireSchema,
    pub max_malformed_frames: u32,
    /// `None` disables the per-call idle timeout.
    pub idle_timeout: Option<Duration>,
    pub completion_timeout: Duration,
    pub delta_chunk_chars: Option<usize>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    var_or(name, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

/// Reads a spoken line that must not be blank.
fn spoken_var(name: &str, default: &str) -> Result<String, ConfigError> {
    let value = var_or(name, default);
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must not be blank".to_string(),
        ));
    }
    Ok(value)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:8000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");
        let chat_model = var_or("CHAT_MODEL", "gpt-4o-mini");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let modalities = var_or("RESPONSE_MODALITIES", "audio,text")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Modality::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::InvalidValue("RESPONSE_MODALITIES".to_string(), e))?;
        if modalities.is_empty() {
            return Err(ConfigError::InvalidValue(
                "RESPONSE_MODALITIES".to_string(),
                "at least one modality is required".to_string(),
            ));
        }

        let idle_secs = parse_var::<u64>("IDLE_TIMEOUT_SECS", "300")?;
        let completion_secs = parse_var::<u64>("COMPLETION_TIMEOUT_SECS", "15")?;
        if completion_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "COMPLETION_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let delta_chunk_chars = match std::env::var("DELTA_CHUNK_CHARS") {
            Ok(_) => Some(parse_var::<usize>("DELTA_CHUNK_CHARS", "0")?).filter(|n| *n > 0),
            Err(_) => None,
        };

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            chat_model,
            log_level,
            persona: var_or("PERSONA", DEFAULT_PERSONA),
            persona_path: std::env::var("PERSONA_PATH").ok().map(PathBuf::from),
            greeting: spoken_var("GREETING_TEXT", DEFAULT_GREETING)?,
            fallback: spoken_var("FALLBACK_TEXT", DEFAULT_FALLBACK)?,
            send_greeting: parse_var::<bool>("SEND_GREETING", "true")?,
            modalities,
            send_turn_end: parse_var::<bool>("SEND_TURN_END", "true")?,
            wire_schema: parse_var::<WireSchema>("WIRE_SCHEMA", "realtime")?,
            max_malformed_frames: parse_var::<u32>(
                "MAX_MALFORMED_FRAMES",
                &DEFAULT_MAX_MALFORMED_FRAMES.to_string(),
            )?,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            completion_timeout: Duration::from_secs(completion_secs),
            delta_chunk_chars,
        })
    }

    /// The per-session behaviour derived from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            persona: self.persona.clone(),
            greeting: self.greeting.clone(),
            fallback: self.fallback.clone(),
            send_greeting: self.send_greeting,
            modalities: self.modalities.clone(),
            send_turn_end: self.send_turn_end,
            wire_schema: self.wire_schema,
            max_malformed_frames: self.max_malformed_frames,
            delta_chunk_chars: self.delta_chunk_chars,
        }
    }
}
