use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Why the completion backend could not produce a reply.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion backend unreachable: {0}")]
    Unreachable(String),
    #[error("completion backend returned an error: {0}")]
    Status(String),
    #[error("completion backend returned empty content")]
    EmptyContent,
    #[error("completion backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("could not build completion request: {0}")]
    InvalidRequest(String),
    #[error("utterance is empty")]
    EmptyUtterance,
}

impl From<OpenAIError> for CompletionError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(e) => CompletionError::Unreachable(e.to_string()),
            OpenAIError::ApiError(e) => CompletionError::Status(e.message),
            OpenAIError::InvalidArgument(msg) => CompletionError::InvalidRequest(msg),
            other => CompletionError::Status(other.to_string()),
        }
    }
}

/// A narrow interface to a text-completion backend.
///
/// Given the deployment's persona instructions and the caller's latest utterance,
/// returns the text to speak. Implementations make at most one backend call and
/// never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, persona: &str, utterance: &str) -> Result<String, CompletionError>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o-mini").
    /// * `timeout` - Upper bound on a single completion call.
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(&self, persona: &str, utterance: &str) -> Result<String, CompletionError> {
        if utterance.trim().is_empty() {
            return Err(CompletionError::EmptyUtterance);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(persona)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(utterance)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response: CreateChatCompletionResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create(request))
                .await
                .map_err(|_| CompletionError::Timeout(self.timeout))??;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(CompletionError::EmptyContent);
        }
        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
