use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::conversation::Message;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("llm provider blocked the prompt: {0}")]
    Blocked(String),
    #[error("llm provider returned no text")]
    EmptyResponse,
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm request is invalid: {0}")]
    InvalidRequest(String),
}

/// Produces one completion for an ordered conversation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: Option<&str>, history: &[Message]) -> Result<String, LlmError>;

    fn model(&self) -> &str;
}
