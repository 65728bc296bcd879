use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("message `{message_id}` is already part of the conversation")]
    DuplicateMessage { message_id: String },
    #[error("unknown message role `{0}`")]
    UnknownRole(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    /// The model declined to answer the user's message.
    #[error("content refused: {0}")]
    Refused(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("request refused: {message}")]
    Refused { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

pub const REFUSED_USER_MESSAGE: &str =
    "I can't respond to that one. Could you put it another way?";

impl InterfaceError {
    /// Text safe to show in Slack. Dependency failures use the operator's
    /// configured `fallback`.
    pub fn user_message<'a>(&self, fallback: &'a str) -> &'a str {
        match self {
            Self::Refused { .. } => REFUSED_USER_MESSAGE,
            Self::ServiceUnavailable { .. } => fallback,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Refused { correlation_id, .. } | Self::ServiceUnavailable { correlation_id, .. } => {
                correlation_id
            }
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Refused(message) => InterfaceError::Refused { message, correlation_id },
            Self::Persistence(message) | Self::Integration(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}
