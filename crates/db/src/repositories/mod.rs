use async_trait::async_trait;
use thiserror::Error;

use parley_core::domain::conversation::{Conversation, ConversationKey, Message};

pub mod firestore;
pub mod memory;
pub mod mongo;
pub mod sqlite;

pub use firestore::{FirestoreAuth, FirestoreConversationRepository};
pub use memory::InMemoryConversationRepository;
pub use mongo::MongoConversationRepository;
pub use sqlite::SqlConversationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("firestore error: {0}")]
    Firestore(String),
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conversation `{0}` was not found")]
    NotFound(String),
    #[error("message `{message_id}` was already stored in conversation `{conversation_id}`")]
    DuplicateMessage { conversation_id: String, message_id: String },
    #[error("conversation `{0}` kept changing while appending; giving up")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateMessage { .. })
    }
}

/// Conversation history keyed by Slack thread.
///
/// Implementations keep messages in insertion order and reject a second
/// message carrying a `message_id` already present in the same conversation.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, RepositoryError>;

    /// Returns the stored conversation, creating it with `seed` when absent.
    async fn initialize(
        &self,
        key: &ConversationKey,
        seed: &[Message],
    ) -> Result<Conversation, RepositoryError>;

    async fn append_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;

    fn backend(&self) -> &'static str;
}

fn duplicate(key: &ConversationKey, message_id: &str) -> RepositoryError {
    RepositoryError::DuplicateMessage {
        conversation_id: key.document_id(),
        message_id: message_id.to_owned(),
    }
}
