use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use parley_core::domain::conversation::{Conversation, ConversationKey, Message};
use parley_core::errors::DomainError;

use super::{duplicate, ConversationRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&key.document_id()).cloned())
    }

    async fn initialize(
        &self,
        key: &ConversationKey,
        seed: &[Message],
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(key.document_id())
            .or_insert_with(|| Conversation::new(key.clone(), seed.to_vec(), Utc::now()));
        Ok(conversation.clone())
    }

    async fn append_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&key.document_id())
            .ok_or_else(|| RepositoryError::NotFound(key.document_id()))?;

        conversation.push(message).map_err(|error| match error {
            DomainError::DuplicateMessage { message_id } => duplicate(key, &message_id),
            other => RepositoryError::Decode(other.to_string()),
        })
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut all: Vec<Conversation> = conversations.values().cloned().collect();
        all.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(all)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
