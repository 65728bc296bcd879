use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use parley_core::config::DatabaseConfig;
use parley_core::domain::conversation::{Conversation, ConversationKey, Message, Role};

use super::{duplicate, ConversationRepository, RepositoryError};

/// Timestamps are native BSON dates so `$max` and sorts compare instants.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct MongoMessage {
    role: Role,
    text: String,
    ts: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct MongoConversation {
    #[serde(rename = "_id")]
    id: String,
    conversation_id: String,
    channel_id: String,
    thread_id: String,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
    #[serde(default)]
    messages: Vec<MongoMessage>,
}

fn to_bson_date(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

fn from_bson_date(at: bson::DateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).unwrap_or_default()
}

impl From<&Message> for MongoMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            ts: to_bson_date(message.ts),
            user_id: message.user_id.clone(),
            message_id: message.message_id.clone(),
        }
    }
}

impl From<MongoMessage> for Message {
    fn from(stored: MongoMessage) -> Self {
        Self {
            role: stored.role,
            text: stored.text,
            ts: from_bson_date(stored.ts),
            user_id: stored.user_id,
            message_id: stored.message_id,
        }
    }
}

impl From<&Conversation> for MongoConversation {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.key.document_id(),
            conversation_id: conversation.key.document_id(),
            channel_id: conversation.key.channel_id.clone(),
            thread_id: conversation.key.thread_id.clone(),
            created_at: to_bson_date(conversation.created_at),
            updated_at: to_bson_date(conversation.updated_at),
            messages: conversation.messages.iter().map(MongoMessage::from).collect(),
        }
    }
}

impl From<MongoConversation> for Conversation {
    fn from(stored: MongoConversation) -> Self {
        Self {
            key: ConversationKey::new(stored.channel_id, stored.thread_id),
            messages: stored.messages.into_iter().map(Message::from).collect(),
            created_at: from_bson_date(stored.created_at),
            updated_at: from_bson_date(stored.updated_at),
        }
    }
}

pub struct MongoConversationRepository {
    client: Client,
    database: String,
    collection: Collection<MongoConversation>,
}

impl MongoConversationRepository {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let uri = config
            .mongodb
            .uri
            .as_ref()
            .ok_or_else(|| RepositoryError::Decode("mongodb uri is not configured".into()))?;

        let mut options = ClientOptions::parse(uri.expose_secret()).await?;
        options.app_name = Some("parley".to_string());
        options.connect_timeout = Some(Duration::from_secs(config.timeout_secs.max(1)));
        options.server_selection_timeout = Some(Duration::from_secs(config.timeout_secs.max(1)));

        let client = Client::with_options(options)?;
        Ok(Self::new(client, &config.mongodb.database, &config.collection))
    }

    pub fn new(client: Client, database: &str, collection: &str) -> Self {
        let collection = client.database(database).collection::<MongoConversation>(collection);
        Self { client, database: database.to_owned(), collection }
    }
}

fn id_filter(key: &ConversationKey) -> Document {
    doc! { "_id": key.document_id() }
}

/// Matches the conversation only while it does not yet hold `message_id`, so
/// the push and the duplicate check happen in one atomic update.
fn append_filter(key: &ConversationKey, message: &Message) -> Document {
    let mut filter = id_filter(key);
    if let Some(message_id) = message.message_id.as_deref() {
        filter.insert("messages.message_id", doc! { "$ne": message_id });
    }
    filter
}

fn append_update(message: &Message) -> Result<Document, RepositoryError> {
    let encoded = bson::to_bson(&MongoMessage::from(message))
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(doc! {
        "$push": { "messages": encoded },
        "$max": { "updated_at": to_bson_date(message.ts) },
    })
}

fn insert_document(conversation: &Conversation) -> Result<Document, RepositoryError> {
    bson::to_document(&MongoConversation::from(conversation)).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl ConversationRepository for MongoConversationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, RepositoryError> {
        let stored = self.collection.find_one(id_filter(key)).await?;
        Ok(stored.map(Conversation::from))
    }

    async fn initialize(
        &self,
        key: &ConversationKey,
        seed: &[Message],
    ) -> Result<Conversation, RepositoryError> {
        let fresh = Conversation::new(key.clone(), seed.to_vec(), Utc::now());
        let mut on_insert = insert_document(&fresh)?;
        on_insert.remove("_id");

        self.collection
            .update_one(id_filter(key), doc! { "$setOnInsert": on_insert })
            .upsert(true)
            .await?;

        self.find(key).await?.ok_or_else(|| RepositoryError::NotFound(key.document_id()))
    }

    async fn append_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<(), RepositoryError> {
        let result = self
            .collection
            .update_one(append_filter(key, &message), append_update(&message)?)
            .await?;
        if result.matched_count > 0 {
            return Ok(());
        }

        let exists = self.collection.count_documents(id_filter(key)).await? > 0;
        match (exists, message.message_id.as_deref()) {
            (true, Some(message_id)) => Err(duplicate(key, message_id)),
            _ => Err(RepositoryError::NotFound(key.document_id())),
        }
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let cursor = self.collection.find(doc! {}).sort(doc! { "created_at": 1 }).await?;
        let stored: Vec<MongoConversation> = cursor.try_collect().await?;
        Ok(stored.into_iter().map(Conversation::from).collect())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.client.database(&self.database).run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}
