use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    #[serde(alias = "model")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" | "model" => Ok(Self::Assistant),
            other => Err(DomainError::UnknownRole(other.to_owned())),
        }
    }
}

/// Identifies a conversation by the Slack thread it lives in.
///
/// A top-level message opens a thread whose id is the message's own `ts`, so
/// the first message and every reply under it share one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel_id: String,
    pub thread_id: String,
}

impl ConversationKey {
    pub fn new(channel_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), thread_id: thread_id.into() }
    }

    pub fn for_event(channel_id: &str, ts: &str, thread_ts: Option<&str>) -> Self {
        let thread_id = thread_ts.filter(|value| !value.trim().is_empty()).unwrap_or(ts);
        Self::new(channel_id, thread_id)
    }

    pub fn document_id(&self) -> String {
        format!("slack-{}-{}", self.channel_id, self.thread_id)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.document_id())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into(), ts: Utc::now(), user_id: None, message_id: None }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Self::new(Role::User, text) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "ConversationRecord", from = "ConversationRecord")]
pub struct Conversation {
    pub key: ConversationKey,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(key: ConversationKey, seed: Vec<Message>, now: DateTime<Utc>) -> Self {
        Self { key, messages: seed, created_at: now, updated_at: now }
    }

    pub fn contains_message_id(&self, message_id: &str) -> bool {
        self.messages.iter().any(|message| message.message_id.as_deref() == Some(message_id))
    }

    /// Appends a turn, rejecting a `message_id` that is already present.
    pub fn push(&mut self, message: Message) -> Result<(), DomainError> {
        if let Some(message_id) = message.message_id.as_deref() {
            if self.contains_message_id(message_id) {
                return Err(DomainError::DuplicateMessage { message_id: message_id.to_owned() });
            }
        }

        if message.ts > self.updated_at {
            self.updated_at = message.ts;
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|message| message.role == role).count()
    }
}

/// Storage shape shared by every adapter:
/// `{conversation_id, channel_id, thread_id, created_at, updated_at, messages}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl From<Conversation> for ConversationRecord {
    fn from(conversation: Conversation) -> Self {
        Self {
            conversation_id: conversation.key.document_id(),
            channel_id: conversation.key.channel_id,
            thread_id: conversation.key.thread_id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            messages: conversation.messages,
        }
    }
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            key: ConversationKey::new(record.channel_id, record.thread_id),
            messages: record.messages,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Conversation, ConversationKey, Message, Role};
    use crate::errors::DomainError;

    fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn key_uses_thread_ts_when_present() {
        let key = ConversationKey::for_event("C123", "1700000001.000200", Some("1700000000.000100"));
        assert_eq!(key.thread_id, "1700000000.000100");
        assert_eq!(key.document_id(), "slack-C123-1700000000.000100");
    }

    #[test]
    fn key_falls_back_to_message_ts_for_top_level_messages() {
        let key = ConversationKey::for_event("C123", "1700000001.000200", None);
        assert_eq!(key.thread_id, "1700000001.000200");

        let blank_thread = ConversationKey::for_event("C123", "1700000001.000200", Some(" "));
        assert_eq!(blank_thread.thread_id, "1700000001.000200");
    }

    #[test]
    fn push_preserves_insertion_order_and_advances_updated_at() {
        let now = fixed_time();
        let mut conversation =
            Conversation::new(ConversationKey::new("C1", "T1"), vec![Message::system("be kind")], now);

        conversation
            .push(Message::user("hello", "U1").with_message_id("m-1").at(now + Duration::seconds(1)))
            .expect("first push");
        conversation.push(Message::assistant("hi!").at(now + Duration::seconds(2))).expect("reply");

        let roles: Vec<Role> = conversation.messages.iter().map(|message| message.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(conversation.updated_at, now + Duration::seconds(2));
        assert_eq!(conversation.created_at, now);
    }

    #[test]
    fn push_rejects_duplicate_message_ids() {
        let mut conversation =
            Conversation::new(ConversationKey::new("C1", "T1"), Vec::new(), fixed_time());
        conversation.push(Message::user("hello", "U1").with_message_id("m-1")).expect("first");

        let error = conversation
            .push(Message::user("hello again", "U1").with_message_id("m-1"))
            .expect_err("duplicate should be rejected");

        assert_eq!(error, DomainError::DuplicateMessage { message_id: "m-1".to_string() });
        assert_eq!(conversation.messages.len(), 1);
    }

    #[test]
    fn record_shape_carries_conversation_id() {
        let conversation = Conversation::new(
            ConversationKey::new("C9", "171.5"),
            vec![Message::user("hi", "U1").at(fixed_time())],
            fixed_time(),
        );

        let value = serde_json::to_value(&conversation).expect("serialize");
        assert_eq!(value["conversation_id"], "slack-C9-171.5");
        assert_eq!(value["channel_id"], "C9");
        assert_eq!(value["thread_id"], "171.5");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["text"], "hi");
        assert!(value["messages"][0].get("message_id").is_none());

        let decoded: Conversation = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, conversation);
    }

    #[test]
    fn role_parsing_accepts_model_alias() {
        assert_eq!("model".parse::<Role>().expect("model"), Role::Assistant);
        assert_eq!(" User ".parse::<Role>().expect("user"), Role::User);
        assert!("tool".parse::<Role>().is_err());
    }
}
