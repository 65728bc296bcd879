use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use parley_core::domain::conversation::{Conversation, ConversationKey, Message, Role};

use super::{duplicate, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, text, ts, user_id, message_id
             FROM conversation_message WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }
}

// Fixed-width timestamps keep lexical comparison in SQL consistent with time order.
fn format_ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let text: String = row.try_get("text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ts: String = row.try_get("ts").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: Option<String> =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message_id: Option<String> =
        row.try_get("message_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Message {
        role: role.parse::<Role>().map_err(|e| RepositoryError::Decode(e.to_string()))?,
        text,
        ts: parse_ts("ts", &ts)?,
        user_id,
        message_id,
    })
}

fn row_to_header(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(String, Conversation), RepositoryError> {
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let channel_id: String =
        row.try_get("channel_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let thread_id: String =
        row.try_get("thread_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let conversation = Conversation {
        key: ConversationKey::new(channel_id, thread_id),
        messages: Vec::new(),
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
    };
    Ok((conversation_id, conversation))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, RepositoryError> {
        let conversation_id = key.document_id();
        let row = sqlx::query(
            "SELECT conversation_id, channel_id, thread_id, created_at, updated_at
             FROM conversation WHERE conversation_id = ?",
        )
        .bind(&conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let (_, mut conversation) = row_to_header(&row)?;
        conversation.messages = self.load_messages(&conversation_id).await?;
        Ok(Some(conversation))
    }

    async fn initialize(
        &self,
        key: &ConversationKey,
        seed: &[Message],
    ) -> Result<Conversation, RepositoryError> {
        let conversation_id = key.document_id();
        let now = format_ts(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO conversation (conversation_id, channel_id, thread_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO NOTHING",
        )
        .bind(&conversation_id)
        .bind(&key.channel_id)
        .bind(&key.thread_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            for message in seed {
                insert_message(&mut tx, &conversation_id, message).await?;
            }
        }
        tx.commit().await?;

        self.find(key).await?.ok_or(RepositoryError::NotFound(conversation_id))
    }

    async fn append_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<(), RepositoryError> {
        let conversation_id = key.document_id();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            "UPDATE conversation SET updated_at = MAX(updated_at, ?) WHERE conversation_id = ?",
        )
        .bind(format_ts(&message.ts))
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if touched == 0 {
            return Err(RepositoryError::NotFound(conversation_id));
        }

        match insert_message(&mut tx, &conversation_id, &message).await {
            Ok(()) => {}
            Err(error) if is_unique_violation(&error) => {
                let message_id = message.message_id.as_deref().unwrap_or_default();
                return Err(duplicate(key, message_id));
            }
            Err(error) => return Err(error.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT conversation_id, channel_id, thread_id, created_at, updated_at
             FROM conversation ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            let (conversation_id, mut conversation) = row_to_header(row)?;
            conversation.messages = self.load_messages(&conversation_id).await?;
            conversations.push(conversation);
        }
        Ok(conversations)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    conversation_id: &str,
    message: &Message,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO conversation_message (conversation_id, role, text, ts, user_id, message_id)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(message.role.as_str())
    .bind(&message.text)
    .bind(format_ts(&message.ts))
    .bind(&message.user_id)
    .bind(&message.message_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use parley_core::domain::conversation::{ConversationKey, Message, Role};

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlConversationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlConversationRepository::new(pool)
    }

    #[tokio::test]
    async fn initialize_seeds_only_on_first_call() {
        let repo = setup().await;
        let key = ConversationKey::new("C1", "1700000000.000100");

        let created = repo
            .initialize(&key, &[Message::system("You are a helpful assistant.")])
            .await
            .expect("create");
        assert_eq!(created.messages.len(), 1);
        assert_eq!(created.messages[0].role, Role::System);

        let loaded =
            repo.initialize(&key, &[Message::system("ignored")]).await.expect("load existing");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].text, "You are a helpful assistant.");
    }

    #[tokio::test]
    async fn appends_keep_insertion_order_and_fields() {
        let repo = setup().await;
        let key = ConversationKey::new("C1", "1.0");
        repo.initialize(&key, &[]).await.expect("create");

        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("timestamp");
        repo.append_message(
            &key,
            Message::user("how are you?", "U123").with_message_id("client-1").at(base),
        )
        .await
        .expect("append user");
        repo.append_message(&key, Message::assistant("Doing well!").at(base + Duration::seconds(2)))
            .await
            .expect("append assistant");

        let stored = repo.find(&key).await.expect("find").expect("exists");
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].user_id.as_deref(), Some("U123"));
        assert_eq!(stored.messages[0].message_id.as_deref(), Some("client-1"));
        assert_eq!(stored.messages[0].ts, base);
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert!(stored.messages[1].message_id.is_none());
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected_and_not_stored() {
        let repo = setup().await;
        let key = ConversationKey::new("C1", "1.0");
        repo.initialize(&key, &[]).await.expect("create");

        repo.append_message(&key, Message::user("hi", "U1").with_message_id("m-1"))
            .await
            .expect("first append");
        let second = repo.append_message(&key, Message::user("hi", "U1").with_message_id("m-1")).await;

        assert!(matches!(
            second,
            Err(RepositoryError::DuplicateMessage { ref message_id, .. }) if message_id == "m-1"
        ));
        let stored = repo.find(&key).await.expect("find").expect("exists");
        assert_eq!(stored.messages.len(), 1);
    }

    #[tokio::test]
    async fn same_message_id_in_other_thread_is_allowed() {
        let repo = setup().await;
        let first = ConversationKey::new("C1", "1.0");
        let second = ConversationKey::new("C1", "2.0");
        repo.initialize(&first, &[]).await.expect("create first");
        repo.initialize(&second, &[]).await.expect("create second");

        repo.append_message(&first, Message::user("a", "U1").with_message_id("m-1"))
            .await
            .expect("append first");
        repo.append_message(&second, Message::user("b", "U1").with_message_id("m-1"))
            .await
            .expect("append second");

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn append_without_conversation_is_not_found() {
        let repo = setup().await;
        let result =
            repo.append_message(&ConversationKey::new("C1", "9.0"), Message::assistant("x")).await;

        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }
}
