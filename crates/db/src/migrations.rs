use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "conversation",
        "conversation_message",
        "idx_conversation_channel_thread",
        "idx_conversation_message_conversation_id",
        "idx_conversation_message_message_id",
    ];

    #[tokio::test]
    async fn migrations_create_conversation_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?")
                .bind(object)
                .fetch_one(&pool)
                .await
                .expect("query sqlite_master")
                .get::<i64, _>("count");
            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");

        let applied = sqlx::query("SELECT COUNT(*) AS count FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .expect("count applied migrations")
            .get::<i64, _>("count");
        assert_eq!(applied as usize, MIGRATOR.iter().count());

        pool.close().await;
    }

    #[tokio::test]
    async fn unique_index_rejects_repeated_message_id() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO conversation (conversation_id, channel_id, thread_id, created_at, updated_at)
             VALUES ('slack-C1-1.0', 'C1', '1.0', '2024-03-01T12:00:00Z', '2024-03-01T12:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert conversation");

        let insert = "INSERT INTO conversation_message (conversation_id, role, text, ts, message_id)
                      VALUES ('slack-C1-1.0', 'user', 'hi', '2024-03-01T12:00:00Z', 'm-1')";
        sqlx::query(insert).execute(&pool).await.expect("first insert");
        let second = sqlx::query(insert).execute(&pool).await;

        assert!(second.is_err(), "duplicate message id must be rejected");
        pool.close().await;
    }
}
