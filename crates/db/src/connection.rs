use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{DatabaseClient, DatabaseConfig};
use sqlx::sqlite::SqlitePoolOptions;

use crate::migrations;
use crate::repositories::{
    ConversationRepository, FirestoreConversationRepository, InMemoryConversationRepository,
    MongoConversationRepository, RepositoryError, SqlConversationRepository,
};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Builds the conversation store selected by `database.client`.
///
/// SQLite stores have pending migrations applied before they are returned.
pub async fn open_repository(
    config: &DatabaseConfig,
) -> Result<Arc<dyn ConversationRepository>, RepositoryError> {
    let repository: Arc<dyn ConversationRepository> = match config.client {
        DatabaseClient::Sqlite => {
            let pool =
                connect_with_settings(&config.url, config.max_connections, config.timeout_secs)
                    .await?;
            migrations::run_pending(&pool).await?;
            Arc::new(SqlConversationRepository::new(pool))
        }
        DatabaseClient::Firestore => Arc::new(FirestoreConversationRepository::from_config(config)?),
        DatabaseClient::Mongodb => Arc::new(MongoConversationRepository::connect(config).await?),
        DatabaseClient::Memory => Arc::new(InMemoryConversationRepository::default()),
    };

    Ok(repository)
}

#[cfg(test)]
mod tests {
    use parley_core::config::{AppConfig, DatabaseClient};

    use super::open_repository;

    #[tokio::test]
    async fn opens_sqlite_store_with_schema_applied() {
        let mut database = AppConfig::default().database;
        database.client = DatabaseClient::Sqlite;
        database.url = "sqlite::memory:".to_string();
        database.max_connections = 1;

        let repository = open_repository(&database).await.expect("open sqlite store");

        assert_eq!(repository.backend(), "sqlite");
        repository.ping().await.expect("ping");
        assert!(repository.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn opens_memory_store() {
        let mut database = AppConfig::default().database;
        database.client = DatabaseClient::Memory;

        let repository = open_repository(&database).await.expect("open memory store");
        assert_eq!(repository.backend(), "memory");
    }
}
