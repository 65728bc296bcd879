pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, open_repository, DbPool};
pub use repositories::{ConversationRepository, RepositoryError};
