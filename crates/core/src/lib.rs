pub mod config;
pub mod domain;
pub mod errors;

pub use domain::context::{InitialContext, InitialContextError};
pub use domain::conversation::{Conversation, ConversationKey, ConversationRecord, Message, Role};
pub use errors::{ApplicationError, DomainError, InterfaceError};
