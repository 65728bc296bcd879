pub mod context;
pub mod conversation;
