//! Conversation orchestration for parley.
//!
//! - **LLM seam** (`llm`) - `LlmClient`, one completion from a system prompt plus history
//! - **Gemini** (`gemini`) - `generateContent` adapter for the LLM seam
//! - **Chat** (`chat`) - Slack message → stored history → model → threaded reply
//! - **Daily prompt** (`daily`) - scheduled check-in posted to one channel
//!
//! # Flow
//!
//! ```text
//! ThreadMessageEvent → ChatUseCase → ConversationRepository (user turn)
//!                           ↓
//!                     LlmClient::complete → ConversationRepository (assistant turn)
//!                           ↓
//!                     SlackApi::update_message (placeholder → reply)
//! ```
//!
//! Provider failures never escape the chat flow: the user gets one apology in
//! the thread and the failure is logged.

pub mod chat;
pub mod daily;
pub mod gemini;
pub mod llm;

pub use chat::{ChatOutcome, ChatSettings, ChatUseCase};
pub use daily::{DailyPromptError, DailyPromptUseCase};
pub use gemini::GeminiClient;
pub use llm::{LlmClient, LlmError};
