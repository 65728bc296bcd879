//! Slack integration for parley.
//!
//! - **Signature** (`signature`) - `X-Slack-Signature` verification for HTTP deliveries
//! - **Events** (`events`) - Events API payload parsing and the thread message seam
//! - **Client** (`client`) - Web API calls: `chat.postMessage`, `chat.update`, `auth.test`
//! - **Block Kit** (`blocks`) - placeholder, reply, and daily prompt layouts
//!
//! # Architecture
//!
//! ```text
//! POST /slack/events → SignatureVerifier → parse_event_payload → ThreadMessageService
//!                                                                      ↓
//!                                    SlackApi::update_message ← Block Kit reply
//! ```

pub mod blocks;
pub mod client;
pub mod events;
pub mod signature;

pub use client::{PostedMessage, SlackApi, SlackApiError, SlackIdentity, SlackWebClient};
pub use events::{
    parse_event_payload, EventContext, EventHandlerError, EventParseError, HandlerResult,
    SlackEvent, ThreadMessageEvent, ThreadMessageService,
};
pub use signature::{SignatureError, SignatureVerifier};
