use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// A parsed Events API delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    UrlVerification { challenge: String },
    ThreadMessage(ThreadMessageEvent),
    Ignored { reason: IgnoreReason },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    BotMessage,
    Subtype(String),
    EmptyText,
    UnsupportedEvent(String),
    UnsupportedEnvelope(String),
}

impl IgnoreReason {
    pub fn label(&self) -> &str {
        match self {
            Self::BotMessage => "bot_message",
            Self::Subtype(subtype) => subtype,
            Self::EmptyText => "empty_text",
            Self::UnsupportedEvent(event_type) => event_type,
            Self::UnsupportedEnvelope(envelope_type) => envelope_type,
        }
    }
}

/// A user-authored message in a channel, DM, or thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessageEvent {
    pub event_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub client_msg_id: Option<String>,
}

impl ThreadMessageEvent {
    /// Stable id for duplicate detection; Slack redelivers with the same
    /// `client_msg_id`, and the `message` / `app_mention` pair for one post
    /// shares it too.
    pub fn message_id(&self) -> &str {
        self.client_msg_id.as_deref().filter(|value| !value.is_empty()).unwrap_or(&self.ts)
    }

    /// Thread the reply belongs in; a top-level message starts its own thread.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().filter(|value| !value.is_empty()).unwrap_or(&self.ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

impl EventContext {
    pub fn for_event(event: &ThreadMessageEvent) -> Self {
        let correlation_id = match event.event_id.as_deref() {
            Some(event_id) => event_id.to_owned(),
            None => format!("{}-{}", event.channel_id, event.ts),
        };
        Self { correlation_id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("thread message handler failure: {0}")]
    ThreadMessage(String),
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("event payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event payload is missing `{0}`")]
    MissingField(&'static str),
}

#[async_trait]
pub trait ThreadMessageService: Send + Sync {
    async fn handle_thread_message(
        &self,
        event: &ThreadMessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    challenge: Option<String>,
    event_id: Option<String>,
    event: Option<InnerEvent>,
}

#[derive(Deserialize)]
struct InnerEvent {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
    bot_id: Option<String>,
    user: Option<String>,
    channel: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    client_msg_id: Option<String>,
}

pub fn parse_event_payload(body: &[u8]) -> Result<SlackEvent, EventParseError> {
    let envelope: Envelope = serde_json::from_slice(body)?;

    match envelope.kind.as_str() {
        "url_verification" => {
            let challenge = envelope.challenge.ok_or(EventParseError::MissingField("challenge"))?;
            Ok(SlackEvent::UrlVerification { challenge })
        }
        "event_callback" => {
            let event = envelope.event.ok_or(EventParseError::MissingField("event"))?;
            parse_inner_event(envelope.event_id, event)
        }
        other => Ok(SlackEvent::Ignored {
            reason: IgnoreReason::UnsupportedEnvelope(other.to_owned()),
        }),
    }
}

fn parse_inner_event(
    event_id: Option<String>,
    event: InnerEvent,
) -> Result<SlackEvent, EventParseError> {
    if event.kind != "message" && event.kind != "app_mention" {
        return Ok(SlackEvent::Ignored { reason: IgnoreReason::UnsupportedEvent(event.kind) });
    }
    if event.bot_id.is_some() {
        return Ok(SlackEvent::Ignored { reason: IgnoreReason::BotMessage });
    }
    if let Some(subtype) = event.subtype {
        return Ok(SlackEvent::Ignored { reason: IgnoreReason::Subtype(subtype) });
    }

    let channel_id = event.channel.ok_or(EventParseError::MissingField("event.channel"))?;
    let user_id = event.user.ok_or(EventParseError::MissingField("event.user"))?;
    let ts = event.ts.ok_or(EventParseError::MissingField("event.ts"))?;
    let text = strip_leading_mention(event.text.as_deref().unwrap_or_default());
    if text.is_empty() {
        return Ok(SlackEvent::Ignored { reason: IgnoreReason::EmptyText });
    }

    Ok(SlackEvent::ThreadMessage(ThreadMessageEvent {
        event_id,
        channel_id,
        user_id,
        text,
        ts,
        thread_ts: event.thread_ts,
        client_msg_id: event.client_msg_id,
    }))
}

/// Drops a leading `<@U123>` bot mention so the model sees only the question.
pub fn strip_leading_mention(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("<@") {
        if let Some(end) = rest.find('>') {
            return rest[end + 1..].trim().to_owned();
        }
    }
    trimmed.to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        parse_event_payload, strip_leading_mention, EventContext, EventParseError, IgnoreReason,
        SlackEvent,
    };

    fn parse(value: serde_json::Value) -> SlackEvent {
        parse_event_payload(value.to_string().as_bytes()).expect("payload should parse")
    }

    #[test]
    fn url_verification_exposes_challenge() {
        let event = parse(json!({
            "token": "legacy",
            "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P",
            "type": "url_verification"
        }));

        assert_eq!(
            event,
            SlackEvent::UrlVerification {
                challenge: "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P".to_owned()
            }
        );
    }

    #[test]
    fn top_level_message_becomes_thread_message() {
        let event = parse(json!({
            "type": "event_callback",
            "event_id": "Ev123",
            "event": {
                "type": "message",
                "channel": "C1",
                "user": "U1",
                "text": "How should I start my day?",
                "ts": "1700000000.000100",
                "client_msg_id": "5c1b6a4e"
            }
        }));

        let SlackEvent::ThreadMessage(message) = event else {
            panic!("expected thread message, got {event:?}");
        };
        assert_eq!(message.channel_id, "C1");
        assert_eq!(message.message_id(), "5c1b6a4e");
        assert_eq!(message.reply_thread_ts(), "1700000000.000100");
        assert_eq!(EventContext::for_event(&message).correlation_id, "Ev123");
    }

    #[test]
    fn app_mention_in_thread_strips_mention_and_keeps_thread() {
        let event = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "app_mention",
                "channel": "C1",
                "user": "U1",
                "text": "<@U0BOT> what did I say yesterday?",
                "ts": "1700000100.000200",
                "thread_ts": "1700000000.000100"
            }
        }));

        let SlackEvent::ThreadMessage(message) = event else {
            panic!("expected thread message, got {event:?}");
        };
        assert_eq!(message.text, "what did I say yesterday?");
        assert_eq!(message.reply_thread_ts(), "1700000000.000100");
        assert_eq!(message.message_id(), "1700000100.000200");
    }

    #[test]
    fn bot_and_subtype_messages_are_ignored() {
        let bot = parse(json!({
            "type": "event_callback",
            "event": { "type": "message", "channel": "C1", "bot_id": "B1", "text": "hi", "ts": "1.0" }
        }));
        assert_eq!(bot, SlackEvent::Ignored { reason: IgnoreReason::BotMessage });

        let edited = parse(json!({
            "type": "event_callback",
            "event": { "type": "message", "subtype": "message_changed", "channel": "C1", "ts": "1.0" }
        }));
        assert_eq!(
            edited,
            SlackEvent::Ignored { reason: IgnoreReason::Subtype("message_changed".to_owned()) }
        );
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let reaction = parse(json!({
            "type": "event_callback",
            "event": { "type": "reaction_added", "user": "U1", "reaction": "tada" }
        }));
        assert!(matches!(
            reaction,
            SlackEvent::Ignored { reason: IgnoreReason::UnsupportedEvent(ref kind) } if kind == "reaction_added"
        ));

        let rate_limited = parse(json!({ "type": "app_rate_limited" }));
        assert!(matches!(rate_limited, SlackEvent::Ignored { .. }));
    }

    #[test]
    fn mention_only_message_is_ignored() {
        let event = parse(json!({
            "type": "event_callback",
            "event": { "type": "app_mention", "channel": "C1", "user": "U1", "text": "<@U0BOT>", "ts": "1.0" }
        }));
        assert_eq!(event, SlackEvent::Ignored { reason: IgnoreReason::EmptyText });
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(parse_event_payload(b"not json"), Err(EventParseError::Json(_))));
        assert!(matches!(
            parse_event_payload(br#"{"type":"url_verification"}"#),
            Err(EventParseError::MissingField("challenge"))
        ));
        assert!(matches!(
            parse_event_payload(
                br#"{"type":"event_callback","event":{"type":"message","user":"U1","text":"hi","ts":"1.0"}}"#
            ),
            Err(EventParseError::MissingField("event.channel"))
        ));
    }

    #[test]
    fn mention_stripping_leaves_plain_text_alone() {
        assert_eq!(strip_leading_mention("  plain text "), "plain text");
        assert_eq!(strip_leading_mention("<@U1|bot> hi"), "hi");
        assert_eq!(strip_leading_mention("hi <@U1>"), "hi <@U1>");
    }
}
