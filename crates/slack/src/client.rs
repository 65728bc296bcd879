use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::MessageTemplate;

#[derive(Debug, Error)]
pub enum SlackApiError {
    #[error("slack {method} request failed: {message}")]
    Transport { method: &'static str, message: String },
    #[error("slack {method} returned HTTP {status}")]
    Http { method: &'static str, status: u16 },
    #[error("slack {method} failed: {error}")]
    Api { method: &'static str, error: String },
    #[error("slack {method} response could not be decoded: {message}")]
    Decode { method: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlackIdentity {
    pub team: Option<String>,
    pub user: Option<String>,
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
}

/// The Slack Web API calls parley needs.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError>;

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError>;

    async fn auth_test(&self) -> Result<SlackIdentity, SlackApiError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    channel: Option<String>,
    ts: Option<String>,
}

pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(
        api_base: &str,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, SlackApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SlackApiError::Transport { method: "client", message: e.to_string() })?;

        Ok(Self { http, api_base: api_base.trim_end_matches('/').to_owned(), bot_token })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        payload: &Value,
    ) -> Result<T, SlackApiError> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(self.bot_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|e| SlackApiError::Transport { method, message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackApiError::Http { method, status: status.as_u16() });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SlackApiError::Decode { method, message: e.to_string() })?;
        if !envelope.ok {
            return Err(SlackApiError::Api {
                method,
                error: envelope.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }

        debug!(event_name = "slack.api.ok", method, "slack web api call succeeded");
        envelope.body.ok_or(SlackApiError::Decode { method, message: "empty body".to_owned() })
    }
}

fn message_payload(channel: &str, message: &MessageTemplate) -> Value {
    json!({
        "channel": channel,
        "text": message.fallback_text,
        "blocks": message.blocks,
        "mrkdwn": true,
        "unfurl_links": false,
    })
}

#[async_trait]
impl SlackApi for SlackWebClient {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError> {
        let mut payload = message_payload(channel, message);
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_owned());
        }

        let body: ChatMessageBody = self.call("chat.postMessage", &payload).await?;
        let ts = body.ts.ok_or(SlackApiError::Decode {
            method: "chat.postMessage",
            message: "response did not include ts".to_owned(),
        })?;
        Ok(PostedMessage { channel: body.channel.unwrap_or_else(|| channel.to_owned()), ts })
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        let mut payload = message_payload(channel, message);
        payload["ts"] = Value::String(ts.to_owned());

        let _: ChatMessageBody = self.call("chat.update", &payload).await?;
        Ok(())
    }

    async fn auth_test(&self) -> Result<SlackIdentity, SlackApiError> {
        self.call("auth.test", &json!({})).await
    }
}
