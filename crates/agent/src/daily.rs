use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use parley_core::config::DailyPromptConfig;
use parley_slack::blocks::daily_prompt_message;
use parley_slack::{PostedMessage, SlackApi, SlackApiError};

#[derive(Debug, Error)]
pub enum DailyPromptError {
    #[error("daily_prompt.channel_id is not configured")]
    ChannelNotConfigured,
    #[error(transparent)]
    Slack(#[from] SlackApiError),
}

/// Posts the fixed check-in message to the configured channel.
///
/// Stateless: nothing is stored, and a user's answer starts an ordinary thread
/// conversation.
pub struct DailyPromptUseCase {
    slack: Arc<dyn SlackApi>,
    channel_id: Option<String>,
    text: String,
}

impl DailyPromptUseCase {
    pub fn new(slack: Arc<dyn SlackApi>, channel_id: Option<String>, text: impl Into<String>) -> Self {
        let channel_id = channel_id.map(|id| id.trim().to_owned()).filter(|id| !id.is_empty());
        Self { slack, channel_id, text: text.into() }
    }

    pub fn from_config(slack: Arc<dyn SlackApi>, config: &DailyPromptConfig) -> Self {
        Self::new(slack, config.channel_id.clone(), config.text.clone())
    }

    pub async fn run(&self, correlation_id: &str) -> Result<PostedMessage, DailyPromptError> {
        let channel_id = self.channel_id.as_deref().ok_or(DailyPromptError::ChannelNotConfigured)?;

        let posted = self.slack.post_message(channel_id, None, &daily_prompt_message(&self.text)).await?;
        info!(
            event_name = "daily_prompt.posted",
            correlation_id,
            channel_id,
            ts = %posted.ts,
            "daily prompt posted"
        );
        Ok(posted)
    }
}
