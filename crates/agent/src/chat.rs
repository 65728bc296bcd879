use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use parley_core::config::{ChatConfig, DEFAULT_FALLBACK_TEXT, DEFAULT_THINKING_TEXT};
use parley_core::domain::context::InitialContext;
use parley_core::domain::conversation::{ConversationKey, Message};
use parley_core::errors::ApplicationError;
use parley_db::ConversationRepository;
use parley_slack::blocks::{fallback_message, reply_message, thinking_message};
use parley_slack::{
    EventContext, EventHandlerError, HandlerResult, PostedMessage, SlackApi, SlackApiError,
    ThreadMessageEvent, ThreadMessageService,
};

use crate::llm::{LlmClient, LlmError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSettings {
    pub thinking_text: String,
    pub fallback_text: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            thinking_text: DEFAULT_THINKING_TEXT.to_owned(),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_owned(),
        }
    }
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self { thinking_text: config.thinking_text.clone(), fallback_text: config.fallback_text.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The model's reply is stored and visible in the thread.
    Replied { reply_ts: String },
    /// The message was already stored; nothing was sent.
    Duplicate,
    /// Something failed; the user was sent the fallback text if Slack allowed it.
    Failed { fallback_delivered: bool },
}

/// Handles one user message: store it, ask the model, reply in the thread.
pub struct ChatUseCase {
    repository: Arc<dyn ConversationRepository>,
    llm: Arc<dyn LlmClient>,
    slack: Arc<dyn SlackApi>,
    context: Arc<InitialContext>,
    settings: ChatSettings,
}

impl ChatUseCase {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        llm: Arc<dyn LlmClient>,
        slack: Arc<dyn SlackApi>,
        context: Arc<InitialContext>,
        settings: ChatSettings,
    ) -> Self {
        Self { repository, llm, slack, context, settings }
    }

    pub async fn handle(&self, event: &ThreadMessageEvent, ctx: &EventContext) -> ChatOutcome {
        let key = ConversationKey::for_event(&event.channel_id, &event.ts, event.thread_ts.as_deref());
        let thread_ts = event.reply_thread_ts();

        info!(
            event_name = "chat.message.received",
            correlation_id = %ctx.correlation_id,
            channel_id = %key.channel_id,
            thread_id = %key.thread_id,
            user_id = %event.user_id,
            "chat message received"
        );

        let conversation = match self.repository.initialize(&key, &self.context.messages).await {
            Ok(conversation) => conversation,
            Err(error) => {
                return self.fail(ctx, &key, thread_ts, None, "initialize", ApplicationError::Persistence(error.to_string())).await;
            }
        };

        let user_message = Message::user(event.text.clone(), event.user_id.clone())
            .with_message_id(event.message_id())
            .at(Utc::now());
        match self.repository.append_message(&key, user_message.clone()).await {
            Ok(()) => {}
            Err(error) if error.is_duplicate() => {
                info!(
                    event_name = "chat.message.duplicate",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %key.channel_id,
                    thread_id = %key.thread_id,
                    message_id = %event.message_id(),
                    "message already stored; skipping"
                );
                return ChatOutcome::Duplicate;
            }
            Err(error) => {
                return self.fail(ctx, &key, thread_ts, None, "append_user", ApplicationError::Persistence(error.to_string())).await;
            }
        }

        let placeholder = match self
            .slack
            .post_message(&key.channel_id, Some(thread_ts), &thinking_message(&self.settings.thinking_text))
            .await
        {
            Ok(posted) => Some(posted),
            Err(error) => {
                warn!(
                    event_name = "chat.placeholder.failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %key.channel_id,
                    thread_id = %key.thread_id,
                    error = %error,
                    "could not post thinking placeholder"
                );
                None
            }
        };

        let mut history = conversation.messages;
        history.push(user_message);

        let reply = match self.llm.complete(self.context.system_prompt.as_deref(), &history).await {
            Ok(reply) => reply,
            Err(error) => {
                let cause = match error {
                    LlmError::Blocked(_) => ApplicationError::Refused(error.to_string()),
                    _ => ApplicationError::Integration(error.to_string()),
                };
                return self.fail(ctx, &key, thread_ts, placeholder.as_ref(), "llm", cause).await;
            }
        };

        if let Err(error) =
            self.repository.append_message(&key, Message::assistant(reply.clone()).at(Utc::now())).await
        {
            return self
                .fail(ctx, &key, thread_ts, placeholder.as_ref(), "append_assistant", ApplicationError::Persistence(error.to_string()))
                .await;
        }

        let delivered = self.deliver(&key.channel_id, thread_ts, placeholder.as_ref(), &reply).await;
        match delivered {
            Ok(reply_ts) => {
                info!(
                    event_name = "chat.reply.sent",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %key.channel_id,
                    thread_id = %key.thread_id,
                    model = %self.llm.model(),
                    turns = history.len() + 1,
                    "reply delivered"
                );
                ChatOutcome::Replied { reply_ts }
            }
            Err(error) => self.fail(ctx, &key, thread_ts, placeholder.as_ref(), "deliver", ApplicationError::Integration(error.to_string())).await,
        }
    }

    async fn deliver(
        &self,
        channel_id: &str,
        thread_ts: &str,
        placeholder: Option<&PostedMessage>,
        reply: &str,
    ) -> Result<String, SlackApiError> {
        let message = reply_message(reply);
        match placeholder {
            Some(posted) => {
                self.slack.update_message(&posted.channel, &posted.ts, &message).await?;
                Ok(posted.ts.clone())
            }
            None => Ok(self.slack.post_message(channel_id, Some(thread_ts), &message).await?.ts),
        }
    }

    /// Logs the failure and sends the user-facing message exactly once.
    async fn fail(
        &self,
        ctx: &EventContext,
        key: &ConversationKey,
        thread_ts: &str,
        placeholder: Option<&PostedMessage>,
        stage: &'static str,
        cause: ApplicationError,
    ) -> ChatOutcome {
        let failure = cause.into_interface(ctx.correlation_id.clone());
        error!(
            event_name = "chat.message.failed",
            correlation_id = %ctx.correlation_id,
            channel_id = %key.channel_id,
            thread_id = %key.thread_id,
            stage,
            error = %failure,
            "chat message handling failed"
        );

        let message = fallback_message(failure.user_message(&self.settings.fallback_text));
        let sent = match placeholder {
            Some(posted) => self.slack.update_message(&posted.channel, &posted.ts, &message).await,
            None => self.slack.post_message(&key.channel_id, Some(thread_ts), &message).await.map(|_| ()),
        };

        if let Err(error) = &sent {
            error!(
                event_name = "chat.fallback.failed",
                correlation_id = %ctx.correlation_id,
                channel_id = %key.channel_id,
                thread_id = %key.thread_id,
                error = %error,
                "could not deliver fallback message"
            );
        }
        ChatOutcome::Failed { fallback_delivered: sent.is_ok() }
    }
}

#[async_trait]
impl ThreadMessageService for ChatUseCase {
    async fn handle_thread_message(
        &self,
        event: &ThreadMessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        match self.handle(event, ctx).await {
            ChatOutcome::Replied { .. } => Ok(HandlerResult::Processed),
            ChatOutcome::Duplicate => Ok(HandlerResult::Ignored),
            ChatOutcome::Failed { fallback_delivered } => Err(EventHandlerError::ThreadMessage(
                format!("chat handling failed (fallback delivered: {fallback_delivered})"),
            )),
        }
    }
}
