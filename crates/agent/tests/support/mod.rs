#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use parley_agent::{LlmClient, LlmError};
use parley_core::domain::conversation::Message;
use parley_slack::blocks::MessageTemplate;
use parley_slack::{PostedMessage, SlackApi, SlackApiError, SlackIdentity, ThreadMessageEvent};

/// Replays queued completions and records every request it receives.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<(Option<String>, Vec<Message>)>>,
}

impl ScriptedLlm {
    pub fn replying(replies: &[&str]) -> Self {
        let llm = Self::default();
        for reply in replies {
            llm.push(Ok((*reply).to_owned()));
        }
        llm
    }

    pub fn failing(error: LlmError) -> Self {
        let llm = Self::default();
        llm.push(Err(error));
        llm
    }

    pub fn push(&self, reply: Result<String, LlmError>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn requests(&self) -> Vec<(Option<String>, Vec<Message>)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, system: Option<&str>, history: &[Message]) -> Result<String, LlmError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((system.map(str::to_owned), history.to_vec()));
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[derive(Clone, Debug)]
pub struct RecordedPost {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub message: MessageTemplate,
}

#[derive(Clone, Debug)]
pub struct RecordedUpdate {
    pub channel: String,
    pub ts: String,
    pub message: MessageTemplate,
}

/// In-memory Slack that hands out sequential timestamps.
#[derive(Default)]
pub struct RecordingSlack {
    posts: Mutex<Vec<RecordedPost>>,
    updates: Mutex<Vec<RecordedUpdate>>,
    next_ts: AtomicUsize,
    failing_posts: AtomicUsize,
    fail_updates: AtomicBool,
}

impl RecordingSlack {
    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().expect("posts lock").clone()
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().expect("updates lock").clone()
    }

    /// The next `count` posts fail with `channel_not_found`.
    pub fn fail_next_posts(&self, count: usize) {
        self.failing_posts.store(count, Ordering::SeqCst);
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SlackApi for RecordingSlack {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, SlackApiError> {
        let failing = self
            .failing_posts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(SlackApiError::Api {
                method: "chat.postMessage",
                error: "channel_not_found".to_owned(),
            });
        }
        self.posts.lock().expect("posts lock").push(RecordedPost {
            channel: channel.to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
            message: message.clone(),
        });
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PostedMessage { channel: channel.to_owned(), ts: format!("1800000000.{n:06}") })
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SlackApiError::Http { method: "chat.update", status: 500 });
        }
        self.updates.lock().expect("updates lock").push(RecordedUpdate {
            channel: channel.to_owned(),
            ts: ts.to_owned(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn auth_test(&self) -> Result<SlackIdentity, SlackApiError> {
        Ok(SlackIdentity {
            team: Some("Journal".to_owned()),
            user: Some("parley".to_owned()),
            user_id: Some("U0BOT".to_owned()),
            bot_id: Some("B0BOT".to_owned()),
        })
    }
}

pub fn top_level_message(text: &str, ts: &str, client_msg_id: &str) -> ThreadMessageEvent {
    ThreadMessageEvent {
        event_id: Some(format!("Ev-{client_msg_id}")),
        channel_id: "C1".to_owned(),
        user_id: "U1".to_owned(),
        text: text.to_owned(),
        ts: ts.to_owned(),
        thread_ts: None,
        client_msg_id: Some(client_msg_id.to_owned()),
    }
}

pub fn thread_reply(text: &str, ts: &str, thread_ts: &str, client_msg_id: &str) -> ThreadMessageEvent {
    ThreadMessageEvent { thread_ts: Some(thread_ts.to_owned()), ..top_level_message(text, ts, client_msg_id) }
}
