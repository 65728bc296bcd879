mod support;

use std::sync::Arc;

use parley_agent::{DailyPromptError, DailyPromptUseCase};
use parley_core::config::DEFAULT_DAILY_PROMPT_TEXT;
use parley_slack::blocks::Block;

use support::RecordingSlack;

#[tokio::test]
async fn posts_fixed_text_to_configured_channel() {
    let slack = Arc::new(RecordingSlack::default());
    let daily = DailyPromptUseCase::new(slack.clone(), Some("C-daily".to_owned()), DEFAULT_DAILY_PROMPT_TEXT);

    let posted = daily.run("cron-1").await.expect("daily prompt");

    assert_eq!(posted.channel, "C-daily");
    let posts = slack.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].channel, "C-daily");
    assert_eq!(posts[0].thread_ts, None);
    assert_eq!(posts[0].message.fallback_text, DEFAULT_DAILY_PROMPT_TEXT);
    assert!(matches!(&posts[0].message.blocks[0], Block::Section { block_id, .. } if block_id == "daily.prompt.v1"));
}

#[tokio::test]
async fn missing_or_blank_channel_is_not_configured() {
    let slack = Arc::new(RecordingSlack::default());

    for channel in [None, Some("   ".to_owned())] {
        let daily = DailyPromptUseCase::new(slack.clone(), channel, "hi");
        assert!(matches!(daily.run("cron-1").await, Err(DailyPromptError::ChannelNotConfigured)));
    }
    assert!(slack.posts().is_empty());
}

#[tokio::test]
async fn slack_failure_is_surfaced() {
    let slack = Arc::new(RecordingSlack::default());
    slack.fail_next_posts(1);
    let daily = DailyPromptUseCase::new(slack.clone(), Some("C-daily".to_owned()), "hi");

    let error = daily.run("cron-1").await.expect_err("slack down");
    assert!(matches!(error, DailyPromptError::Slack(_)));
}
