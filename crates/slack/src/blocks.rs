use serde::Serialize;

/// Slack rejects `markdown` blocks longer than this many characters.
pub const MARKDOWN_BLOCK_LIMIT: usize = 12_000;
/// Section block text limit.
pub const SECTION_TEXT_LIMIT: usize = 3_000;
/// Slack truncates the top-level `text` of a message past this length.
pub const MESSAGE_TEXT_LIMIT: usize = 40_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
    /// Standard markdown rendered by Slack, as produced by the model.
    Markdown { block_id: String, text: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        let fallback_text = truncate_chars(fallback_text.into(), MESSAGE_TEXT_LIMIT);
        Self { fallback_text, blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn markdown(mut self, block_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = truncate_chars(text.into(), MARKDOWN_BLOCK_LIMIT);
        self.blocks.push(Block::Markdown { block_id: block_id.into(), text });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(truncate_chars(text.into(), SECTION_TEXT_LIMIT)));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(truncate_chars(text.into(), SECTION_TEXT_LIMIT)));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit.saturating_sub(1)) {
        Some((cut, _)) if text.chars().count() > limit => {
            let mut truncated = text[..cut].to_owned();
            truncated.push('…');
            truncated
        }
        _ => text,
    }
}

/// Placeholder posted while the model is working.
pub fn thinking_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text)
        .context("chat.thinking.v1", |context| {
            context.mrkdwn(text);
        })
        .build()
}

pub fn reply_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text).markdown("chat.reply.v1", text).build()
}

pub fn fallback_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text)
        .section("chat.fallback.v1", |section| {
            section.mrkdwn(text);
        })
        .build()
}

pub fn daily_prompt_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text)
        .section("daily.prompt.v1", |section| {
            section.mrkdwn(text);
        })
        .build()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        daily_prompt_message, fallback_message, reply_message, thinking_message, Block,
        MessageBuilder, TextObject, MARKDOWN_BLOCK_LIMIT, MESSAGE_TEXT_LIMIT, SECTION_TEXT_LIMIT,
    };

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .section("chat.summary.v1", |section| {
                section.mrkdwn("*Summary*");
            })
            .context("chat.summary.context.v1", |context| {
                context.plain("generated");
            })
            .build();

        assert_eq!(message.blocks.len(), 2);
        assert!(matches!(
            &message.blocks[0],
            Block::Section {
                block_id,
                text: TextObject::Mrkdwn { .. }
            } if block_id == "chat.summary.v1"
        ));
        assert!(matches!(
            &message.blocks[1],
            Block::Context { block_id, elements } if block_id == "chat.summary.context.v1" && elements.len() == 1
        ));
    }

    #[test]
    fn thinking_placeholder_is_a_context_block() {
        let message = thinking_message(":hourglass_flowing_sand: _Thinking..._");

        assert_eq!(
            serde_json::to_value(&message.blocks).expect("serialize"),
            json!([{
                "type": "context",
                "block_id": "chat.thinking.v1",
                "elements": [{ "type": "mrkdwn", "text": ":hourglass_flowing_sand: _Thinking..._" }]
            }])
        );
        assert_eq!(message.fallback_text, ":hourglass_flowing_sand: _Thinking..._");
    }

    #[test]
    fn reply_uses_markdown_block() {
        let message = reply_message("**Bold** answer");

        assert_eq!(
            serde_json::to_value(&message.blocks).expect("serialize"),
            json!([{ "type": "markdown", "block_id": "chat.reply.v1", "text": "**Bold** answer" }])
        );
    }

    #[test]
    fn long_replies_are_truncated_to_block_limit() {
        let long = "a".repeat(MARKDOWN_BLOCK_LIMIT + 50);
        let message = reply_message(&long);

        let Block::Markdown { text, .. } = &message.blocks[0] else {
            panic!("expected markdown block");
        };
        assert_eq!(text.chars().count(), MARKDOWN_BLOCK_LIMIT);
        assert!(text.ends_with('…'));
        assert_eq!(message.fallback_text.len(), long.len());
    }

    #[test]
    fn plain_text_objects_use_slack_type_name() {
        let value = serde_json::to_value(TextObject::plain("hi")).expect("serialize");
        assert_eq!(value, json!({ "type": "plain_text", "text": "hi" }));
    }

    #[test]
    fn daily_prompt_is_a_single_section() {
        let message = daily_prompt_message("How is your day going?");
        assert_eq!(message.blocks.len(), 1);
        assert!(matches!(&message.blocks[0], Block::Section { .. }));
    }

    #[test]
    fn long_section_text_is_cut_to_section_limit() {
        let long = "é".repeat(SECTION_TEXT_LIMIT + 1);
        let message = fallback_message(&long);

        let Block::Section { text: TextObject::Mrkdwn { text }, .. } = &message.blocks[0] else {
            panic!("expected mrkdwn section");
        };
        assert_eq!(text.chars().count(), SECTION_TEXT_LIMIT);
        assert!(text.ends_with('…'));
        assert_eq!(message.fallback_text, long);
    }

    #[test]
    fn oversized_reply_caps_top_level_text() {
        let long = "b".repeat(MESSAGE_TEXT_LIMIT + 10);
        let message = reply_message(&long);

        assert_eq!(message.fallback_text.chars().count(), MESSAGE_TEXT_LIMIT);
        assert!(message.fallback_text.ends_with('…'));
        let Block::Markdown { text, .. } = &message.blocks[0] else {
            panic!("expected markdown block");
        };
        assert_eq!(text.chars().count(), MARKDOWN_BLOCK_LIMIT);
    }
}
