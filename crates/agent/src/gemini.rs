use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use parley_core::config::LlmConfig;
use parley_core::domain::conversation::{Message, Role};

use crate::llm::{LlmClient, LlmError};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerationSettings {
    fn to_json(&self) -> Value {
        let mut config = Map::new();
        config.insert("temperature".into(), json!(self.temperature));
        if let Some(top_p) = self.top_p {
            config.insert("topP".into(), json!(top_p));
        }
        if let Some(top_k) = self.top_k {
            config.insert("topK".into(), json!(top_k));
        }
        if let Some(max_output_tokens) = self.max_output_tokens {
            config.insert("maxOutputTokens".into(), json!(max_output_tokens));
        }
        Value::Object(config)
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    generation: GenerationSettings,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: &str,
        generation: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model: model.trim().trim_start_matches("models/").to_owned(),
            generation,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::InvalidRequest("llm.api_key is not configured".into()))?;

        Self::new(
            &config.base_url,
            api_key,
            config.model_name(),
            GenerationSettings {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
            },
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Builds the request body.
///
/// System turns join the configured system prompt in `systemInstruction`;
/// blank turns are dropped and consecutive turns from one side are merged, so
/// `contents` alternates between `user` and `model`.
pub fn build_request_body(
    system: Option<&str>,
    history: &[Message],
    generation: &GenerationSettings,
) -> Result<Value, LlmError> {
    let mut instructions: Vec<&str> = system
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .into_iter()
        .collect();
    let mut contents: Vec<(&'static str, Vec<&str>)> = Vec::new();

    for message in history {
        let text = message.text.trim();
        if text.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::System => {
                instructions.push(text);
                continue;
            }
            Role::User => "user",
            Role::Assistant => "model",
        };
        match contents.last_mut() {
            Some((last_role, parts)) if *last_role == role => parts.push(text),
            _ => contents.push((role, vec![text])),
        }
    }

    if contents.is_empty() {
        return Err(LlmError::InvalidRequest("conversation has no user or model turns".into()));
    }

    let contents: Vec<Value> = contents
        .into_iter()
        .map(|(role, parts)| {
            let parts: Vec<Value> = parts.into_iter().map(|text| json!({ "text": text })).collect();
            json!({ "role": role, "parts": parts })
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation.to_json(),
    });
    if !instructions.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": instructions.join("\n\n") }] });
    }
    Ok(body)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub fn parse_response(raw: &str) -> Result<String, LlmError> {
    let response: GenerateContentResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::Decode(e.to_string()))?;

    if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
        return Err(LlmError::Blocked(reason));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(LlmError::EmptyResponse);
    };

    let text = candidate
        .content
        .map(|content| {
            content.parts.into_iter().filter_map(|part| part.text).collect::<Vec<_>>().join("")
        })
        .unwrap_or_default();
    let text = text.trim();

    if text.is_empty() {
        return match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                Err(LlmError::Blocked(reason.to_owned()))
            }
            _ => Err(LlmError::EmptyResponse),
        };
    }
    Ok(text.to_owned())
}

fn error_message(raw: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(raw)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| raw.chars().take(512).collect())
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, system: Option<&str>, history: &[Message]) -> Result<String, LlmError> {
        let body = build_request_body(system, history, &self.generation)?;

        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let raw = response.text().await.map_err(|e| LlmError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Http { status: status.as_u16(), message: error_message(&raw) });
        }

        let text = parse_response(&raw)?;
        debug!(
            event_name = "llm.gemini.completed",
            model = %self.model,
            turns = history.len(),
            reply_chars = text.chars().count(),
            "gemini completion received"
        );
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use secrecy::SecretString;
    use serde_json::json;

    use parley_core::domain::conversation::Message;

    use super::{build_request_body, parse_response, GeminiClient, GenerationSettings};
    use crate::llm::{LlmClient, LlmError};

    fn settings() -> GenerationSettings {
        GenerationSettings { temperature: 0.7, ..GenerationSettings::default() }
    }

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(
            &server.url("/v1beta"),
            SecretString::from("gemini-test-key".to_string()),
            "models/gemini-2.0-flash",
            settings(),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[test]
    fn body_maps_roles_and_collects_system_instruction() {
        let history = vec![
            Message::system("You keep a gratitude journal."),
            Message::assistant("Hi! What went well today?"),
            Message::user("I finished a book.", "U1"),
        ];

        let body = build_request_body(Some("Be warm."), &history, &settings()).expect("body");

        assert_eq!(
            body["systemInstruction"],
            json!({ "parts": [{ "text": "Be warm.\n\nYou keep a gratitude journal." }] })
        );
        assert_eq!(
            body["contents"],
            json!([
                { "role": "model", "parts": [{ "text": "Hi! What went well today?" }] },
                { "role": "user", "parts": [{ "text": "I finished a book." }] }
            ])
        );
        assert_eq!(body["generationConfig"], json!({ "temperature": 0.7_f32 }));
    }

    #[test]
    fn body_merges_consecutive_turns_and_skips_blank_ones() {
        let history = vec![
            Message::user("first", "U1"),
            Message::assistant("   "),
            Message::user("second", "U1"),
        ];

        let body = build_request_body(None, &history, &settings()).expect("body");

        assert!(body.get("systemInstruction").is_none());
        assert_eq!(
            body["contents"],
            json!([{ "role": "user", "parts": [{ "text": "first" }, { "text": "second" }] }])
        );
    }

    #[test]
    fn body_without_turns_is_rejected() {
        let error = build_request_body(Some("system"), &[Message::system("only")], &settings())
            .expect_err("no turns");
        assert!(matches!(error, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn optional_generation_settings_are_emitted_in_camel_case() {
        let generation = GenerationSettings {
            temperature: 0.5,
            top_p: Some(0.9),
            top_k: Some(40),
            max_output_tokens: Some(512),
        };
        let body = build_request_body(None, &[Message::user("hi", "U1")], &generation).expect("body");

        assert_eq!(body["generationConfig"]["topK"], json!(40));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(512));
        assert!(body["generationConfig"].get("topP").is_some());
    }

    #[test]
    fn response_text_parts_are_joined() {
        let raw = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "there." }] },
                "finishReason": "STOP"
            }]
        })
        .to_string();

        assert_eq!(parse_response(&raw).expect("text"), "Hello there.");
    }

    #[test]
    fn blocked_and_empty_responses_are_errors() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        assert!(matches!(parse_response(&blocked), Err(LlmError::Blocked(reason)) if reason == "SAFETY"));

        let no_candidates = json!({ "candidates": [] }).to_string();
        assert!(matches!(parse_response(&no_candidates), Err(LlmError::EmptyResponse)));

        let safety_stop = json!({ "candidates": [{ "finishReason": "SAFETY" }] }).to_string();
        assert!(matches!(parse_response(&safety_stop), Err(LlmError::Blocked(_))));

        assert!(matches!(parse_response("<html>"), Err(LlmError::Decode(_))));
    }

    #[tokio::test]
    async fn complete_posts_to_generate_content_with_api_key_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-2.0-flash:generateContent")
                .header("x-goog-api-key", "gemini-test-key")
                .body_includes("\"role\":\"user\"")
                .body_includes("What should I journal about?");
            then.status(200).json_body(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Try three small wins." }] },
                    "finishReason": "STOP"
                }]
            }));
        });

        let client = client(&server);
        let reply = client
            .complete(None, &[Message::user("What should I journal about?", "U1")])
            .await
            .expect("completion");

        assert_eq!(reply, "Try three small wins.");
        assert_eq!(client.model(), "gemini-2.0-flash");
        mock.assert();
    }

    #[tokio::test]
    async fn provider_errors_surface_status_and_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1beta/models/gemini-2.0-flash:generateContent");
            then.status(429).json_body(json!({
                "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
            }));
        });

        let error = client(&server)
            .complete(None, &[Message::user("hello", "U1")])
            .await
            .expect_err("rate limited");

        assert!(matches!(
            error,
            LlmError::Http { status: 429, ref message } if message == "Resource has been exhausted"
        ));
    }
}
