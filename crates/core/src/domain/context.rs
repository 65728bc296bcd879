use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::conversation::{Message, Role};

/// Static system prompt plus seed turns, loaded once at startup and shared
/// read-only by every conversation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitialContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Error)]
pub enum InitialContextError {
    #[error("could not read initial context `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse initial context `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContextFile {
    Seeds(Vec<SeedMessage>),
    Document {
        #[serde(default)]
        system: Option<String>,
        #[serde(default)]
        messages: Vec<SeedMessage>,
    },
}

#[derive(Deserialize)]
struct SeedMessage {
    role: Role,
    #[serde(alias = "content")]
    text: String,
}

impl InitialContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the context file; a missing file yields an empty context.
    pub fn load(path: &Path) -> Result<Self, InitialContextError> {
        if !path.exists() {
            return Ok(Self::empty());
        }

        let raw = fs::read_to_string(path)
            .map_err(|source| InitialContextError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw, Utc::now())
            .map_err(|source| InitialContextError::Parse { path: path.to_path_buf(), source })
    }

    pub fn from_json_str(raw: &str, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let (system, seeds) = match serde_json::from_str::<ContextFile>(raw)? {
            ContextFile::Seeds(seeds) => (None, seeds),
            ContextFile::Document { system, messages } => (system, messages),
        };

        let system_prompt = system.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty());
        let messages = seeds
            .into_iter()
            .filter(|seed| !seed.text.trim().is_empty())
            .map(|seed| Message::new(seed.role, seed.text).at(now))
            .collect();

        Ok(Self { system_prompt, messages })
    }

    pub fn is_empty(&self) -> bool {
        self.system_prompt.is_none() && self.messages.is_empty()
    }
}
