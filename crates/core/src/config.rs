use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub daily_prompt: DailyPromptConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub client: DatabaseClient,
    pub collection: String,
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub firestore: FirestoreConfig,
    pub mongodb: MongoConfig,
}

#[derive(Clone, Debug)]
pub struct FirestoreConfig {
    pub project_id: Option<String>,
    pub database_id: String,
    pub base_url: String,
    pub emulator_host: Option<String>,
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct MongoConfig {
    pub uri: Option<SecretString>,
    pub database: String,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: SecretString,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub initial_context_path: PathBuf,
    pub thinking_text: String,
    pub fallback_text: String,
}

#[derive(Clone, Debug)]
pub struct DailyPromptConfig {
    pub channel_id: Option<String>,
    pub text: String,
    pub cron_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseClient {
    Firestore,
    Mongodb,
    Sqlite,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_client: Option<DatabaseClient>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub initial_context_path: Option<PathBuf>,
    pub daily_prompt_channel_id: Option<String>,
    pub daily_prompt_cron_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_THINKING_TEXT: &str = ":hourglass_flowing_sand: _Thinking..._";
pub const DEFAULT_FALLBACK_TEXT: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";
pub const DEFAULT_DAILY_PROMPT_TEXT: &str =
    "Good morning! How is your day going? Share a thought on your day or anything that stood out to you recently.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                client: DatabaseClient::Firestore,
                collection: "conversations".to_string(),
                url: "sqlite://parley.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                firestore: FirestoreConfig {
                    project_id: None,
                    database_id: "(default)".to_string(),
                    base_url: "https://firestore.googleapis.com/v1".to_string(),
                    emulator_host: None,
                    access_token: None,
                },
                mongodb: MongoConfig { uri: None, database: "parley".to_string() },
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.0-flash".to_string(),
                timeout_secs: 60,
                temperature: 0.7,
                top_p: None,
                top_k: None,
                max_output_tokens: None,
            },
            chat: ChatConfig {
                initial_context_path: PathBuf::from("static/initial_context.json"),
                thinking_text: DEFAULT_THINKING_TEXT.to_string(),
                fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
            },
            daily_prompt: DailyPromptConfig {
                channel_id: None,
                text: DEFAULT_DAILY_PROMPT_TEXT.to_string(),
                cron_token: None,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

/// Blank shared secrets count as unset.
fn optional_secret(value: String) -> Option<SecretString> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| secret_value(trimmed.to_string()))
}

impl std::str::FromStr for DatabaseClient {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported database client `{other}` (expected firestore|mongodb|sqlite|memory)"
            ))),
        }
    }
}

impl DatabaseClient {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firestore => "firestore",
            Self::Mongodb => "mongodb",
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// Model name without the `models/` resource prefix.
    pub fn model_name(&self) -> &str {
        self.model.trim().trim_start_matches("models/")
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(client) = database.client {
                self.database.client = client;
            }
            if let Some(collection) = database.collection {
                self.database.collection = collection;
            }
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(project_id) = database.firestore_project {
                self.database.firestore.project_id = Some(project_id);
            }
            if let Some(database_id) = database.firestore_database {
                self.database.firestore.database_id = database_id;
            }
            if let Some(base_url) = database.firestore_base_url {
                self.database.firestore.base_url = base_url;
            }
            if let Some(emulator_host) = database.firestore_emulator_host {
                self.database.firestore.emulator_host = Some(emulator_host);
            }
            if let Some(access_token) = database.firestore_access_token {
                self.database.firestore.access_token = Some(secret_value(access_token));
            }
            if let Some(uri) = database.mongodb_uri {
                self.database.mongodb.uri = Some(secret_value(uri));
            }
            if let Some(name) = database.mongodb_database {
                self.database.mongodb.database = name;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(top_p) = llm.top_p {
                self.llm.top_p = Some(top_p);
            }
            if let Some(top_k) = llm.top_k {
                self.llm.top_k = Some(top_k);
            }
            if let Some(max_output_tokens) = llm.max_output_tokens {
                self.llm.max_output_tokens = Some(max_output_tokens);
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(path) = chat.initial_context_path {
                self.chat.initial_context_path = path;
            }
            if let Some(thinking_text) = chat.thinking_text {
                self.chat.thinking_text = thinking_text;
            }
            if let Some(fallback_text) = chat.fallback_text {
                self.chat.fallback_text = fallback_text;
            }
        }

        if let Some(daily_prompt) = patch.daily_prompt {
            if let Some(channel_id) = daily_prompt.channel_id {
                self.daily_prompt.channel_id = Some(channel_id);
            }
            if let Some(text) = daily_prompt.text {
                self.daily_prompt.text = text;
            }
            if let Some(cron_token) = daily_prompt.cron_token {
                self.daily_prompt.cron_token = optional_secret(cron_token);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_CLIENT") {
            self.database.client = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_COLLECTION") {
            self.database.collection = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let firestore_project =
            read_env("PARLEY_FIRESTORE_PROJECT").or_else(|| read_env("GOOGLE_CLOUD_PROJECT"));
        if let Some(value) = firestore_project {
            self.database.firestore.project_id = Some(value);
        }
        if let Some(value) = read_env("PARLEY_FIRESTORE_DATABASE") {
            self.database.firestore.database_id = value;
        }
        if let Some(value) = read_env("FIRESTORE_EMULATOR_HOST") {
            self.database.firestore.emulator_host = Some(value);
        }
        if let Some(value) = read_env("PARLEY_FIRESTORE_ACCESS_TOKEN") {
            self.database.firestore.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_MONGODB_URI") {
            self.database.mongodb.uri = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_MONGODB_DATABASE") {
            self.database.mongodb.database = value;
        }

        if let Some(value) = read_env("PARLEY_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("PARLEY_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_MAX_OUTPUT_TOKENS") {
            self.llm.max_output_tokens = Some(parse_u32("PARLEY_LLM_MAX_OUTPUT_TOKENS", &value)?);
        }

        if let Some(value) = read_env("PARLEY_CHAT_INITIAL_CONTEXT_PATH") {
            self.chat.initial_context_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("PARLEY_CHAT_FALLBACK_TEXT") {
            self.chat.fallback_text = value;
        }

        if let Some(value) = read_env("PARLEY_DAILY_PROMPT_CHANNEL_ID") {
            self.daily_prompt.channel_id = Some(value);
        }
        if let Some(value) = read_env("PARLEY_DAILY_PROMPT_TEXT") {
            self.daily_prompt.text = value;
        }
        if let Some(value) = read_env("PARLEY_DAILY_PROMPT_CRON_TOKEN") {
            self.daily_prompt.cron_token = optional_secret(value);
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        // Managed runtimes inject `PORT`; the explicit variable still wins.
        if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(client) = overrides.database_client {
            self.database.client = client;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(slack_signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(slack_signing_secret);
        }
        if let Some(path) = overrides.initial_context_path {
            self.chat.initial_context_path = path;
        }
        if let Some(channel_id) = overrides.daily_prompt_channel_id {
            self.daily_prompt.channel_id = Some(channel_id);
        }
        if let Some(cron_token) = overrides.daily_prompt_cron_token {
            self.daily_prompt.cron_token = optional_secret(cron_token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_chat(&self.chat)?;
        validate_daily_prompt(&self.daily_prompt)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

/// Path of the config file `load` would read, if any.
pub fn detect_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    resolve_config_path(explicit_path)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if database.collection.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database.collection must not be empty".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match database.client {
        DatabaseClient::Sqlite => {
            let url = database.url.trim();
            let sqlite_url =
                url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
            if !sqlite_url {
                return Err(ConfigError::Validation(
                    "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                        .to_string(),
                ));
            }
            if database.max_connections == 0 {
                return Err(ConfigError::Validation(
                    "database.max_connections must be greater than zero".to_string(),
                ));
            }
        }
        DatabaseClient::Firestore => {
            let missing = database
                .firestore
                .project_id
                .as_ref()
                .map(|value| value.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "database.firestore_project is required for the firestore client (or set GOOGLE_CLOUD_PROJECT)"
                        .to_string(),
                ));
            }
        }
        DatabaseClient::Mongodb => {
            let Some(uri) = database.mongodb.uri.as_ref() else {
                return Err(ConfigError::Validation(
                    "database.mongodb_uri is required for the mongodb client".to_string(),
                ));
            };
            let uri = uri.expose_secret();
            if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
                return Err(ConfigError::Validation(
                    "database.mongodb_uri must start with `mongodb://` or `mongodb+srv://`"
                        .to_string(),
                ));
            }
            if database.mongodb.database.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "database.mongodb_database must not be empty".to_string(),
                ));
            }
        }
        DatabaseClient::Memory => {}
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.signing_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required. Get it from https://api.slack.com/apps > Your App > Basic Information > Signing Secret".to_string()
        ));
    }

    if !slack.api_base_url.starts_with("http://") && !slack.api_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model_name().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if let Some(top_p) = llm.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ConfigError::Validation(
                "llm.top_p must be in range 0.0..=1.0".to_string(),
            ));
        }
    }

    match llm.provider {
        LlmProvider::Gemini => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the gemini provider. Create one at https://aistudio.google.com/app/apikey"
                        .to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.fallback_text.trim().is_empty() {
        return Err(ConfigError::Validation("chat.fallback_text must not be empty".to_string()));
    }
    Ok(())
}

fn validate_daily_prompt(daily_prompt: &DailyPromptConfig) -> Result<(), ConfigError> {
    if daily_prompt.text.trim().is_empty() {
        return Err(ConfigError::Validation("daily_prompt.text must not be empty".to_string()));
    }

    let has_token = daily_prompt
        .cron_token
        .as_ref()
        .map(|value| !value.expose_secret().trim().is_empty())
        .unwrap_or(false);
    let has_channel =
        daily_prompt.channel_id.as_ref().map(|value| !value.trim().is_empty()).unwrap_or(false);
    if has_token && !has_channel {
        return Err(ConfigError::Validation(
            "daily_prompt.channel_id is required when daily_prompt.cron_token is set".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    chat: Option<ChatPatch>,
    daily_prompt: Option<DailyPromptPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    client: Option<DatabaseClient>,
    collection: Option<String>,
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    firestore_project: Option<String>,
    firestore_database: Option<String>,
    firestore_base_url: Option<String>,
    firestore_emulator_host: Option<String>,
    firestore_access_token: Option<String>,
    mongodb_uri: Option<String>,
    mongodb_database: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    initial_context_path: Option<PathBuf>,
    thinking_text: Option<String>,
    fallback_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyPromptPatch {
    channel_id: Option<String>,
    text: Option<String>,
    cron_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
