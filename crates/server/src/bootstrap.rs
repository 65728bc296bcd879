use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parley_agent::{ChatSettings, ChatUseCase, DailyPromptUseCase, GeminiClient, LlmError};
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_core::domain::context::{InitialContext, InitialContextError};
use parley_db::{open_repository, ConversationRepository, RepositoryError};
use parley_slack::{SignatureVerifier, SlackApi, SlackApiError, SlackWebClient};
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{health, routes};

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Application {
    pub config: AppConfig,
    pub repository: Arc<dyn ConversationRepository>,
    pub chat: Arc<ChatUseCase>,
    pub daily: Arc<DailyPromptUseCase>,
    pub verifier: Arc<SignatureVerifier>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("conversation store could not be opened: {0}")]
    Repository(#[source] RepositoryError),
    #[error(transparent)]
    InitialContext(#[from] InitialContextError),
    #[error("llm client could not be built: {0}")]
    Llm(#[source] LlmError),
    #[error("slack client could not be built: {0}")]
    Slack(#[source] SlackApiError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        database_client = config.database.client.as_str(),
        "starting application bootstrap"
    );

    let repository = open_repository(&config.database).await.map_err(BootstrapError::Repository)?;
    info!(
        event_name = "system.bootstrap.store_opened",
        correlation_id = "bootstrap",
        backend = repository.backend(),
        "conversation store ready"
    );

    let context = InitialContext::load(&config.chat.initial_context_path)?;
    info!(
        event_name = "system.bootstrap.context_loaded",
        correlation_id = "bootstrap",
        path = %config.chat.initial_context_path.display(),
        has_system_prompt = context.system_prompt.is_some(),
        seed_messages = context.messages.len(),
        "initial context loaded"
    );

    let llm = GeminiClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    let slack: Arc<dyn SlackApi> = Arc::new(
        SlackWebClient::new(&config.slack.api_base_url, config.slack.bot_token.clone(), SLACK_TIMEOUT)
            .map_err(BootstrapError::Slack)?,
    );

    let chat = ChatUseCase::new(
        repository.clone(),
        Arc::new(llm),
        slack.clone(),
        Arc::new(context),
        ChatSettings::from(&config.chat),
    );
    let daily = DailyPromptUseCase::from_config(slack, &config.daily_prompt);
    let verifier = SignatureVerifier::new(config.slack.signing_secret.clone());

    Ok(Application {
        config,
        repository,
        chat: Arc::new(chat),
        daily: Arc::new(daily),
        verifier: Arc::new(verifier),
    })
}

impl Application {
    /// Full HTTP surface: Slack events, the daily trigger, and health.
    pub fn router(&self, in_flight: mpsc::Sender<()>) -> Router {
        let state = routes::AppState {
            verifier: self.verifier.clone(),
            events: self.chat.clone(),
            daily: self.daily.clone(),
            cron_token: self.config.daily_prompt.cron_token.clone(),
            in_flight,
        };

        routes::router(state)
            .merge(health::router(self.repository.clone()))
            .layer(TraceLayer::new_for_http())
    }
}
