use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_agent::{DailyPromptError, DailyPromptUseCase};
use parley_slack::signature::{constant_time_eq, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use parley_slack::{
    parse_event_payload, EventContext, HandlerResult, SignatureVerifier, SlackEvent,
    ThreadMessageService,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const CRON_TOKEN_HEADER: &str = "x-cloud-scheduler-token";
const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub events: Arc<dyn ThreadMessageService>,
    pub daily: Arc<DailyPromptUseCase>,
    pub cron_token: Option<SecretString>,
    /// Cloned into every spawned event task; shutdown waits until all clones drop.
    pub in_flight: mpsc::Sender<()>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/daily", get(daily_prompt).post(daily_prompt))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) =
        state.verifier.verify(header(&headers, TIMESTAMP_HEADER), header(&headers, SIGNATURE_HEADER), &body)
    {
        warn!(
            event_name = "slack.events.rejected",
            correlation_id = "unknown",
            error = %error,
            "slack request failed signature verification"
        );
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let event = match parse_event_payload(&body) {
        Ok(event) => event,
        Err(error) => {
            warn!(
                event_name = "slack.events.malformed",
                correlation_id = "unknown",
                error = %error,
                "slack event payload could not be parsed"
            );
            return (StatusCode::BAD_REQUEST, "malformed event payload").into_response();
        }
    };

    match event {
        SlackEvent::UrlVerification { challenge } => {
            info!(
                event_name = "slack.events.url_verification",
                correlation_id = "url_verification",
                "answering slack url verification"
            );
            Json(json!({ "challenge": challenge })).into_response()
        }
        SlackEvent::ThreadMessage(message) => {
            let ctx = EventContext::for_event(&message);
            info!(
                event_name = "slack.events.accepted",
                correlation_id = %ctx.correlation_id,
                channel_id = %message.channel_id,
                retry_num = header(&headers, RETRY_NUM_HEADER).unwrap_or("0"),
                "slack message accepted for processing"
            );

            let events = state.events.clone();
            let in_flight = state.in_flight.clone();
            tokio::spawn(async move {
                let _in_flight = in_flight;
                match events.handle_thread_message(&message, &ctx).await {
                    Ok(HandlerResult::Processed) => {}
                    Ok(HandlerResult::Ignored) => debug!(
                        event_name = "slack.events.skipped",
                        correlation_id = %ctx.correlation_id,
                        "slack message skipped by handler"
                    ),
                    Err(error) => error!(
                        event_name = "slack.events.failed",
                        correlation_id = %ctx.correlation_id,
                        error = %error,
                        "slack message handling failed"
                    ),
                }
            });
            StatusCode::OK.into_response()
        }
        SlackEvent::Ignored { reason } => {
            debug!(
                event_name = "slack.events.ignored",
                correlation_id = "unknown",
                reason = reason.label(),
                "slack event ignored"
            );
            StatusCode::OK.into_response()
        }
    }
}

/// Rejects when no token is configured, so an unset secret never opens the
/// endpoint. Blank values on either side never match.
fn cron_authorized(expected: Option<&SecretString>, provided: Option<&str>) -> bool {
    let expected = expected.map(|secret| secret.expose_secret().trim()).unwrap_or_default();
    let provided = provided.map(str::trim).unwrap_or_default();
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

pub async fn daily_prompt(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let correlation_id = uuid::Uuid::new_v4().to_string();

    if !cron_authorized(state.cron_token.as_ref(), header(&headers, CRON_TOKEN_HEADER)) {
        warn!(
            event_name = "daily_prompt.rejected",
            correlation_id = %correlation_id,
            "daily prompt trigger missing a valid scheduler token"
        );
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    match state.daily.run(&correlation_id).await {
        Ok(posted) => (
            StatusCode::OK,
            Json(json!({ "status": "posted", "channel": posted.channel, "ts": posted.ts })),
        )
            .into_response(),
        Err(error @ DailyPromptError::ChannelNotConfigured) => {
            warn!(
                event_name = "daily_prompt.unconfigured",
                correlation_id = %correlation_id,
                "daily prompt triggered without a channel"
            );
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": error.to_string() })))
                .into_response()
        }
        Err(error @ DailyPromptError::Slack(_)) => {
            error!(
                event_name = "daily_prompt.failed",
                correlation_id = %correlation_id,
                error = %error,
                "daily prompt could not be posted"
            );
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": error.to_string() }))).into_response()
        }
    }
}
