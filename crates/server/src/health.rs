use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use parley_db::ConversationRepository;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    repository: Arc<dyn ConversationRepository>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(repository: Arc<dyn ConversationRepository>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { repository })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(state.repository.as_ref()).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "parley-server accepting requests".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(repository: &dyn ConversationRepository) -> HealthCheck {
    let backend = repository.backend();
    match repository.ping().await {
        Ok(()) => HealthCheck { status: "ready", detail: format!("{backend} store reachable") },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("{backend} store ping failed: {error}") }
        }
    }
}
