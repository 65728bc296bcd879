use std::time::Duration;

use parley_core::config::{AppConfig, LoadOptions};
use parley_core::domain::context::InitialContext;
use parley_db::open_repository;
use parley_slack::{SlackApi, SlackWebClient};
use serde::Serialize;

use crate::commands::{exit, CommandResult};

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { exit::DOCTOR };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_initial_context(&config));
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    checks.push(runtime.block_on(check_slack_token(&config)));
                    checks.push(runtime.block_on(check_store(&config)));
                }
                Err(error) => {
                    let details = format!("failed to initialize async runtime: {error}");
                    checks.push(DoctorCheck::fail("slack_token_readiness", details.clone()));
                    checks.push(DoctorCheck::fail("store_connectivity", details));
                }
            }
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("initial_context"));
            checks.push(DoctorCheck::skipped("slack_token_readiness"));
            checks.push(DoctorCheck::skipped("store_connectivity"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_initial_context(config: &AppConfig) -> DoctorCheck {
    let path = &config.chat.initial_context_path;
    match InitialContext::load(path) {
        Ok(context) if context.is_empty() => DoctorCheck::pass(
            "initial_context",
            format!("no initial context at `{}`; conversations start empty", path.display()),
        ),
        Ok(context) => DoctorCheck::pass(
            "initial_context",
            format!(
                "loaded `{}` (system prompt: {}, seed messages: {})",
                path.display(),
                if context.system_prompt.is_some() { "yes" } else { "no" },
                context.messages.len()
            ),
        ),
        Err(error) => DoctorCheck::fail("initial_context", error.to_string()),
    }
}

async fn check_slack_token(config: &AppConfig) -> DoctorCheck {
    let client = match SlackWebClient::new(
        &config.slack.api_base_url,
        config.slack.bot_token.clone(),
        SLACK_TIMEOUT,
    ) {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("slack_token_readiness", error.to_string()),
    };

    match client.auth_test().await {
        Ok(identity) => DoctorCheck::pass(
            "slack_token_readiness",
            format!(
                "auth.test ok for {} in {}",
                identity.user.as_deref().unwrap_or("bot"),
                identity.team.as_deref().unwrap_or("unknown team")
            ),
        ),
        Err(error) => DoctorCheck::fail("slack_token_readiness", error.to_string()),
    }
}

async fn check_store(config: &AppConfig) -> DoctorCheck {
    let repository = match open_repository(&config.database).await {
        Ok(repository) => repository,
        Err(error) => {
            return DoctorCheck::fail("store_connectivity", format!("failed to open store: {error}"));
        }
    };

    match repository.ping().await {
        Ok(()) => DoctorCheck::pass(
            "store_connectivity",
            format!("{} store reachable", repository.backend()),
        ),
        Err(error) => DoctorCheck::fail(
            "store_connectivity",
            format!("{} store ping failed: {error}", repository.backend()),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
