use parley_agent::{GeminiClient, LlmClient};
use parley_core::domain::context::InitialContext;
use parley_core::domain::conversation::Message;

use crate::commands::{exit, load_config, runtime, CommandResult};

/// One completion outside Slack: initial context plus `message`, nothing stored.
pub fn run(message: &str) -> CommandResult {
    let message = message.trim();
    if message.is_empty() {
        return CommandResult::failure(
            "chat",
            "invalid_input",
            "message must not be empty",
            exit::USAGE,
        );
    }

    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let context = match InitialContext::load(&config.chat.initial_context_path) {
        Ok(context) => context,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "initial_context",
                error.to_string(),
                exit::INITIAL_CONTEXT,
            );
        }
    };

    let client = match GeminiClient::from_config(&config.llm) {
        Ok(client) => client,
        Err(error) => return CommandResult::failure("chat", "llm", error.to_string(), exit::LLM),
    };

    let runtime = match runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let mut history = context.messages.clone();
    history.push(Message::user(message, "cli"));

    match runtime.block_on(client.complete(context.system_prompt.as_deref(), &history)) {
        Ok(reply) => CommandResult::success("chat", reply),
        Err(error) => CommandResult::failure("chat", "llm", error.to_string(), exit::LLM),
    }
}
