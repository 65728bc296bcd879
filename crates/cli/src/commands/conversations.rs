use parley_core::domain::conversation::{ConversationRecord, Message, Role};
use parley_db::open_repository;
use serde::Serialize;

use crate::commands::{exit, load_config, runtime, CommandResult};

/// A message flattened out of its conversation.
#[derive(Debug, Serialize)]
struct ExportedMessage {
    conversation_id: String,
    #[serde(flatten)]
    message: Message,
}

/// Prints every stored conversation, or with `role` every message of that
/// role across conversations sorted by timestamp.
pub fn run(role: Option<Role>) -> CommandResult {
    let config = match load_config("conversations") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("conversations") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let conversations = runtime.block_on(async {
        let repository = open_repository(&config.database).await?;
        repository.list().await
    });
    let conversations = match conversations {
        Ok(conversations) => conversations,
        Err(error) => {
            return CommandResult::failure("conversations", "store", error.to_string(), exit::STORE);
        }
    };

    let rendered = match role {
        None => {
            let records: Vec<ConversationRecord> =
                conversations.into_iter().map(ConversationRecord::from).collect();
            serde_json::to_string_pretty(&records)
        }
        Some(role) => {
            let mut messages: Vec<ExportedMessage> = conversations
                .into_iter()
                .flat_map(|conversation| {
                    let conversation_id = conversation.key.document_id();
                    conversation
                        .messages
                        .into_iter()
                        .filter(move |message| message.role == role)
                        .map(move |message| ExportedMessage {
                            conversation_id: conversation_id.clone(),
                            message,
                        })
                })
                .collect();
            messages.sort_by(|left, right| left.message.ts.cmp(&right.message.ts));
            serde_json::to_string_pretty(&messages)
        }
    };

    match rendered {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure(
            "conversations",
            "serialization",
            error.to_string(),
            exit::SERIALIZATION,
        ),
    }
}
