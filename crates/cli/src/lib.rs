pub mod commands;

use clap::{Parser, Subcommand};
use parley_core::domain::conversation::Role;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and work with stored conversations.",
    after_help = "Examples:\n  parley doctor --json\n  parley chat \"What should I write about today?\"\n  parley conversations --role user"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack token readiness, and conversation store connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending SQLite migrations and return structured status output")]
    Migrate,
    #[command(about = "Send one message to the configured model with the initial context")]
    Chat {
        #[arg(help = "Message to send", required = true, num_args = 1..)]
        message: Vec<String>,
    },
    #[command(about = "Export stored conversations as JSON")]
    Conversations {
        #[arg(long, help = "Flatten to messages of one role (system, user, assistant), oldest first")]
        role: Option<Role>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Migrate => commands::migrate::run(),
        Command::Chat { message } => commands::chat::run(&message.join(" ")),
        Command::Conversations { role } => commands::conversations::run(role),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
