pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "agentdesk",
    about = "Agentdesk operator CLI",
    long_about = "Inspect effective configuration, the registered tool catalogue, and where each project's files live.",
    after_help = "Examples:\n  agentdesk config\n  agentdesk tools --json\n  agentdesk projects"
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
    #[command(about = "List the tools the runtime registers, with read-only flags and schemas")]
    Tools {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Check every configured project and report its workspace mode")]
    Projects,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Tools { json } => commands::tools::run(json),
        Command::Projects => commands::projects::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
