use std::process::ExitCode;

fn main() -> ExitCode {
    agentdesk_cli::run()
}
