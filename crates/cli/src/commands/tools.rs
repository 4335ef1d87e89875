use std::sync::Arc;

use agentdesk_agent::{register_workspace_tools, ToolDescriptor, ToolRegistry};
use agentdesk_workspace::{InMemoryProjectStore, WorkspaceService, WorkspaceSettings};
use serde::Serialize;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ToolCatalogue {
    command: &'static str,
    status: &'static str,
    tools: Vec<ToolDescriptor>,
}

/// The catalogue does not depend on configured projects, so an empty store is enough.
pub fn catalogue() -> Result<Vec<ToolDescriptor>, String> {
    let service = Arc::new(WorkspaceService::new(
        Arc::new(InMemoryProjectStore::new()),
        WorkspaceSettings::default(),
    ));
    let mut registry = ToolRegistry::new();
    register_workspace_tools(&mut registry, service).map_err(|error| error.to_string())?;
    Ok(registry.describe())
}

pub fn run(json: bool) -> CommandResult {
    let tools = match catalogue() {
        Ok(tools) => tools,
        Err(error) => return CommandResult::failure("tools", "registry", error, 3),
    };

    if json {
        return CommandResult::report(0, &ToolCatalogue { command: "tools", status: "ok", tools });
    }

    let lines: Vec<String> = tools
        .iter()
        .map(|tool| {
            let access = if tool.read_only { "read-only" } else { "write" };
            format!("- {} [{access}]: {}", tool.name, tool.description)
        })
        .collect();
    CommandResult { exit_code: 0, output: lines.join("\n") }
}
