use std::sync::Arc;

use agentdesk_core::config::{AppConfig, LoadOptions};
use agentdesk_workspace::{
    InMemoryProjectStore, WorkspaceCapabilities, WorkspaceService, WorkspaceSettings,
};
use serde::Serialize;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ProjectStatus {
    project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<WorkspaceCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProjectsReport {
    command: &'static str,
    status: &'static str,
    projects: Vec<ProjectStatus>,
}

pub fn run() -> CommandResult {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => inspect(&config),
        Err(error) => CommandResult::failure("projects", "config_validation", error.to_string(), 2),
    }
}

pub fn inspect(config: &AppConfig) -> CommandResult {
    let store = match InMemoryProjectStore::from_config(&config.projects, &config.workspace) {
        Ok(store) => store,
        Err(error) => {
            return CommandResult::failure("projects", "http_client", error.to_string(), 3)
        }
    };
    let settings = WorkspaceSettings::from(&config.workspace);
    let service = WorkspaceService::new(Arc::new(store), settings);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("projects", "runtime", error.to_string(), 4),
    };

    let projects: Vec<ProjectStatus> = runtime.block_on(async {
        let mut statuses = Vec::with_capacity(config.projects.len());
        for project in &config.projects {
            let status = match service.capabilities(&project.id, None).await {
                Ok(capabilities) => ProjectStatus {
                    project_id: project.id.clone(),
                    capabilities: Some(capabilities),
                    error: None,
                },
                Err(error) => ProjectStatus {
                    project_id: project.id.clone(),
                    capabilities: None,
                    error: Some(error.to_string()),
                },
            };
            statuses.push(status);
        }
        statuses
    });

    let degraded = projects.iter().any(|status| match &status.capabilities {
        Some(capabilities) => capabilities.mode == "none",
        None => true,
    });
    CommandResult::report(
        if degraded { 5 } else { 0 },
        &ProjectsReport {
            command: "projects",
            status: if degraded { "degraded" } else { "ok" },
            projects,
        },
    )
}
