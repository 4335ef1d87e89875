use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentdesk_agent::{
    register_workspace_tools, AgentRuntime, AgentSettings, InMemoryKnowledgeBase,
    OpenAiCompatibleClient, RegistryError, StaticCapabilityStore, ToolRegistry, ToolRuntime,
};
use agentdesk_core::config::AppConfig;
use agentdesk_core::{ToolPolicy, TraceSink, TracingTraceSink};
use agentdesk_workspace::{InMemoryProjectStore, WorkspaceService, WorkspaceSettings};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub workspace: Arc<WorkspaceService>,
    pub tools: Arc<ToolRuntime>,
    pub project_policies: Arc<HashMap<String, ToolPolicy>>,
    pub trace_sink: Arc<dyn TraceSink>,
    pub agent: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("remote http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("model client could not be built: {0}")]
    ModelClient(#[source] reqwest::Error),
    #[error("tool registration failed: {0}")]
    Registry(#[from] RegistryError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        projects = config.projects.len(),
        "starting application bootstrap"
    );

    let store = InMemoryProjectStore::from_config(&config.projects, &config.workspace)
        .map_err(BootstrapError::HttpClient)?;
    let workspace = Arc::new(WorkspaceService::new(
        Arc::new(store),
        WorkspaceSettings::from(&config.workspace),
    ));

    let mut registry = ToolRegistry::new();
    register_workspace_tools(&mut registry, Arc::clone(&workspace))?;
    info!(
        event_name = "system.bootstrap.tools_registered",
        tools = registry.len(),
        "workspace tools registered"
    );

    let tools = Arc::new(
        ToolRuntime::new(registry)
            .with_capabilities(Arc::new(StaticCapabilityStore::from_projects(&config.projects)))
            .with_handler_timeout(Duration::from_secs(config.agent.tool_timeout_secs)),
    );

    let model = OpenAiCompatibleClient::from_config(&config.llm)
        .map_err(BootstrapError::ModelClient)?;
    // `search` and `open` run against an in-process index.
    let agent = AgentRuntime::new(
        Arc::new(model),
        Arc::new(InMemoryKnowledgeBase::new()),
        AgentSettings::from_config(&config.agent, &config.llm),
    )
    .with_tools(Arc::clone(&tools));
    info!(
        event_name = "system.bootstrap.agent_ready",
        model = %config.llm.model,
        max_steps = agent.settings().max_steps,
        "agent runtime ready"
    );

    let project_policies = config
        .projects
        .iter()
        .map(|project| (project.id.clone(), project.tool_policy.clone()))
        .collect();

    Ok(Application {
        config,
        workspace,
        tools,
        project_policies: Arc::new(project_policies),
        trace_sink: Arc::new(TracingTraceSink),
        agent: Arc::new(agent),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use agentdesk_core::config::{AppConfig, ProjectConfig};
    use agentdesk_core::ToolPolicy;

    use super::bootstrap_with_config;

    #[test]
    fn bootstrap_registers_workspace_tools_and_project_policies() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 6;
        config.projects.push(ProjectConfig {
            id: "docs".to_string(),
            default_branch: "main".to_string(),
            repo_path: Some(PathBuf::from("/srv/docs")),
            remote: None,
            tool_policy: ToolPolicy::dry_run(),
            capabilities: Default::default(),
        });

        let app = bootstrap_with_config(config).expect("bootstrap");

        assert!(app.tools.registry().contains("workspace_apply_patch"));
        assert_eq!(app.tools.registry().len(), 5);
        assert_eq!(app.project_policies.get("docs"), Some(&ToolPolicy::dry_run()));
        assert_eq!(app.agent.settings().max_steps, 6);
    }
}
