use std::collections::HashMap;

use agentdesk_core::config::ProjectConfig;
use agentdesk_core::ProjectToolPolicy;

use crate::tools::{ToolContext, ToolSpec};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CapabilityDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }
}

/// Decides whether a project may invoke a tool at all, before any write policy applies.
pub trait CapabilityStore: Send + Sync {
    fn allowed(&self, tool_name: &str, spec: &ToolSpec, ctx: &ToolContext) -> CapabilityDecision;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAllCapabilities;

impl CapabilityStore for AllowAllCapabilities {
    fn allowed(&self, _: &str, _: &ToolSpec, _: &ToolContext) -> CapabilityDecision {
        CapabilityDecision::allow()
    }
}

/// Per-project allow/block lists. Projects without an entry may use every tool.
#[derive(Clone, Debug, Default)]
pub struct StaticCapabilityStore {
    projects: HashMap<String, ProjectToolPolicy>,
}

impl StaticCapabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_projects(projects: &[ProjectConfig]) -> Self {
        let projects = projects
            .iter()
            .map(|project| (project.id.clone(), project.capabilities.clone()))
            .collect();
        Self { projects }
    }

    pub fn with_project(
        mut self,
        project_id: impl Into<String>,
        policy: ProjectToolPolicy,
    ) -> Self {
        self.projects.insert(project_id.into(), policy);
        self
    }
}

impl CapabilityStore for StaticCapabilityStore {
    fn allowed(&self, tool_name: &str, spec: &ToolSpec, ctx: &ToolContext) -> CapabilityDecision {
        let Some(policy) = self.projects.get(&ctx.project_id) else {
            return CapabilityDecision::allow();
        };
        if policy.blocked_tools.contains(tool_name) {
            return CapabilityDecision::deny("tool_blocked");
        }
        if !policy.allowed_tools.is_empty() && !policy.allowed_tools.contains(tool_name) {
            return CapabilityDecision::deny("tool_not_allowed");
        }
        if policy.read_only_only && !spec.is_read_only() {
            return CapabilityDecision::deny("read_only_only");
        }
        CapabilityDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agentdesk_core::ProjectToolPolicy;
    use serde_json::{json, Value};

    use super::{CapabilityStore, StaticCapabilityStore};
    use crate::tools::{ToolContext, ToolHandler, ToolSpec};

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Ok(args)
        }
    }

    fn spec(name: &str, read_only: bool) -> ToolSpec {
        ToolSpec::new(name, "test tool", json!({"type": "object"}), Arc::new(Echo))
            .with_read_only(read_only)
    }

    #[test]
    fn project_lists_block_and_restrict_tools() {
        let mut policy = ProjectToolPolicy::default();
        policy.blocked_tools.insert("workspace_delete_file".to_string());
        policy.allowed_tools.insert("workspace_read_file".to_string());
        policy.allowed_tools.insert("workspace_write_file".to_string());
        policy.read_only_only = true;
        let store = StaticCapabilityStore::new().with_project("p1", policy);
        let ctx = ToolContext::new("p1");

        let check = |name: &str, read_only: bool| store.allowed(name, &spec(name, read_only), &ctx);

        let blocked = check("workspace_delete_file", false);
        let unlisted = check("workspace_capabilities", true);
        let write = check("workspace_write_file", false);
        let read = check("workspace_read_file", true);

        assert_eq!(blocked.reason.as_deref(), Some("tool_blocked"));
        assert_eq!(unlisted.reason.as_deref(), Some("tool_not_allowed"));
        assert_eq!(write.reason.as_deref(), Some("read_only_only"));
        assert!(read.allowed);
    }

    #[test]
    fn unknown_projects_are_unrestricted() {
        let store = StaticCapabilityStore::new();
        let ctx = ToolContext::new("p9");
        let write = spec("workspace_write_file", false);
        let decision = store.allowed("workspace_write_file", &write, &ctx);
        assert!(decision.allowed);
    }
}
