use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-invocation write policy. Applies only to tools that are not read-only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPolicy {
    pub dry_run: bool,
    pub require_approval_for_write_tools: bool,
    pub approved_tools: BTreeSet<String>,
}

impl ToolPolicy {
    pub fn dry_run() -> Self {
        Self { dry_run: true, ..Self::default() }
    }

    pub fn requiring_approval() -> Self {
        Self { require_approval_for_write_tools: true, ..Self::default() }
    }

    pub fn approve(mut self, tool: impl Into<String>) -> Self {
        self.approved_tools.insert(tool.into());
        self
    }

    pub fn is_approved(&self, tool: &str) -> bool {
        self.approved_tools.contains(tool)
    }

    /// Layers a narrower policy (e.g. a chat's) on top of a project policy.
    /// Restrictions are additive: either side enabling a flag enables it.
    pub fn merge(&self, overlay: &ToolPolicy) -> ToolPolicy {
        ToolPolicy {
            dry_run: self.dry_run || overlay.dry_run,
            require_approval_for_write_tools: self.require_approval_for_write_tools
                || overlay.require_approval_for_write_tools,
            approved_tools: self.approved_tools.union(&overlay.approved_tools).cloned().collect(),
        }
    }
}

/// Capability allow-list for one project, consulted before any handler runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectToolPolicy {
    pub allowed_tools: BTreeSet<String>,
    pub blocked_tools: BTreeSet<String>,
    pub read_only_only: bool,
}

impl ProjectToolPolicy {
    pub fn merge(&self, overlay: &ProjectToolPolicy) -> ProjectToolPolicy {
        let allowed_tools = match (self.allowed_tools.is_empty(), overlay.allowed_tools.is_empty())
        {
            (true, _) => overlay.allowed_tools.clone(),
            (_, true) => self.allowed_tools.clone(),
            _ => self.allowed_tools.intersection(&overlay.allowed_tools).cloned().collect(),
        };
        ProjectToolPolicy {
            allowed_tools,
            blocked_tools: self.blocked_tools.union(&overlay.blocked_tools).cloned().collect(),
            read_only_only: self.read_only_only || overlay.read_only_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProjectToolPolicy, ToolPolicy};

    #[test]
    fn merge_ors_flags_and_unions_approvals() {
        let project = ToolPolicy::requiring_approval().approve("workspace_write_file");
        let chat = ToolPolicy::dry_run().approve("workspace_apply_patch");

        let merged = project.merge(&chat);

        assert!(merged.dry_run);
        assert!(merged.require_approval_for_write_tools);
        assert!(merged.is_approved("workspace_write_file"));
        assert!(merged.is_approved("workspace_apply_patch"));
    }

    #[test]
    fn merge_never_relaxes_a_restriction() {
        let project = ToolPolicy::dry_run();
        let merged = project.merge(&ToolPolicy::default());
        assert!(merged.dry_run);
    }

    #[test]
    fn capability_merge_intersects_non_empty_allow_lists() {
        let base = ProjectToolPolicy {
            allowed_tools: ["search", "open", "workspace_read_file"].map(String::from).into(),
            ..ProjectToolPolicy::default()
        };
        let overlay = ProjectToolPolicy {
            allowed_tools: ["open", "workspace_read_file"].map(String::from).into(),
            blocked_tools: ["workspace_delete_file"].map(String::from).into(),
            read_only_only: true,
        };

        let merged = base.merge(&overlay);

        assert_eq!(merged.allowed_tools.len(), 2);
        assert!(merged.blocked_tools.contains("workspace_delete_file"));
        assert!(merged.read_only_only);
        assert_eq!(ProjectToolPolicy::default().merge(&base).allowed_tools, base.allowed_tools);
    }
}
