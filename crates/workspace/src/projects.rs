use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentdesk_core::config::{ProjectConfig, WorkspaceConfig};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::remote::{self, RemoteBackend, RetryPolicy};

/// Everything the workspace service needs to know about a project's sources.
#[derive(Clone)]
pub struct ProjectRecord {
    pub id: String,
    pub default_branch: String,
    pub repo_path: Option<PathBuf>,
    pub remote: Option<Arc<dyn RemoteBackend>>,
}

impl ProjectRecord {
    pub fn local(id: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            default_branch: "main".to_string(),
            repo_path: Some(repo_path.into()),
            remote: None,
        }
    }

    pub fn remote(id: impl Into<String>, backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            id: id.into(),
            default_branch: backend.default_branch().to_string(),
            repo_path: None,
            remote: Some(backend),
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// A local checkout only counts when the directory is actually there.
    pub fn has_local_repo(&self) -> bool {
        self.repo_path.as_deref().is_some_and(|path| path.is_dir())
    }
}

impl std::fmt::Debug for ProjectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRecord")
            .field("id", &self.id)
            .field("default_branch", &self.default_branch)
            .field("repo_path", &self.repo_path)
            .field("remote", &self.remote.as_ref().map(|backend| backend.provider()))
            .finish()
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn project(&self, project_id: &str) -> Option<ProjectRecord>;
}

#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds records for every configured project, sharing one HTTP client across
    /// the remote connectors.
    pub fn from_config(
        projects: &[ProjectConfig],
        workspace: &WorkspaceConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = remote::build_http_client(Duration::from_secs(workspace.remote_timeout_secs))?;
        let retry = RetryPolicy::with_attempts(workspace.remote_http_retries);

        let records = projects
            .iter()
            .map(|project| {
                let backend = project.remote.as_ref().map(|config| {
                    remote::connect(config, &project.default_branch, client.clone(), retry)
                });
                let record = ProjectRecord {
                    id: project.id.clone(),
                    default_branch: project.default_branch.clone(),
                    repo_path: project.repo_path.clone(),
                    remote: backend,
                };
                (record.id.clone(), record)
            })
            .collect();

        Ok(Self { projects: RwLock::new(records) })
    }

    pub async fn insert(&self, record: ProjectRecord) {
        self.projects.write().await.insert(record.id.clone(), record);
    }

    pub async fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.projects.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn project(&self, project_id: &str) -> Option<ProjectRecord> {
        self.projects.read().await.get(project_id).cloned()
    }
}
