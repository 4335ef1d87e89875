use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use agentdesk_core::config::WorkspaceConfig;
use agentdesk_core::{
    content_hash, DeleteOutcome, FileSnapshot, ReadOnlyReason, WorkspaceMode, WriteOutcome,
};
use serde::{Deserialize, Serialize};

use crate::errors::WorkspaceError;
use crate::projects::{ProjectRecord, ProjectStore};
use crate::remote::{branch_candidates, RemoteBackend, RemoteError, RemoteFile};
use crate::text::{
    clamp_max_chars, is_binary_extension, looks_binary, normalize_rel_path, safe_join, take_chars,
    LARGE_PREVIEW_SUFFIX, TRUNCATED_SUFFIX,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkspaceSettings {
    pub large_file_bytes: u64,
    pub preview_chars: usize,
    pub default_max_chars: usize,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self { large_file_bytes: 380_000, preview_chars: 120_000, default_max_chars: 260_000 }
    }
}

impl From<&WorkspaceConfig> for WorkspaceSettings {
    fn from(config: &WorkspaceConfig) -> Self {
        Self {
            large_file_bytes: config.large_file_bytes,
            preview_chars: config.preview_chars,
            default_max_chars: config.default_max_chars,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub path: String,
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub allow_large: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub expected_hash: Option<String>,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub path: String,
    #[serde(default)]
    pub expected_hash: Option<String>,
    #[serde(default)]
    pub ignore_missing: bool,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceCapabilities {
    pub project_id: String,
    pub branch: String,
    pub mode: String,
    pub has_local_repo: bool,
    pub has_remote_repo: bool,
    pub remote_type: Option<String>,
}

enum Source {
    Local(PathBuf),
    Remote(Arc<dyn RemoteBackend>),
}

impl Source {
    fn mode(&self) -> WorkspaceMode {
        match self {
            Self::Local(_) => WorkspaceMode::Local,
            Self::Remote(backend) => WorkspaceMode::Remote(backend.provider()),
        }
    }
}

/// Full current state of a file before any truncation.
struct Loaded {
    content: String,
    binary: bool,
    size_bytes: u64,
    web_url: Option<String>,
    branch: String,
}

type FileLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one file's write lock; the table entry is dropped with the last holder.
struct FileLease<'a> {
    locks: &'a FileLocks,
    key: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for FileLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // The table and this lease are the only owners left.
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.key);
        }
    }
}

pub struct WorkspaceService {
    projects: Arc<dyn ProjectStore>,
    settings: WorkspaceSettings,
    locks: FileLocks,
}

impl WorkspaceService {
    pub fn new(projects: Arc<dyn ProjectStore>, settings: WorkspaceSettings) -> Self {
        Self { projects, settings, locks: Mutex::new(HashMap::new()) }
    }

    pub fn settings(&self) -> WorkspaceSettings {
        self.settings
    }

    pub async fn capabilities(
        &self,
        project_id: &str,
        branch: Option<&str>,
    ) -> Result<WorkspaceCapabilities, WorkspaceError> {
        let project = self.project(project_id).await?;
        let has_local_repo = project.has_local_repo();
        let remote_type = project.remote.as_ref().map(|backend| backend.provider().as_str());
        let mode = match (has_local_repo, remote_type) {
            (true, _) => WorkspaceMode::Local.to_string(),
            (false, Some(provider)) => format!("remote:{provider}"),
            (false, None) => "none".to_string(),
        };

        Ok(WorkspaceCapabilities {
            branch: requested_branch(branch, &project),
            project_id: project.id,
            mode,
            has_local_repo,
            has_remote_repo: remote_type.is_some(),
            remote_type: remote_type.map(str::to_string),
        })
    }

    pub async fn read_file(&self, request: ReadRequest) -> Result<FileSnapshot, WorkspaceError> {
        let path = normalize_rel_path(&request.path)?;
        let project = self.project(&request.project_id).await?;
        let branch = requested_branch(request.branch.as_deref(), &project);
        let source = source_for(&project)?;

        // Only a missing local file is `not_found`; a remote miss is an upstream failure.
        let loaded = match (self.load(&source, &path, &branch).await, &source) {
            (Err(WorkspaceError::FileNotFound(missing)), Source::Remote(backend)) => {
                return Err(WorkspaceError::Remote(RemoteError::FileNotFound {
                    provider: backend.provider().as_str(),
                    path: missing,
                }));
            }
            (loaded, _) => loaded?,
        };
        let snapshot = self.snapshot(&project, &source, path, loaded, &request);
        tracing::debug!(
            event_name = "workspace.read_file",
            project_id = %snapshot.project_id,
            path = %snapshot.path,
            mode = %snapshot.mode,
            truncated = snapshot.truncated,
            read_only = snapshot.read_only,
            "workspace file read"
        );
        Ok(snapshot)
    }

    pub async fn write_file(&self, request: WriteRequest) -> Result<WriteOutcome, WorkspaceError> {
        let path = normalize_rel_path(&request.path)?;
        let project = self.project(&request.project_id).await?;
        let branch = requested_branch(request.branch.as_deref(), &project);
        let source = source_for(&project)?;
        let expected_hash = non_empty(request.expected_hash);

        let _lease = self.lock_file(&project.id, &branch, &path).await;

        let current = match self.load(&source, &path, &branch).await {
            Ok(loaded) => Some(loaded),
            Err(WorkspaceError::FileNotFound(_)) => None,
            Err(error) => return Err(error),
        };
        if current.as_ref().is_some_and(|loaded| loaded.binary) {
            return Err(WorkspaceError::BinaryFile(path));
        }
        let current_hash = current.as_ref().map(|loaded| content_hash(&loaded.content));
        check_expected_hash(&path, expected_hash, current_hash)?;

        let bytes_written = request.content.len() as u64;
        let mode = source.mode();
        let (resolved_ref, commit_id, web_url) = match &source {
            Source::Local(root) => {
                let full = safe_join(root, &path)?;
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|error| WorkspaceError::io(parent, error))?;
                }
                tokio::fs::write(&full, request.content.as_bytes())
                    .await
                    .map_err(|error| WorkspaceError::io(&full, error))?;
                (branch.clone(), None, None)
            }
            Source::Remote(backend) => {
                let commit = remote_write(
                    backend.as_ref(),
                    &path,
                    &request.content,
                    &branch,
                    &request.user_id,
                )
                .await?;
                (commit.branch, commit.commit_id, commit.web_url)
            }
        };

        tracing::info!(
            event_name = "workspace.write_file",
            project_id = %project.id,
            path = %path,
            mode = %mode,
            requested_ref = %branch,
            resolved_ref = %resolved_ref,
            bytes_written,
            "workspace file written"
        );
        Ok(WriteOutcome {
            project_id: project.id,
            content_hash: content_hash(&request.content),
            path,
            mode,
            requested_ref: branch,
            resolved_ref,
            commit_id,
            web_url,
            bytes_written,
        })
    }

    pub async fn delete_file(
        &self,
        request: DeleteRequest,
    ) -> Result<DeleteOutcome, WorkspaceError> {
        let path = normalize_rel_path(&request.path)?;
        let project = self.project(&request.project_id).await?;
        let branch = requested_branch(request.branch.as_deref(), &project);
        let source = source_for(&project)?;
        let expected_hash = non_empty(request.expected_hash);

        let _lease = self.lock_file(&project.id, &branch, &path).await;

        let current_hash = match self.load(&source, &path, &branch).await {
            Ok(loaded) => Some(content_hash(&loaded.content)),
            Err(WorkspaceError::FileNotFound(_)) if request.ignore_missing => None,
            Err(error) => return Err(error),
        };
        if current_hash.is_some() {
            check_expected_hash(&path, expected_hash, current_hash)?;
        }

        let mode = source.mode();
        let (resolved_ref, deleted, commit_id, web_url) = match &source {
            Source::Local(root) => {
                let full = safe_join(root, &path)?;
                match tokio::fs::remove_file(&full).await {
                    Ok(()) => (branch.clone(), true, None, None),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                        (branch.clone(), false, None, None)
                    }
                    Err(error) => return Err(WorkspaceError::io(&full, error)),
                }
            }
            Source::Remote(backend) => {
                let deletion =
                    remote_delete(backend.as_ref(), &path, &branch, &request.user_id).await?;
                (deletion.branch, deletion.deleted, deletion.commit_id, deletion.web_url)
            }
        };

        tracing::info!(
            event_name = "workspace.delete_file",
            project_id = %project.id,
            path = %path,
            mode = %mode,
            resolved_ref = %resolved_ref,
            deleted,
            "workspace file deleted"
        );
        Ok(DeleteOutcome {
            project_id: project.id,
            path,
            mode,
            resolved_ref,
            deleted,
            commit_id,
            web_url,
        })
    }

    async fn project(&self, project_id: &str) -> Result<ProjectRecord, WorkspaceError> {
        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(WorkspaceError::InvalidArguments("project_id is required".to_string()));
        }
        self.projects
            .project(project_id)
            .await
            .ok_or_else(|| WorkspaceError::ProjectNotFound(project_id.to_string()))
    }

    async fn lock_file(&self, project_id: &str, branch: &str, path: &str) -> FileLease<'_> {
        let key = format!("{project_id}\u{0}{branch}\u{0}{path}");
        let mutex = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = Arc::clone(&mutex).lock_owned().await;
        FileLease { locks: &self.locks, key, mutex, guard: Some(guard) }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    async fn load(
        &self,
        source: &Source,
        path: &str,
        branch: &str,
    ) -> Result<Loaded, WorkspaceError> {
        match source {
            Source::Local(root) => load_local(root, path, branch).await,
            Source::Remote(backend) => {
                let (file, resolved) = remote_read(backend.as_ref(), path, branch).await?;
                let binary = file.binary || is_binary_extension(path);
                Ok(Loaded {
                    content: if binary { String::new() } else { file.content },
                    binary,
                    size_bytes: file.size_bytes,
                    web_url: file.web_url,
                    branch: resolved,
                })
            }
        }
    }

    fn snapshot(
        &self,
        project: &ProjectRecord,
        source: &Source,
        path: String,
        loaded: Loaded,
        request: &ReadRequest,
    ) -> FileSnapshot {
        let mut snapshot = FileSnapshot {
            project_id: project.id.clone(),
            branch: loaded.branch,
            path,
            mode: source.mode(),
            content: String::new(),
            content_hash: String::new(),
            truncated: false,
            read_only: false,
            read_only_reason: ReadOnlyReason::None,
            size_bytes: loaded.size_bytes,
            web_url: loaded.web_url,
        };

        if loaded.binary {
            snapshot.read_only = true;
            snapshot.read_only_reason = ReadOnlyReason::BinaryFile;
        } else if loaded.size_bytes > self.settings.large_file_bytes && !request.allow_large {
            let (preview, _) = take_chars(&loaded.content, self.settings.preview_chars);
            snapshot.content = format!("{preview}{LARGE_PREVIEW_SUFFIX}");
            snapshot.truncated = true;
            snapshot.read_only = true;
            snapshot.read_only_reason = ReadOnlyReason::LargeFile;
        } else {
            let max_chars = clamp_max_chars(request.max_chars, self.settings.default_max_chars);
            match take_chars(&loaded.content, max_chars) {
                (head, true) => {
                    snapshot.content = format!("{head}{TRUNCATED_SUFFIX}");
                    snapshot.truncated = true;
                }
                (_, false) => snapshot.content = loaded.content,
            }
        }
        snapshot.content_hash = content_hash(&snapshot.content);
        snapshot
    }
}

fn requested_branch(branch: Option<&str>, project: &ProjectRecord) -> String {
    branch
        .map(str::trim)
        .filter(|branch| !branch.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| project.default_branch.clone())
}

fn source_for(project: &ProjectRecord) -> Result<Source, WorkspaceError> {
    if let Some(root) = project.repo_path.as_ref().filter(|_| project.has_local_repo()) {
        return Ok(Source::Local(root.clone()));
    }
    match &project.remote {
        Some(backend) => Ok(Source::Remote(Arc::clone(backend))),
        None => Err(WorkspaceError::NoRepositorySource(project.id.clone())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

/// The optimistic-concurrency guard. A missing file only conflicts when the caller
/// expected some prior content.
fn check_expected_hash(
    path: &str,
    expected_hash: Option<String>,
    current_hash: Option<String>,
) -> Result<(), WorkspaceError> {
    match expected_hash {
        Some(expected) if current_hash.as_deref() != Some(expected.as_str()) => {
            Err(WorkspaceError::Conflict {
                path: path.to_string(),
                expected_hash: expected,
                current_hash,
            })
        }
        _ => Ok(()),
    }
}

async fn load_local(root: &Path, path: &str, branch: &str) -> Result<Loaded, WorkspaceError> {
    let full = safe_join(root, path)?;
    let raw = match tokio::fs::read(&full).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkspaceError::FileNotFound(path.to_string()))
        }
        Err(error) if full.is_dir() => {
            tracing::debug!(event_name = "workspace.read_dir", path, error = %error);
            return Err(WorkspaceError::FileNotFound(path.to_string()));
        }
        Err(error) => return Err(WorkspaceError::io(&full, error)),
    };
    let binary = is_binary_extension(path) || looks_binary(&raw);
    let size_bytes = raw.len() as u64;
    let content = if binary {
        String::new()
    } else {
        String::from_utf8(raw).unwrap_or_else(|error| {
            String::from_utf8_lossy(error.as_bytes()).into_owned()
        })
    };
    Ok(Loaded { content, binary, size_bytes, web_url: None, branch: branch.to_string() })
}

fn map_remote(error: RemoteError) -> WorkspaceError {
    match error {
        RemoteError::FileNotFound { path, .. } => WorkspaceError::FileNotFound(path),
        other => WorkspaceError::Remote(other),
    }
}

/// Runs `op` against each branch candidate, moving on only when the branch itself
/// is missing on the remote.
async fn with_branch_fallback<T, F, Fut>(
    backend: &dyn RemoteBackend,
    branch: &str,
    operation: &'static str,
    op: F,
) -> Result<T, WorkspaceError>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<T, RemoteError>>,
{
    let mut last_error = None;
    for candidate in branch_candidates(branch, backend.default_branch()) {
        match op(candidate.clone()).await {
            Ok(value) => return Ok(value),
            Err(error @ RemoteError::BranchNotFound { .. }) => {
                tracing::warn!(
                    event_name = "workspace.remote.branch_fallback",
                    provider = backend.provider().as_str(),
                    operation,
                    branch = %candidate,
                    "branch not found on remote, trying next candidate"
                );
                last_error = Some(error);
            }
            Err(error) => return Err(map_remote(error)),
        }
    }
    Err(match last_error {
        Some(error) => map_remote(error),
        None => WorkspaceError::InvalidArguments("no branch candidates".to_string()),
    })
}

async fn remote_read(
    backend: &dyn RemoteBackend,
    path: &str,
    branch: &str,
) -> Result<(RemoteFile, String), WorkspaceError> {
    with_branch_fallback(backend, branch, "read", |candidate| async move {
        backend.read(path, &candidate).await.map(|file| (file, candidate))
    })
    .await
}

async fn remote_write(
    backend: &dyn RemoteBackend,
    path: &str,
    content: &str,
    branch: &str,
    actor: &str,
) -> Result<crate::remote::RemoteCommit, WorkspaceError> {
    with_branch_fallback(backend, branch, "write", |candidate| async move {
        backend.write(path, content, &candidate, actor).await
    })
    .await
}

async fn remote_delete(
    backend: &dyn RemoteBackend,
    path: &str,
    branch: &str,
    actor: &str,
) -> Result<crate::remote::RemoteDeletion, WorkspaceError> {
    with_branch_fallback(backend, branch, "delete", |candidate| async move {
        backend.delete(path, &candidate, actor).await
    })
    .await
}
