use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agentdesk_core::{content_hash, ErrorKind, RemoteProvider, WorkspaceMode};
use agentdesk_workspace::{
    FileEdit, InMemoryProjectStore, PatchRequest, ProjectRecord, ReadRequest, RemoteBackend,
    RemoteCommit, RemoteDeletion, RemoteError, RemoteFile, WorkspaceService, WorkspaceSettings,
    WriteRequest,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// Remote that only knows the branches it was seeded with.
struct FakeRemote {
    branches: Vec<String>,
    files: Mutex<HashMap<(String, String), String>>,
    writes: Mutex<Vec<String>>,
}

impl FakeRemote {
    fn new(branches: &[&str]) -> Self {
        Self {
            branches: branches.iter().map(|branch| branch.to_string()).collect(),
            files: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn seed(&self, branch: &str, path: &str, content: &str) {
        self.files
            .lock()
            .expect("files lock")
            .insert((branch.to_string(), path.to_string()), content.to_string());
    }

    fn check_branch(&self, branch: &str) -> Result<(), RemoteError> {
        if self.branches.iter().any(|known| known == branch) {
            Ok(())
        } else {
            Err(RemoteError::BranchNotFound { provider: "Fake", branch: branch.to_string() })
        }
    }
}

#[async_trait]
impl RemoteBackend for FakeRemote {
    fn provider(&self) -> RemoteProvider {
        RemoteProvider::GitHub
    }

    fn default_branch(&self) -> &str {
        "main"
    }

    async fn read(&self, path: &str, branch: &str) -> Result<RemoteFile, RemoteError> {
        self.check_branch(branch)?;
        let files = self.files.lock().expect("files lock");
        let content = files
            .get(&(branch.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::FileNotFound { provider: "Fake", path: path.to_string() })?;
        Ok(RemoteFile {
            size_bytes: content.len() as u64,
            content,
            binary: false,
            web_url: Some(format!("https://example.test/{branch}/{path}")),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        _actor: &str,
    ) -> Result<RemoteCommit, RemoteError> {
        self.check_branch(branch)?;
        self.seed(branch, path, content);
        self.writes.lock().expect("writes lock").push(format!("{branch}:{path}"));
        Ok(RemoteCommit {
            branch: branch.to_string(),
            commit_id: Some("c1".to_string()),
            web_url: None,
        })
    }

    async fn delete(
        &self,
        path: &str,
        branch: &str,
        _actor: &str,
    ) -> Result<RemoteDeletion, RemoteError> {
        self.check_branch(branch)?;
        let removed =
            self.files.lock().expect("files lock").remove(&(branch.to_string(), path.to_string()));
        Ok(RemoteDeletion {
            branch: branch.to_string(),
            deleted: removed.is_some(),
            commit_id: None,
            web_url: None,
        })
    }
}

async fn remote_service(remote: Arc<FakeRemote>) -> WorkspaceService {
    let store = InMemoryProjectStore::new();
    store.insert(ProjectRecord::remote("r1", remote)).await;
    WorkspaceService::new(Arc::new(store), WorkspaceSettings::default())
}

#[tokio::test]
async fn remote_write_falls_back_to_default_branch() {
    let remote = Arc::new(FakeRemote::new(&["main"]));
    let service = remote_service(Arc::clone(&remote)).await;

    let outcome = service
        .write_file(WriteRequest {
            project_id: "r1".to_string(),
            branch: Some("feature/x".to_string()),
            path: "docs/a.md".to_string(),
            content: "hi".to_string(),
            ..WriteRequest::default()
        })
        .await
        .expect("fallback write");

    assert_eq!(outcome.mode, WorkspaceMode::Remote(RemoteProvider::GitHub));
    assert_eq!(outcome.requested_ref, "feature/x");
    assert_eq!(outcome.resolved_ref, "main");
    assert_eq!(outcome.commit_id.as_deref(), Some("c1"));
    assert_eq!(*remote.writes.lock().expect("writes lock"), vec!["main:docs/a.md".to_string()]);
}

#[tokio::test]
async fn remote_read_reports_resolved_branch_and_upstream_misses() {
    let remote = Arc::new(FakeRemote::new(&["main"]));
    remote.seed("main", "README.md", "readme");
    let service = remote_service(remote).await;

    let snapshot = service
        .read_file(ReadRequest {
            project_id: "r1".to_string(),
            branch: Some("gone".to_string()),
            path: "README.md".to_string(),
            ..ReadRequest::default()
        })
        .await
        .expect("read");
    assert_eq!(snapshot.branch, "main");
    assert_eq!(snapshot.content_hash, content_hash("readme"));

    let missing = service
        .read_file(ReadRequest {
            project_id: "r1".to_string(),
            path: "nope.md".to_string(),
            ..ReadRequest::default()
        })
        .await
        .expect_err("missing");
    assert_eq!(missing.kind(), ErrorKind::UpstreamError);
    assert!(missing.to_string().contains("nope.md"));

    let created = service
        .write_file(WriteRequest {
            project_id: "r1".to_string(),
            path: "nope.md".to_string(),
            content: "new".to_string(),
            ..WriteRequest::default()
        })
        .await
        .expect("create after miss");
    assert_eq!(created.resolved_ref, "main");
}

#[tokio::test]
async fn unknown_remote_branches_surface_as_upstream_errors() {
    let remote = Arc::new(FakeRemote::new(&[]));
    let service = remote_service(remote).await;

    let error = service
        .write_file(WriteRequest {
            project_id: "r1".to_string(),
            path: "a.md".to_string(),
            content: "x".to_string(),
            ..WriteRequest::default()
        })
        .await
        .expect_err("no branches");

    assert_eq!(error.kind(), ErrorKind::UpstreamError);
}

#[tokio::test]
async fn apply_patch_applies_fresh_files_and_reports_stale_ones() {
    let dir = TempDir::new().expect("tempdir");
    for name in ["a.md", "b.md", "c.md", "d.md"] {
        std::fs::write(dir.path().join(name), format!("old {name}")).expect("seed");
    }
    let store = InMemoryProjectStore::new();
    store.insert(ProjectRecord::local("p1", dir.path())).await;
    let service = WorkspaceService::new(Arc::new(store), WorkspaceSettings::default());

    let edit = |name: &str, base: Option<String>| FileEdit {
        path: name.to_string(),
        target_content: format!("new {name}"),
        base_hash: base,
    };
    let report = service
        .apply_patch(PatchRequest {
            project_id: "p1".to_string(),
            branch: None,
            user_id: "u-1".to_string(),
            files: vec![
                edit("a.md", Some(content_hash("old a.md"))),
                edit("b.md", Some("stale".to_string())),
                edit("c.md", None),
                edit("d.md", Some("also-stale".to_string())),
            ],
        })
        .await
        .expect("patch report");

    assert_eq!(report.applied_count, 2);
    assert_eq!(report.conflict_count, 2);
    assert!(!report.ok);
    assert!(report.conflicts.iter().all(|conflict| conflict.reason == "hash_mismatch"));
    assert_eq!(std::fs::read_to_string(dir.path().join("a.md")).expect("a"), "new a.md");
    assert_eq!(std::fs::read_to_string(dir.path().join("b.md")).expect("b"), "old b.md");
    assert_eq!(std::fs::read_to_string(dir.path().join("c.md")).expect("c"), "new c.md");
}

#[tokio::test]
async fn apply_patch_rejects_empty_batches() {
    let dir = TempDir::new().expect("tempdir");
    let store = InMemoryProjectStore::new();
    store.insert(ProjectRecord::local("p1", dir.path())).await;
    let service = WorkspaceService::new(Arc::new(store), WorkspaceSettings::default());

    let error = service
        .apply_patch(PatchRequest {
            project_id: "p1".to_string(),
            branch: None,
            user_id: String::new(),
            files: Vec::new(),
        })
        .await
        .expect_err("empty");

    assert_eq!(error.kind(), ErrorKind::InvalidArguments);
}
