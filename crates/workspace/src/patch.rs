use agentdesk_core::WorkspaceMode;
use serde::{Deserialize, Serialize};

use crate::errors::WorkspaceError;
use crate::service::{WorkspaceService, WriteRequest};
use crate::text::normalize_rel_path;

/// Desired end state of one file; `base_hash` is the hash the editor loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub target_content: String,
    #[serde(default)]
    pub base_hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub user_id: String,
    pub files: Vec<FileEdit>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFile {
    pub path: String,
    pub content_hash: String,
    pub bytes_written: u64,
    pub mode: WorkspaceMode,
    pub resolved_ref: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConflict {
    pub path: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PatchConflict {
    fn from_error(path: String, error: WorkspaceError) -> Self {
        match error {
            WorkspaceError::Conflict { expected_hash, current_hash, .. } => Self {
                path,
                reason: "hash_mismatch".to_string(),
                expected_hash: Some(expected_hash),
                current_hash,
                detail: None,
            },
            other => Self {
                path,
                reason: "write_failed".to_string(),
                expected_hash: None,
                current_hash: None,
                detail: Some(other.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchReport {
    pub applied: Vec<AppliedFile>,
    pub conflicts: Vec<PatchConflict>,
    pub applied_count: usize,
    pub conflict_count: usize,
    pub ok: bool,
}

impl PatchReport {
    fn finish(applied: Vec<AppliedFile>, conflicts: Vec<PatchConflict>) -> Self {
        Self {
            applied_count: applied.len(),
            conflict_count: conflicts.len(),
            ok: conflicts.is_empty(),
            applied,
            conflicts,
        }
    }
}

impl WorkspaceService {
    /// Writes each file independently through the hash guard. A stale or failing
    /// file is reported as a conflict and the rest of the batch still applies.
    pub async fn apply_patch(&self, request: PatchRequest) -> Result<PatchReport, WorkspaceError> {
        if request.files.is_empty() {
            return Err(WorkspaceError::InvalidArguments("patch has no files".to_string()));
        }
        tracing::info!(
            event_name = "workspace.patch_apply.start",
            project_id = %request.project_id,
            branch = request.branch.as_deref().unwrap_or_default(),
            files = request.files.len(),
            "applying workspace patch"
        );

        let mut applied = Vec::new();
        let mut conflicts = Vec::new();
        for edit in request.files {
            let path = match normalize_rel_path(&edit.path) {
                Ok(path) => path,
                Err(error) => {
                    conflicts.push(PatchConflict::from_error(edit.path, error));
                    continue;
                }
            };
            let write = WriteRequest {
                project_id: request.project_id.clone(),
                branch: request.branch.clone(),
                path: path.clone(),
                content: edit.target_content,
                expected_hash: edit.base_hash,
                user_id: request.user_id.clone(),
            };
            match self.write_file(write).await {
                Ok(outcome) => applied.push(AppliedFile {
                    path,
                    content_hash: outcome.content_hash,
                    bytes_written: outcome.bytes_written,
                    mode: outcome.mode,
                    resolved_ref: outcome.resolved_ref,
                }),
                Err(error) => conflicts.push(PatchConflict::from_error(path, error)),
            }
        }

        let report = PatchReport::finish(applied, conflicts);
        tracing::info!(
            event_name = "workspace.patch_apply.done",
            project_id = %request.project_id,
            applied = report.applied_count,
            conflicts = report.conflict_count,
            "workspace patch applied"
        );
        Ok(report)
    }
}
