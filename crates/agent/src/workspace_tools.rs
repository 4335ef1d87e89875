//! Built-in tools over the workspace service. Project, user and default branch come
//! from the [`ToolContext`]; the model only supplies file-level arguments.

use std::sync::Arc;

use agentdesk_core::{ErrorKind, ToolError};
use agentdesk_workspace::{
    DeleteRequest, FileEdit, PatchRequest, ReadRequest, WorkspaceService, WriteRequest,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{RegistryError, ToolContext, ToolHandler, ToolRegistry, ToolSpec};

pub const READ_FILE: &str = "workspace_read_file";
pub const WRITE_FILE: &str = "workspace_write_file";
pub const DELETE_FILE: &str = "workspace_delete_file";
pub const APPLY_PATCH: &str = "workspace_apply_patch";
pub const CAPABILITIES: &str = "workspace_capabilities";

pub fn register_workspace_tools(
    registry: &mut ToolRegistry,
    service: Arc<WorkspaceService>,
) -> Result<(), RegistryError> {
    registry.register(
        ToolSpec::new(
            READ_FILE,
            "Read one file from the project workspace. Returns content, content_hash and read-only flags.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "minLength": 1},
                    "branch": {"type": "string"},
                    "max_chars": {"type": "integer", "minimum": 1},
                    "allow_large": {"type": "boolean"}
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            Arc::new(ReadFileTool { service: Arc::clone(&service) }),
        )
        .with_read_only(true),
    )?;
    registry.register(ToolSpec::new(
        WRITE_FILE,
        "Overwrite or create one file. Pass expected_hash from the last read to avoid clobbering concurrent edits.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "content": {"type": "string"},
                "branch": {"type": "string"},
                "expected_hash": {"type": "string"}
            },
            "required": ["path", "content"],
            "additionalProperties": false
        }),
        Arc::new(WriteFileTool { service: Arc::clone(&service) }),
    ))?;
    registry.register(ToolSpec::new(
        DELETE_FILE,
        "Delete one file, optionally guarded by expected_hash.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "branch": {"type": "string"},
                "expected_hash": {"type": "string"},
                "ignore_missing": {"type": "boolean"}
            },
            "required": ["path"],
            "additionalProperties": false
        }),
        Arc::new(DeleteFileTool { service: Arc::clone(&service) }),
    ))?;
    registry.register(ToolSpec::new(
        APPLY_PATCH,
        "Write several files at once. Files whose base_hash is stale are reported as conflicts; the rest still apply.",
        json!({
            "type": "object",
            "properties": {
                "branch": {"type": "string"},
                "files": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": {"type": "string", "minLength": 1},
                            "target_content": {"type": "string"},
                            "base_hash": {"type": "string"}
                        },
                        "required": ["path", "target_content"]
                    }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        }),
        Arc::new(ApplyPatchTool { service: Arc::clone(&service) }),
    ))?;
    registry.register(
        ToolSpec::new(
            CAPABILITIES,
            "Describe where this project's files live (local checkout or remote provider).",
            json!({
                "type": "object",
                "properties": {"branch": {"type": "string"}},
                "additionalProperties": false
            }),
            Arc::new(CapabilitiesTool { service }),
        )
        .with_read_only(true),
    )?;
    Ok(())
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|error| {
        ToolError::new(ErrorKind::InvalidArguments, format!("invalid arguments: {error}")).into()
    })
}

fn branch(requested: Option<String>, ctx: &ToolContext) -> Option<String> {
    requested.filter(|branch| !branch.trim().is_empty()).or_else(|| ctx.branch.clone())
}

struct ReadFileTool {
    service: Arc<WorkspaceService>,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    branch: Option<String>,
    max_chars: Option<usize>,
    #[serde(default)]
    allow_large: bool,
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ReadArgs = parse_args(args)?;
        let snapshot = self
            .service
            .read_file(ReadRequest {
                project_id: ctx.project_id.clone(),
                branch: branch(args.branch, ctx),
                path: args.path,
                max_chars: args.max_chars,
                allow_large: args.allow_large,
            })
            .await?;
        Ok(serde_json::to_value(snapshot)?)
    }
}

struct WriteFileTool {
    service: Arc<WorkspaceService>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    branch: Option<String>,
    expected_hash: Option<String>,
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: WriteArgs = parse_args(args)?;
        let outcome = self
            .service
            .write_file(WriteRequest {
                project_id: ctx.project_id.clone(),
                branch: branch(args.branch, ctx),
                path: args.path,
                content: args.content,
                expected_hash: args.expected_hash,
                user_id: ctx.user_id.clone(),
            })
            .await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

struct DeleteFileTool {
    service: Arc<WorkspaceService>,
}

#[derive(Deserialize)]
struct DeleteArgs {
    path: String,
    branch: Option<String>,
    expected_hash: Option<String>,
    #[serde(default)]
    ignore_missing: bool,
}

#[async_trait]
impl ToolHandler for DeleteFileTool {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: DeleteArgs = parse_args(args)?;
        let outcome = self
            .service
            .delete_file(DeleteRequest {
                project_id: ctx.project_id.clone(),
                branch: branch(args.branch, ctx),
                path: args.path,
                expected_hash: args.expected_hash,
                ignore_missing: args.ignore_missing,
                user_id: ctx.user_id.clone(),
            })
            .await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

struct ApplyPatchTool {
    service: Arc<WorkspaceService>,
}

#[derive(Deserialize)]
struct PatchArgs {
    branch: Option<String>,
    files: Vec<FileEdit>,
}

#[async_trait]
impl ToolHandler for ApplyPatchTool {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: PatchArgs = parse_args(args)?;
        let report = self
            .service
            .apply_patch(PatchRequest {
                project_id: ctx.project_id.clone(),
                branch: branch(args.branch, ctx),
                user_id: ctx.user_id.clone(),
                files: args.files,
            })
            .await?;
        Ok(serde_json::to_value(report)?)
    }
}

struct CapabilitiesTool {
    service: Arc<WorkspaceService>,
}

#[derive(Deserialize)]
struct CapabilitiesArgs {
    branch: Option<String>,
}

#[async_trait]
impl ToolHandler for CapabilitiesTool {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: CapabilitiesArgs = parse_args(args)?;
        let requested = branch(args.branch, ctx);
        let capabilities =
            self.service.capabilities(&ctx.project_id, requested.as_deref()).await?;
        Ok(serde_json::to_value(capabilities)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agentdesk_core::{content_hash, ErrorKind, ToolPolicy};
    use agentdesk_workspace::{
        InMemoryProjectStore, ProjectRecord, WorkspaceService, WorkspaceSettings,
    };
    use serde_json::json;
    use tempfile::TempDir;

    use super::{register_workspace_tools, APPLY_PATCH, READ_FILE, WRITE_FILE};
    use crate::tools::{ToolContext, ToolRegistry, ToolRuntime};

    async fn runtime(dir: &TempDir) -> ToolRuntime {
        let store = InMemoryProjectStore::new();
        store.insert(ProjectRecord::local("p1", dir.path())).await;
        let service =
            Arc::new(WorkspaceService::new(Arc::new(store), WorkspaceSettings::default()));
        let mut registry = ToolRegistry::new();
        register_workspace_tools(&mut registry, service).expect("register");
        ToolRuntime::new(registry)
    }

    #[tokio::test]
    async fn read_then_write_round_trips_through_the_runtime() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.md"), "v1").expect("seed");
        let runtime = runtime(&dir).await;
        let ctx = ToolContext::new("p1").with_user("u-1");

        let read = runtime.execute(READ_FILE, json!({"path": "a.md"}), &ctx).await;
        let hash = read.result().map(|value| value["content_hash"].clone());
        assert_eq!(hash, Some(json!(content_hash("v1"))));

        let write = runtime
            .execute(
                WRITE_FILE,
                json!({"path": "a.md", "content": "v2", "expected_hash": content_hash("v1")}),
                &ctx,
            )
            .await;
        assert!(write.is_ok());

        let stale = runtime
            .execute(
                WRITE_FILE,
                json!({"path": "a.md", "content": "v3", "expected_hash": content_hash("v1")}),
                &ctx,
            )
            .await;
        assert_eq!(stale.error_kind(), Some(ErrorKind::Conflict));
        assert_eq!(
            stale.error().map(|error| error.details["reason"].clone()),
            Some(json!("hash_mismatch"))
        );
    }

    #[tokio::test]
    async fn dry_run_leaves_files_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let runtime = runtime(&dir).await;
        let ctx = ToolContext::new("p1").with_policy(ToolPolicy::dry_run());

        let result = runtime
            .execute(APPLY_PATCH, json!({"files": [{"path": "x.md", "target_content": "x"}]}), &ctx)
            .await;

        assert_eq!(result.result().map(|value| value["skipped"].clone()), Some(json!(true)));
        assert!(!dir.path().join("x.md").exists());
    }

    #[tokio::test]
    async fn empty_patch_is_invalid() {
        let dir = TempDir::new().expect("tempdir");
        let runtime = runtime(&dir).await;

        let result =
            runtime.execute(APPLY_PATCH, json!({"files": []}), &ToolContext::new("p1")).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArguments));
    }
}
