//! JSON routes over the workspace service and the tool runtime.
//!
//! - `GET  /workspace/capabilities`  : where a project's files live
//! - `GET  /workspace/file`          : read one file snapshot
//! - `POST /workspace/file/write`    : hash-guarded write
//! - `POST /workspace/file/delete`   : hash-guarded delete
//! - `POST /workspace/patch/apply`   : multi-file write with per-file conflicts
//! - `GET  /tools`                   : registered tool catalogue
//! - `POST /tools/{name}/execute`    : run one tool through the policy gates
//! - `POST /ask`                     : answer a question with the agent loop

use std::collections::HashMap;
use std::sync::Arc;

use agentdesk_agent::{
    AgentAnswer, AgentError, AgentRuntime, AskRequest, ToolContext, ToolDescriptor, ToolRuntime,
};
use agentdesk_core::{ErrorKind, ToolPolicy, TraceHandle, TraceSink};
use agentdesk_workspace::{
    DeleteRequest, PatchReport, PatchRequest, ReadRequest, WorkspaceError, WorkspaceService,
    WriteRequest,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub workspace: Arc<WorkspaceService>,
    pub tools: Arc<ToolRuntime>,
    pub project_policies: Arc<HashMap<String, ToolPolicy>>,
    pub trace_sink: Arc<dyn TraceSink>,
    pub agent: Arc<AgentRuntime>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
    pub details: Value,
}

impl From<WorkspaceError> for ApiError {
    fn from(error: WorkspaceError) -> Self {
        Self { error: error.to_string(), kind: error.kind(), details: error.details() }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self { error: error.to_string(), kind: error.kind(), details: error.details() }
    }
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self { error: message.into(), kind: ErrorKind::InvalidArguments, details: Value::Null }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CapabilitiesQuery {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteToolRequest {
    pub project_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub args: Value,
    /// Chat-level policy, layered over the project's configured policy.
    #[serde(default)]
    pub policy: ToolPolicy,
}

#[derive(Debug, Deserialize)]
pub struct AskBody {
    pub project_id: String,
    pub question: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub policy: ToolPolicy,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/workspace/capabilities", get(capabilities))
        .route("/workspace/file", get(read_file))
        .route("/workspace/file/write", post(write_file))
        .route("/workspace/file/delete", post(delete_file))
        .route("/workspace/patch/apply", post(apply_patch))
        .route("/tools", get(list_tools))
        .route("/tools/{name}/execute", post(execute_tool))
        .route("/ask", post(ask))
        .with_state(state)
}

async fn capabilities(
    State(state): State<ApiState>,
    Query(query): Query<CapabilitiesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let capabilities =
        state.workspace.capabilities(&query.project_id, query.branch.as_deref()).await?;
    Ok(Json(capabilities))
}

async fn read_file(
    State(state): State<ApiState>,
    Query(request): Query<ReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.workspace.read_file(request).await?))
}

async fn write_file(
    State(state): State<ApiState>,
    Json(request): Json<WriteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.workspace.write_file(request).await?))
}

async fn delete_file(
    State(state): State<ApiState>,
    Json(request): Json<DeleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.workspace.delete_file(request).await?))
}

async fn apply_patch(
    State(state): State<ApiState>,
    Json(request): Json<PatchRequest>,
) -> Result<(StatusCode, Json<PatchReport>), ApiError> {
    let report = state.workspace.apply_patch(request).await?;
    let status = if report.conflict_count > 0 { StatusCode::CONFLICT } else { StatusCode::OK };
    Ok((status, Json(report)))
}

async fn list_tools(State(state): State<ApiState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.tools.registry().describe())
}

/// Tool context for one request: project policy layered under the caller's policy.
fn request_context(
    state: &ApiState,
    project_id: String,
    branch: Option<String>,
    user_id: String,
    chat_id: Option<String>,
    policy: &ToolPolicy,
) -> (ToolContext, String) {
    let project_policy = state.project_policies.get(&project_id).cloned().unwrap_or_default();
    let request_id = Uuid::new_v4().to_string();
    let mut ctx = ToolContext::new(project_id)
        .with_user(user_id)
        .with_policy(project_policy.merge(policy))
        .with_trace(TraceHandle::new(request_id.clone(), Arc::clone(&state.trace_sink)));
    if let Some(branch) = branch {
        ctx = ctx.with_branch(branch);
    }
    if let Some(chat_id) = chat_id {
        ctx = ctx.with_chat(chat_id);
    }
    (ctx, request_id)
}

async fn execute_tool(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteToolRequest>,
) -> Json<Value> {
    let (ctx, request_id) = request_context(
        &state,
        request.project_id,
        request.branch,
        request.user_id,
        request.chat_id,
        &request.policy,
    );

    let result = state.tools.execute(&name, request.args, &ctx).await;
    if result.is_ok() {
        info!(
            event_name = "server.tool.executed",
            request_id = %request_id,
            tool = %name,
            "tool executed"
        );
    } else {
        warn!(
            event_name = "server.tool.failed",
            request_id = %request_id,
            tool = %name,
            kind = result.error_kind().map(ErrorKind::as_str).unwrap_or("unknown"),
            "tool execution failed"
        );
    }
    Json(result.to_value())
}

async fn ask(
    State(state): State<ApiState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AgentAnswer>, ApiError> {
    let question = body.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::invalid("question is required"));
    }
    if body.project_id.trim().is_empty() {
        return Err(ApiError::invalid("project_id is required"));
    }

    let project_key = body.project_id.clone();
    let (tool_context, request_id) = request_context(
        &state,
        body.project_id,
        body.branch,
        body.user_id,
        body.chat_id,
        &body.policy,
    );
    let answer = state.agent.ask(AskRequest { project_key, question, tool_context }).await;
    match answer {
        Ok(answer) => {
            info!(
                event_name = "server.ask.answered",
                request_id = %request_id,
                steps = answer.steps,
                sources = answer.sources.len(),
                "question answered"
            );
            Ok(Json(answer))
        }
        Err(error) => {
            warn!(
                event_name = "server.ask.failed",
                request_id = %request_id,
                error = %error,
                "agent loop failed"
            );
            Err(error.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use agentdesk_agent::{
        register_workspace_tools, AgentRuntime, AgentSettings, ChatMessage,
        InMemoryKnowledgeBase, LlmError, ModelClient, ToolRegistry, ToolRuntime,
    };
    use agentdesk_core::{content_hash, InMemoryTraceSink, ToolPolicy};
    use agentdesk_workspace::{
        InMemoryProjectStore, ProjectRecord, WorkspaceService, WorkspaceSettings,
    };
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::{router, ApiState};

    struct Scripted(Mutex<VecDeque<String>>);

    #[async_trait]
    impl ModelClient for Scripted {
        async fn chat(&self, _: &[ChatMessage], _: f32, _: u32) -> Result<String, LlmError> {
            let mut replies = self.0.lock().expect("replies lock");
            Ok(replies.pop_front().unwrap_or_else(|| r#"{"final":{"answer":"done"}}"#.into()))
        }
    }

    async fn app(dir: &TempDir, policies: HashMap<String, ToolPolicy>) -> Router {
        scripted_app(dir, policies, Vec::new()).await
    }

    async fn scripted_app(
        dir: &TempDir,
        policies: HashMap<String, ToolPolicy>,
        replies: Vec<String>,
    ) -> Router {
        let store = InMemoryProjectStore::new();
        store.insert(ProjectRecord::local("p1", dir.path())).await;
        let workspace =
            Arc::new(WorkspaceService::new(Arc::new(store), WorkspaceSettings::default()));
        let mut registry = ToolRegistry::new();
        register_workspace_tools(&mut registry, Arc::clone(&workspace)).expect("register");
        let tools = Arc::new(ToolRuntime::new(registry));
        let model = Arc::new(Scripted(Mutex::new(replies.into())));
        let agent = AgentRuntime::new(
            model,
            Arc::new(InMemoryKnowledgeBase::new()),
            AgentSettings::default(),
        )
        .with_tools(Arc::clone(&tools));
        router(ApiState {
            workspace,
            tools,
            project_policies: Arc::new(policies),
            trace_sink: Arc::new(InMemoryTraceSink::default()),
            agent: Arc::new(agent),
        })
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn read_then_stale_write_returns_conflict() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("notes.md"), "v1").expect("seed");
        let app = app(&dir, HashMap::new()).await;

        let (status, snapshot) =
            send(app.clone(), "GET", "/workspace/file?project_id=p1&path=notes.md", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["content_hash"], json!(content_hash("v1")));

        std::fs::write(dir.path().join("notes.md"), "changed elsewhere").expect("race");
        let (status, body) = send(
            app,
            "POST",
            "/workspace/file/write",
            Some(json!({
                "project_id": "p1",
                "path": "notes.md",
                "content": "v2",
                "expected_hash": content_hash("v1"),
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap_or_default().contains("conflict:"));
        assert_eq!(body["kind"], json!("conflict"));
    }

    #[tokio::test]
    async fn missing_files_and_projects_map_to_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir, HashMap::new()).await;

        let (file_status, body) =
            send(app.clone(), "GET", "/workspace/file?project_id=p1&path=nope.md", None).await;
        let (project_status, _) =
            send(app, "GET", "/workspace/capabilities?project_id=ghost", None).await;

        assert_eq!(file_status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], json!("not_found"));
        assert_eq!(project_status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_with_conflicts_returns_full_report_as_409() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.md"), "a1").expect("seed");
        let app = app(&dir, HashMap::new()).await;

        let (status, report) = send(
            app,
            "POST",
            "/workspace/patch/apply",
            Some(json!({
                "project_id": "p1",
                "files": [
                    {"path": "a.md", "target_content": "a2", "base_hash": content_hash("stale")},
                    {"path": "b.md", "target_content": "b1"}
                ]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(report["applied_count"], json!(1));
        assert_eq!(report["conflict_count"], json!(1));
        assert_eq!(report["conflicts"][0]["path"], json!("a.md"));
        assert_eq!(std::fs::read_to_string(dir.path().join("b.md")).expect("b"), "b1");
    }

    #[tokio::test]
    async fn tool_execution_merges_project_policy() {
        let dir = TempDir::new().expect("tempdir");
        let policies = HashMap::from([("p1".to_string(), ToolPolicy::requiring_approval())]);
        let app = app(&dir, policies).await;
        let body = json!({
            "project_id": "p1",
            "args": {"path": "x.md", "content": "x"}
        });

        let uri = "/tools/workspace_write_file/execute";

        let (denied_status, denied) = send(app.clone(), "POST", uri, Some(body.clone())).await;
        let mut approved_body = body;
        approved_body["policy"] = json!({"approved_tools": ["workspace_write_file"]});
        let (_, approved) = send(app.clone(), "POST", uri, Some(approved_body)).await;
        let (unknown_status, unknown) =
            send(app, "POST", "/tools/rm_rf/execute", Some(json!({"project_id": "p1"}))).await;

        assert_eq!(denied_status, StatusCode::OK);
        assert_eq!(denied["ok"], json!(false));
        assert_eq!(denied["error"]["kind"], json!("forbidden"));
        assert_eq!(approved["ok"], json!(true));
        assert_eq!(std::fs::read_to_string(dir.path().join("x.md")).expect("x"), "x");
        assert_eq!(unknown_status, StatusCode::OK);
        assert_eq!(unknown["error"]["kind"], json!("not_found"));
    }

    #[tokio::test]
    async fn tool_catalogue_lists_registered_tools() {
        let dir = TempDir::new().expect("tempdir");
        let (status, tools) = send(app(&dir, HashMap::new()).await, "GET", "/tools", None).await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = tools
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert!(names.contains(&"workspace_read_file"));
        assert_eq!(names.len(), 5);
    }

    #[tokio::test]
    async fn ask_runs_the_agent_with_merged_policy() {
        let dir = TempDir::new().expect("tempdir");
        let policies = HashMap::from([("p1".to_string(), ToolPolicy::requiring_approval())]);
        let replies = [
            r#"{"tool":"workspace_write_file","args":{"path":"faq.md","content":"hi"}}"#,
            r#"{"final":{"answer":"Wrote the FAQ.","citations":[]}}"#,
        ]
        .map(str::to_string)
        .to_vec();
        let app = scripted_app(&dir, policies, replies).await;

        let (status, answer) = send(
            app,
            "POST",
            "/ask",
            Some(json!({
                "project_id": "p1",
                "question": "Create the FAQ",
                "policy": {"approved_tools": ["workspace_write_file"]}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["answer"], json!("Wrote the FAQ."));
        assert_eq!(answer["steps"], json!(2));
        assert_eq!(std::fs::read_to_string(dir.path().join("faq.md")).expect("faq"), "hi");
    }

    #[tokio::test]
    async fn ask_rejects_blank_questions() {
        let dir = TempDir::new().expect("tempdir");
        let app = app(&dir, HashMap::new()).await;

        let (status, body) = send(
            app,
            "POST",
            "/ask",
            Some(json!({"project_id": "p1", "question": "   "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("invalid_arguments"));
    }
}
