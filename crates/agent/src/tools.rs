use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentdesk_core::errors::truncate_message;
use agentdesk_core::{ErrorKind, ToolError, ToolPolicy, ToolResult, TraceHandle};
use agentdesk_workspace::WorkspaceError;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::capabilities::{AllowAllCapabilities, CapabilityStore};
use crate::guardrails::{GuardDecision, WriteGuard};

const HANDLER_ERROR_MAX_CHARS: usize = 300;
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Per-invocation context: who is calling, against which project, under which policy.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub project_id: String,
    pub branch: Option<String>,
    pub user_id: String,
    pub chat_id: Option<String>,
    pub policy: ToolPolicy,
    pub trace: TraceHandle,
}

impl ToolContext {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            branch: None,
            user_id: String::new(),
            chat_id: None,
            policy: ToolPolicy::default(),
            trace: TraceHandle::detached(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_trace(mut self, trace: TraceHandle) -> Self {
        self.trace = trace;
        self
    }
}

#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
    read_only: bool,
}

impl ToolSpec {
    /// New tools are write tools until marked otherwise.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
            read_only: false,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Serializable view of a registered tool, used for catalogues and prompts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub read_only: bool,
    pub input_schema: Value,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),
    #[error("tool `{name}` has an invalid input schema: {message}")]
    InvalidSchema { name: String, message: String },
}

struct RegisteredTool {
    spec: ToolSpec,
    validator: jsonschema::Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(spec.name()) {
            return Err(RegistryError::DuplicateTool(spec.name().to_string()));
        }
        let validator = jsonschema::validator_for(spec.input_schema()).map_err(|error| {
            RegistryError::InvalidSchema {
                name: spec.name().to_string(),
                message: error.to_string(),
            }
        })?;
        self.tools.insert(spec.name().to_string(), RegisteredTool { spec, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|tool| &tool.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn describe(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.spec.name.clone(),
                description: tool.spec.description.clone(),
                read_only: tool.spec.read_only,
                input_schema: tool.spec.input_schema.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Executes registered tools behind validation, capability and write-policy gates.
/// Every outcome, including handler panics and timeouts, comes back as a [`ToolResult`].
pub struct ToolRuntime {
    registry: ToolRegistry,
    capabilities: Arc<dyn CapabilityStore>,
    handler_timeout: Duration,
}

impl ToolRuntime {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            capabilities: Arc::new(AllowAllCapabilities),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityStore>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        ctx.trace.emit(
            "tool.call",
            json!({"tool": name, "project_id": ctx.project_id, "args": args}),
        );

        let result = self.dispatch(name, args, ctx).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let error_kind = result.error_kind().map(ErrorKind::as_str);
        ctx.trace.emit(
            "tool.result",
            json!({
                "tool": name,
                "ok": result.is_ok(),
                "error_kind": error_kind,
                "duration_ms": duration_ms,
            }),
        );
        tracing::info!(
            event_name = "agent.tool.executed",
            tool = name,
            project_id = %ctx.project_id,
            request_id = ctx.trace.request_id(),
            ok = result.is_ok(),
            error_kind = error_kind.unwrap_or("none"),
            duration_ms,
            "tool execution finished"
        );
        result
    }

    async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.registry.tools.get(name) else {
            return ToolResult::failed(
                ErrorKind::NotFound,
                format!("unknown tool `{name}`"),
                json!({"available": self.registry.names()}),
            );
        };

        let args = if args.is_null() { json!({}) } else { args };
        let errors: Vec<Value> = tool
            .validator
            .iter_errors(&args)
            .map(|error| {
                json!({"path": error.instance_path().to_string(), "message": error.to_string()})
            })
            .collect();
        if !errors.is_empty() {
            return ToolResult::failed(
                ErrorKind::InvalidArguments,
                format!("invalid arguments for `{name}`"),
                json!({"errors": errors}),
            );
        }

        let capability = self.capabilities.allowed(name, &tool.spec, ctx);
        if !capability.allowed {
            return ToolResult::failed(
                ErrorKind::Forbidden,
                format!("tool `{name}` is not enabled for project `{}`", ctx.project_id),
                json!({"reason": "capability_denied", "detail": capability.reason}),
            );
        }

        match WriteGuard::evaluate(tool.spec.read_only, name, &ctx.policy) {
            GuardDecision::Execute => {}
            GuardDecision::DryRun => {
                return ToolResult::success(json!({"dry_run": true, "skipped": true, "tool": name}))
            }
            GuardDecision::Deny { reason_code, user_message } => {
                return ToolResult::failed(
                    ErrorKind::Forbidden,
                    user_message,
                    json!({"reason": reason_code}),
                )
            }
        }

        self.run_handler(Arc::clone(&tool.spec.handler), args, ctx).await
    }

    /// Runs the handler on its own task so a panic or a hang cannot take the caller down.
    async fn run_handler(
        &self,
        handler: Arc<dyn ToolHandler>,
        args: Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let task_ctx = ctx.clone();
        let mut task = tokio::spawn(async move { handler.call(args, &task_ctx).await });

        match tokio::time::timeout(self.handler_timeout, &mut task).await {
            Ok(Ok(Ok(value))) => ToolResult::success(value),
            Ok(Ok(Err(error))) => ToolResult::failure(handler_failure(error)),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    "tool handler panicked"
                } else {
                    "tool handler was cancelled"
                };
                ToolResult::failed(ErrorKind::HandlerError, message, Value::Null)
            }
            Err(_) => {
                task.abort();
                ToolResult::failed(
                    ErrorKind::HandlerError,
                    format!("tool handler timed out after {}s", self.handler_timeout.as_secs()),
                    json!({"reason": "timeout"}),
                )
            }
        }
    }
}

/// Typed workspace and tool errors keep their kind; anything else is a bounded
/// `handler_error` summary.
fn handler_failure(error: anyhow::Error) -> ToolError {
    if let Some(workspace) = error.downcast_ref::<WorkspaceError>() {
        return ToolError::new(
            workspace.kind(),
            truncate_message(&workspace.to_string(), HANDLER_ERROR_MAX_CHARS),
        )
        .with_details(workspace.details());
    }
    if let Some(tool_error) = error.downcast_ref::<ToolError>() {
        return tool_error.clone();
    }
    ToolError::new(
        ErrorKind::HandlerError,
        truncate_message(&format!("{error:#}"), HANDLER_ERROR_MAX_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agentdesk_core::{ErrorKind, InMemoryTraceSink, ToolPolicy, TraceHandle};
    use agentdesk_workspace::WorkspaceError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{RegistryError, ToolContext, ToolHandler, ToolRegistry, ToolRuntime, ToolSpec};

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Ok(json!({"echo": args}))
        }
    }

    struct Failing(fn() -> anyhow::Error);

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            Err((self.0)())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ToolHandler for Panicking {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            panic!("handler blew up");
        }
    }

    struct Sleeping;

    #[async_trait]
    impl ToolHandler for Sleeping {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        })
    }

    fn runtime_with(specs: Vec<ToolSpec>) -> ToolRuntime {
        let mut registry = ToolRegistry::new();
        for spec in specs {
            registry.register(spec).expect("register");
        }
        ToolRuntime::new(registry)
    }

    #[test]
    fn duplicate_and_invalid_schemas_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::new("echo", "", schema(), Arc::new(Echo))).expect("first");

        let duplicate = registry.register(ToolSpec::new("echo", "", schema(), Arc::new(Echo)));
        let invalid =
            registry.register(ToolSpec::new("bad", "", json!({"type": 12}), Arc::new(Echo)));

        assert!(matches!(duplicate, Err(RegistryError::DuplicateTool(ref name)) if name == "echo"));
        assert!(matches!(invalid, Err(RegistryError::InvalidSchema { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_fail_before_the_handler() {
        let runtime = runtime_with(vec![ToolSpec::new("echo", "", schema(), Arc::new(Echo))]);
        let ctx = ToolContext::new("p1");

        let unknown = runtime.execute("nope", json!({}), &ctx).await;
        let invalid = runtime.execute("echo", json!({"path": 7}), &ctx).await;

        assert_eq!(unknown.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(invalid.error_kind(), Some(ErrorKind::InvalidArguments));
        let errors = invalid.error().and_then(|error| error.details["errors"].as_array().cloned());
        assert!(errors.is_some_and(|list| !list.is_empty()));
    }

    #[tokio::test]
    async fn write_gates_apply_only_to_write_tools() {
        let runtime = runtime_with(vec![
            ToolSpec::new("write", "", schema(), Arc::new(Echo)),
            ToolSpec::new("read", "", schema(), Arc::new(Echo)).with_read_only(true),
        ]);
        let dry = ToolContext::new("p1").with_policy(ToolPolicy::dry_run());
        let gated = ToolContext::new("p1").with_policy(ToolPolicy::requiring_approval());

        let skipped = runtime.execute("write", json!({"path": "a"}), &dry).await;
        let denied = runtime.execute("write", json!({"path": "a"}), &gated).await;
        let read = runtime.execute("read", json!({"path": "a"}), &gated).await;

        assert_eq!(
            skipped.result(),
            Some(&json!({"dry_run": true, "skipped": true, "tool": "write"}))
        );
        assert_eq!(denied.error_kind(), Some(ErrorKind::Forbidden));
        assert_eq!(
            denied.error().map(|error| error.details["reason"].clone()),
            Some(json!("write_approval_required"))
        );
        assert!(read.is_ok());
    }

    #[tokio::test]
    async fn handler_failures_are_contained() {
        let long_message = || anyhow::anyhow!("{}", "x".repeat(1_000));
        let conflict = || {
            anyhow::Error::new(WorkspaceError::Conflict {
                path: "a.md".to_string(),
                expected_hash: "old".to_string(),
                current_hash: Some("new".to_string()),
            })
        };
        let runtime = runtime_with(vec![
            ToolSpec::new("long", "", json!({}), Arc::new(Failing(long_message)))
                .with_read_only(true),
            ToolSpec::new("conflict", "", json!({}), Arc::new(Failing(conflict))),
            ToolSpec::new("panic", "", json!({}), Arc::new(Panicking)).with_read_only(true),
        ]);
        let ctx = ToolContext::new("p1");

        let long = runtime.execute("long", Value::Null, &ctx).await;
        let typed = runtime.execute("conflict", json!({}), &ctx).await;
        let panicked = runtime.execute("panic", json!({}), &ctx).await;

        assert_eq!(long.error_kind(), Some(ErrorKind::HandlerError));
        assert_eq!(long.error().map(|error| error.message.chars().count()), Some(300));
        assert_eq!(typed.error_kind(), Some(ErrorKind::Conflict));
        assert_eq!(
            typed.error().map(|error| error.message.clone()),
            Some("conflict:file_changed_since_load".to_string())
        );
        assert_eq!(panicked.error_kind(), Some(ErrorKind::HandlerError));
    }

    #[tokio::test]
    async fn slow_handlers_time_out() {
        let runtime = runtime_with(vec![
            ToolSpec::new("slow", "", json!({}), Arc::new(Sleeping)).with_read_only(true)
        ])
        .with_handler_timeout(Duration::from_millis(20));

        let result = runtime.execute("slow", json!({}), &ToolContext::new("p1")).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::HandlerError));
        assert_eq!(
            result.error().map(|error| error.details["reason"].clone()),
            Some(json!("timeout"))
        );
    }

    #[tokio::test]
    async fn executions_emit_redacted_trace_events() {
        let sink = Arc::new(InMemoryTraceSink::default());
        let runtime = runtime_with(vec![ToolSpec::new("echo", "", json!({}), Arc::new(Echo))]);
        let ctx = ToolContext::new("p1").with_trace(TraceHandle::new("req-1", sink.clone()));

        runtime.execute("echo", json!({"api_key": "sk-live"}), &ctx).await;

        let calls = sink.events_of("tool.call");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request_id, "req-1");
        assert_eq!(calls[0].payload["args"]["api_key"], json!("***"));
        assert_eq!(sink.events_of("tool.result").len(), 1);
    }
}
