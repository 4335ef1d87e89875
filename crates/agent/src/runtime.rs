use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentdesk_core::config::{AgentConfig, LlmConfig};
use agentdesk_core::ErrorKind;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::knowledge::{KnowledgeBase, KnowledgeError, OpenedChunk};
use crate::llm::{ChatMessage, LlmError, ModelClient};
use crate::protocol::{parse_model_output, ModelIntent};
use crate::tools::{ToolContext, ToolRuntime};

pub const SEARCH_TOOL: &str = "search";
pub const OPEN_TOOL: &str = "open";

pub const FALLBACK_ANSWER: &str =
    "I couldn't find enough information in the knowledge base to answer that confidently.";
const MALFORMED_CORRECTION: &str =
    "Your last message was not valid JSON. Return exactly one JSON object in the required format.";

const SYSTEM_PROMPT: &str = r#"You are a project assistant.
You do NOT get the full project database. Instead you must use tools.

You can use these tools:
1) search: semantic search across the project knowledge base
2) open: open one or more chunks by id (to read more detail)
{extra_tools}
RULES:
- Use tools as needed. Do NOT guess.
- Keep tool usage minimal: usually 1-3 searches, then open 1-2 chunks.
- When you answer, include citations with chunk IDs in square brackets, e.g. [ch_abc123].
- If you cannot find information after a few searches, say so.

OUTPUT FORMAT (IMPORTANT):
You MUST respond with exactly ONE JSON object and nothing else.

If you want to call a tool:
{"tool":"search","args":{"query":"...","topK":6}}
{"tool":"open","args":{"ids":["...","..."],"maxChars":2000}}

If you want to provide a final answer:
{"final":{"answer":"...","citations":["chunk_id_1","chunk_id_2"]}}
"#;

#[derive(Clone, Debug, PartialEq)]
pub struct AgentSettings {
    pub max_steps: u32,
    pub top_k_default: usize,
    pub open_ids_cap: usize,
    pub open_max_chars_default: usize,
    pub source_cap: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub model_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 3,
            top_k_default: 4,
            open_ids_cap: 2,
            open_max_chars_default: 800,
            source_cap: 8,
            temperature: 0.1,
            max_tokens: 350,
            model_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentSettings {
    pub fn from_config(agent: &AgentConfig, llm: &LlmConfig) -> Self {
        Self {
            max_steps: agent.max_steps,
            top_k_default: agent.top_k_default as usize,
            open_ids_cap: agent.open_ids_cap,
            open_max_chars_default: agent.open_max_chars_default,
            source_cap: agent.source_cap,
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            model_timeout: Duration::from_secs(llm.timeout_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AskRequest {
    pub project_key: String,
    pub question: String,
    pub tool_context: ToolContext,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentAnswer {
    pub answer: String,
    pub sources: Vec<OpenedChunk>,
    pub steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<StopReason>,
}

/// One model turn inside a session. Kept only for the lifetime of `ask`.
#[derive(Clone, Debug)]
pub struct AgentStep {
    pub index: u32,
    pub raw_output: String,
    pub intent: ModelIntent,
    pub observation: Option<Value>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("knowledge base call failed: {0}")]
    Knowledge(#[from] KnowledgeError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UpstreamError
    }

    pub fn details(&self) -> Value {
        match self {
            Self::Model(LlmError::Timeout(after)) => json!({
                "source": "model",
                "reason": "timeout",
                "after_ms": after.as_millis() as u64,
            }),
            Self::Model(_) => json!({"source": "model"}),
            Self::Knowledge(_) => json!({"source": "knowledge_base"}),
        }
    }
}

/// Chunks opened during one session: last version per id plus first-open order.
#[derive(Debug, Default)]
pub struct OpenedChunks {
    by_id: HashMap<String, OpenedChunk>,
    order: Vec<String>,
}

impl OpenedChunks {
    pub fn record(&mut self, chunk: OpenedChunk) {
        if !self.by_id.contains_key(&chunk.id) {
            self.order.push(chunk.id.clone());
        }
        self.by_id.insert(chunk.id.clone(), chunk);
    }

    pub fn get(&self, id: &str) -> Option<&OpenedChunk> {
        self.by_id.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Up to `cap` most recently opened chunks, oldest first.
    pub fn most_recent(&self, cap: usize) -> Vec<OpenedChunk> {
        let skip = self.order.len().saturating_sub(cap);
        self.order[skip..].iter().filter_map(|id| self.by_id.get(id).cloned()).collect()
    }

    /// Cited chunks in citation order; falls back to the most recent opens when
    /// none of the citations were opened.
    pub fn sources_for(&self, citations: &[String], cap: usize) -> Vec<OpenedChunk> {
        let mut seen = Vec::new();
        let mut sources = Vec::new();
        for citation in citations {
            let id = citation.trim().trim_start_matches('[').trim_end_matches(']');
            if seen.iter().any(|existing| existing == id) {
                continue;
            }
            if let Some(chunk) = self.by_id.get(id) {
                seen.push(id.to_string());
                sources.push(chunk.clone());
            }
        }
        if sources.is_empty() {
            return self.most_recent(cap);
        }
        sources.truncate(cap);
        sources
    }
}

pub struct AgentRuntime {
    model: Arc<dyn ModelClient>,
    knowledge: Arc<dyn KnowledgeBase>,
    tools: Option<Arc<ToolRuntime>>,
    settings: AgentSettings,
}

impl AgentRuntime {
    pub fn new(
        model: Arc<dyn ModelClient>,
        knowledge: Arc<dyn KnowledgeBase>,
        settings: AgentSettings,
    ) -> Self {
        Self { model, knowledge, tools: None, settings }
    }

    /// Names registered here become callable by the model next to `search` and `open`.
    pub fn with_tools(mut self, tools: Arc<ToolRuntime>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AgentAnswer, AgentError> {
        let started = Instant::now();
        let trace = request.tool_context.trace.clone();
        let mut messages =
            vec![ChatMessage::system(self.system_prompt()), ChatMessage::user(&request.question)];
        let mut opened = OpenedChunks::default();
        let mut steps: Vec<AgentStep> = Vec::new();

        trace.emit(
            "agent.start",
            json!({"project_key": request.project_key, "max_steps": self.settings.max_steps}),
        );

        for index in 0..self.settings.max_steps {
            let raw_output = self.call_model(&messages).await?;
            let intent = parse_model_output(&raw_output);

            let observation = match &intent {
                ModelIntent::FinalAnswer { answer, citations } => {
                    let sources = opened.sources_for(citations, self.settings.source_cap);
                    trace.emit(
                        "agent.final",
                        json!({"step": index, "citations": citations, "sources": sources.len()}),
                    );
                    info!(
                        event_name = "agent.ask.answered",
                        project_key = %request.project_key,
                        steps = index + 1,
                        sources = sources.len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "agent produced a final answer"
                    );
                    return Ok(AgentAnswer {
                        answer: answer.clone(),
                        sources,
                        steps: index + 1,
                        stopped: None,
                    });
                }
                ModelIntent::ProtocolError { reason } => {
                    warn!(
                        event_name = "agent.protocol.malformed",
                        step = index,
                        reason = %reason,
                        "model output did not follow the protocol"
                    );
                    trace.emit("agent.malformed", json!({"step": index, "reason": reason}));
                    messages.push(ChatMessage::assistant(raw_output.clone()));
                    messages.push(ChatMessage::user(MALFORMED_CORRECTION));
                    None
                }
                ModelIntent::ToolCall { tool, args } => {
                    messages.push(ChatMessage::assistant(
                        intent.tool_call_json().unwrap_or_else(|| raw_output.clone()),
                    ));
                    trace.emit(
                        "agent.tool_call",
                        json!({"step": index, "tool": tool, "args": args}),
                    );
                    match self.run_tool(tool, args, &request, &mut opened).await? {
                        Some(observation) => {
                            messages.push(ChatMessage::tool(tool.clone(), observation.to_string()));
                            Some(observation)
                        }
                        None => {
                            messages.push(ChatMessage::user(self.unknown_tool_correction()));
                            None
                        }
                    }
                }
            };

            steps.push(AgentStep { index, raw_output, intent, observation });
        }

        let sources = opened.most_recent(self.settings.source_cap);
        trace.emit(
            "agent.stopped",
            json!({"reason": "max_steps", "steps": steps.len(), "opened": opened.len()}),
        );
        info!(
            event_name = "agent.ask.exhausted",
            project_key = %request.project_key,
            steps = steps.len(),
            opened = opened.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "agent step budget exhausted"
        );
        Ok(AgentAnswer {
            answer: FALLBACK_ANSWER.to_string(),
            sources,
            steps: self.settings.max_steps,
            stopped: Some(StopReason::MaxSteps),
        })
    }

    async fn call_model(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let call = self.model.chat(messages, self.settings.temperature, self.settings.max_tokens);
        match tokio::time::timeout(self.settings.model_timeout, call).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(LlmError::Timeout(self.settings.model_timeout).into()),
        }
    }

    /// `Ok(None)` means the name is neither built in nor registered.
    async fn run_tool(
        &self,
        tool: &str,
        args: &Value,
        request: &AskRequest,
        opened: &mut OpenedChunks,
    ) -> Result<Option<Value>, AgentError> {
        match tool {
            SEARCH_TOOL => {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|query| !query.is_empty())
                    .unwrap_or(request.question.as_str());
                let top_k = positive(args.get("topK")).unwrap_or(self.settings.top_k_default);
                let response = self.knowledge.search(&request.project_key, query, top_k).await?;
                Ok(Some(json!(response)))
            }
            OPEN_TOOL => {
                let ids: Vec<String> = match args.get("ids") {
                    Some(Value::String(id)) => vec![id.clone()],
                    Some(Value::Array(ids)) => ids
                        .iter()
                        .map(|id| match id {
                            Value::String(id) => id.clone(),
                            other => other.to_string(),
                        })
                        .take(self.settings.open_ids_cap)
                        .collect(),
                    _ => Vec::new(),
                };
                let max_chars =
                    positive(args.get("maxChars")).unwrap_or(self.settings.open_max_chars_default);
                let response = self.knowledge.open(&request.project_key, &ids, max_chars).await?;
                for chunk in &response.items {
                    opened.record(chunk.clone());
                }
                Ok(Some(json!(response)))
            }
            other => match &self.tools {
                Some(tools) if tools.registry().contains(other) => {
                    let result = tools.execute(other, args.clone(), &request.tool_context).await;
                    Ok(Some(result.to_value()))
                }
                _ => {
                    warn!(
                        event_name = "agent.tool.unknown",
                        tool = %other,
                        "model asked for an unknown tool"
                    );
                    Ok(None)
                }
            },
        }
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names = vec![SEARCH_TOOL.to_string(), OPEN_TOOL.to_string()];
        if let Some(tools) = &self.tools {
            names.extend(tools.registry().names().into_iter().map(str::to_string));
        }
        names
    }

    fn unknown_tool_correction(&self) -> String {
        format!(
            "Unknown tool. Use only: {}. Return a valid tool JSON or a final answer JSON.",
            self.tool_names().join(", ")
        )
    }

    fn system_prompt(&self) -> String {
        let extra_tools = match &self.tools {
            Some(tools) if !tools.registry().is_empty() => tools
                .registry()
                .describe()
                .iter()
                .enumerate()
                .map(|(offset, tool)| {
                    format!(
                        "{}) {}: {} Arguments schema: {}\n",
                        offset + 3,
                        tool.name,
                        tool.description,
                        tool.input_schema
                    )
                })
                .collect::<String>(),
            _ => String::new(),
        };
        SYSTEM_PROMPT.replace("{extra_tools}", &extra_tools)
    }
}

fn positive(value: Option<&Value>) -> Option<usize> {
    let number = match value? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (number > 0).then_some(number as usize)
}
