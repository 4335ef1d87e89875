//! Agent side of agentdesk: the tool registry and runtime with its policy gates,
//! the built-in workspace tools, the model client and the bounded ask loop.
//!
//! A tool call always flows registry lookup → schema validation → capability
//! check → write gate → handler, and always comes back as a `ToolResult`.

pub mod capabilities;
pub mod guardrails;
pub mod knowledge;
pub mod llm;
pub mod protocol;
pub mod runtime;
pub mod tools;
pub mod workspace_tools;

pub use capabilities::{
    AllowAllCapabilities, CapabilityDecision, CapabilityStore, StaticCapabilityStore,
};
pub use guardrails::{GuardDecision, WriteGuard};
pub use knowledge::{
    InMemoryKnowledgeBase, KnowledgeBase, KnowledgeError, OpenResponse, OpenedChunk, SearchHit,
    SearchResponse,
};
pub use llm::{ChatMessage, ChatRole, LlmError, ModelClient, OpenAiCompatibleClient};
pub use protocol::{parse_model_output, ModelIntent};
pub use runtime::{
    AgentAnswer, AgentError, AgentRuntime, AgentSettings, AgentStep, AskRequest, OpenedChunks,
    StopReason,
};
pub use tools::{
    RegistryError, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry, ToolRuntime, ToolSpec,
};
pub use workspace_tools::register_workspace_tools;
