pub mod config;
pub mod domain;
pub mod errors;
pub mod policy;
pub mod trace;

pub use domain::tool_result::ToolResult;
pub use domain::workspace::{
    content_hash, DeleteOutcome, FileSnapshot, ReadOnlyReason, RemoteProvider, WorkspaceMode,
    WriteOutcome,
};
pub use errors::{ErrorKind, ToolError};
pub use policy::{ProjectToolPolicy, ToolPolicy};
pub use trace::{InMemoryTraceSink, TraceEvent, TraceHandle, TraceSink, TracingTraceSink};
