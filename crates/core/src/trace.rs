use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

const MAX_TRACE_STRING_CHARS: usize = 320;
const MAX_TRACE_LIST_ITEMS: usize = 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_id: String,
    pub request_id: String,
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(
        request_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

pub trait TraceSink: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl InMemoryTraceSink {
    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of(&self, event_type: &str) -> Vec<TraceEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn emit(&self, event: TraceEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards trace events to the process log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTraceSink;

impl TraceSink for TracingTraceSink {
    fn emit(&self, event: TraceEvent) {
        tracing::info!(
            event_name = "trace.event",
            request_id = %event.request_id,
            trace_event = %event.event_type,
            payload = %event.payload,
            "trace event"
        );
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn emit(&self, _event: TraceEvent) {}
}

/// Request-scoped emitter handed explicitly to every layer that records trace events.
#[derive(Clone)]
pub struct TraceHandle {
    request_id: String,
    sink: Arc<dyn TraceSink>,
}

impl TraceHandle {
    pub fn new(request_id: impl Into<String>, sink: Arc<dyn TraceSink>) -> Self {
        Self { request_id: request_id.into(), sink }
    }

    pub fn detached() -> Self {
        Self::new(Uuid::new_v4().to_string(), Arc::new(NoopTraceSink))
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Redacts `payload` and hands the event to the sink.
    pub fn emit(&self, event_type: &str, payload: Value) {
        self.sink.emit(TraceEvent::new(self.request_id.clone(), event_type, redact(&payload)));
    }
}

impl fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceHandle").field("request_id", &self.request_id).finish()
    }
}

/// Masks credential-looking keys and inline secrets, then bounds string and list sizes.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) => Value::String(truncate(&redact_text(text), MAX_TRACE_STRING_CHARS)),
        Value::Array(items) => {
            Value::Array(items.iter().take(MAX_TRACE_LIST_ITEMS).map(redact).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                if sensitive_key_pattern().is_some_and(|pattern| pattern.is_match(key)) {
                    out.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    out.insert(key.clone(), redact(item));
                }
            }
            Value::Object(out)
        }
    }
}

pub fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in inline_secret_patterns() {
        out = pattern.replace_all(&out, "${1}***").into_owned();
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut kept: String = text.chars().take(max_chars - 1).collect();
    kept.push('…');
    kept
}

fn sensitive_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)token|secret|password|api[_-]?key|authorization").ok())
        .as_ref()
}

fn inline_secret_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(api[_-]?key\s*[:=]\s*)([^\s,;]+)",
            r"(?i)(authorization\s*[:=]\s*bearer\s+)([^\s,;]+)",
            r"(?i)(token\s*[:=]\s*)([^\s,;]+)",
            r"(?i)(password\s*[:=]\s*)([^\s,;]+)",
            r"(?i)(secret\s*[:=]\s*)([^\s,;]+)",
        ]
        .into_iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{redact, redact_text, InMemoryTraceSink, TraceHandle};

    #[test]
    fn sensitive_keys_are_masked_recursively() {
        let redacted = redact(&json!({
            "args": {"path": "README.md", "api_key": "sk-live", "Authorization": "Bearer x"},
            "github_token": "ghp_abc",
        }));

        assert_eq!(redacted["args"]["path"], json!("README.md"));
        assert_eq!(redacted["args"]["api_key"], json!("***"));
        assert_eq!(redacted["args"]["Authorization"], json!("***"));
        assert_eq!(redacted["github_token"], json!("***"));
    }

    #[test]
    fn inline_secrets_are_masked_in_text() {
        assert_eq!(redact_text("call failed token=abc123, retry"), "call failed token=***, retry");
        assert_eq!(redact_text("Authorization: Bearer xyz"), "Authorization: Bearer ***");
        assert_eq!(redact_text("plain message"), "plain message");
    }

    #[test]
    fn long_strings_and_lists_are_bounded() {
        let redacted = redact(&json!({
            "text": "y".repeat(1000),
            "items": (0..50).collect::<Vec<_>>(),
        }));

        let text = redacted["text"].as_str().unwrap_or_default();
        assert_eq!(text.chars().count(), 320);
        assert!(text.ends_with('…'));
        assert_eq!(redacted["items"].as_array().map(Vec::len), Some(20));
    }

    #[test]
    fn handle_stamps_request_id_and_redacts_before_emitting() {
        let sink = InMemoryTraceSink::default();
        let handle = TraceHandle::new("req-7", Arc::new(sink.clone()));

        handle.emit("tool.call", json!({"tool": "search", "password": "hunter2"}));

        let events = sink.events_of("tool.call");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id, "req-7");
        assert_eq!(events[0].payload["password"], json!("***"));
        assert_eq!(events[0].payload["tool"], json!("search"));
    }
}
