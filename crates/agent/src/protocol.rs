//! Parsing of raw model output into a typed intent. The model is asked for exactly
//! one JSON object, either `{"tool": ..., "args": {...}}` or
//! `{"final": {"answer": ..., "citations": [...]}}`; anything else is a
//! [`ModelIntent::ProtocolError`] the loop can recover from.

use serde_json::{json, Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum ModelIntent {
    ToolCall { tool: String, args: Value },
    FinalAnswer { answer: String, citations: Vec<String> },
    ProtocolError { reason: String },
}

impl ModelIntent {
    /// Canonical JSON echo of a tool call, replayed to the model as its own turn.
    pub fn tool_call_json(&self) -> Option<String> {
        match self {
            Self::ToolCall { tool, args } => Some(json!({"tool": tool, "args": args}).to_string()),
            _ => None,
        }
    }
}

pub fn parse_model_output(raw: &str) -> ModelIntent {
    match extract_object(raw) {
        Some(object) => classify(object),
        None => ModelIntent::ProtocolError {
            reason: "output is not a single JSON object".to_string(),
        },
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = match rest.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
            _ => rest,
        };
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text.trim()
}

/// Strict parse first; otherwise the outermost `{ ... }` span embedded in prose.
fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_code_fences(raw);
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(cleaned) {
        return Some(object);
    }
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn classify(mut object: Map<String, Value>) -> ModelIntent {
    if let Some(final_value) = object.remove("final") {
        return final_answer(final_value);
    }
    match object.remove("tool") {
        Some(Value::String(tool)) if !tool.trim().is_empty() => {
            let args = match object.remove("args") {
                Some(Value::Object(args)) => Value::Object(args),
                _ => Value::Object(Map::new()),
            };
            ModelIntent::ToolCall { tool: tool.trim().to_string(), args }
        }
        Some(_) => ModelIntent::ProtocolError {
            reason: "`tool` must be a non-empty string".to_string(),
        },
        None => ModelIntent::ProtocolError {
            reason: "object has neither `final` nor `tool`".to_string(),
        },
    }
}

fn final_answer(value: Value) -> ModelIntent {
    let (answer, citations) = match value {
        Value::Object(mut final_object) => (
            final_object.remove("answer").unwrap_or(Value::Null),
            final_object.remove("citations").unwrap_or(Value::Null),
        ),
        other => (other, Value::Null),
    };

    let answer = match answer {
        Value::Null => String::new(),
        Value::Array(parts) => parts.into_iter().map(stringify).collect::<Vec<_>>().join("\n"),
        other => stringify(other),
    };
    let citations = match citations {
        Value::String(citation) => vec![citation],
        Value::Array(items) => items.into_iter().map(stringify).collect(),
        _ => Vec::new(),
    };

    ModelIntent::FinalAnswer { answer: answer.trim().to_string(), citations }
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
