use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorKind, ToolError};

/// Outcome of one tool invocation. Exactly one of `result` / `error` is present,
/// and `ok` is true iff `error` is absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawToolResult")]
pub struct ToolResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ToolError>,
}

impl ToolResult {
    pub fn success(result: Value) -> Self {
        Self { ok: true, result: Some(result), error: None }
    }

    pub fn failure(error: ToolError) -> Self {
        Self { ok: false, result: None, error: Some(error) }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>, details: Value) -> Self {
        Self::failure(ToolError::new(kind, message).with_details(details))
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|error| error.kind)
    }

    pub fn into_result(self) -> Result<Value, ToolError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Deserialize)]
struct RawToolResult {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ToolError>,
}

impl TryFrom<RawToolResult> for ToolResult {
    type Error = String;

    fn try_from(raw: RawToolResult) -> Result<Self, Self::Error> {
        match (raw.ok, raw.result, raw.error) {
            (true, result, None) => Ok(Self::success(result.unwrap_or(Value::Null))),
            (false, None, Some(error)) => Ok(Self::failure(error)),
            (ok, _, _) => Err(format!("inconsistent tool result (ok = {ok})")),
        }
    }
}
