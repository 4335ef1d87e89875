use std::path::PathBuf;

use agentdesk_core::ErrorKind;
use serde_json::{json, Value};
use thiserror::Error;

use crate::remote::RemoteError;

pub const CONFLICT_MESSAGE: &str = "conflict:file_changed_since_load";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("{0}")]
    InvalidArguments(String),
    #[error("unknown project `{0}`")]
    ProjectNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("no repository source is configured for project `{0}`")]
    NoRepositorySource(String),
    #[error("cannot write binary file `{0}` in workspace editor mode")]
    BinaryFile(String),
    #[error("conflict:file_changed_since_load")]
    Conflict { path: String, expected_hash: String, current_hash: Option<String> },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("filesystem error on `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl WorkspaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. } | Self::InvalidArguments(_) | Self::BinaryFile(_) => {
                ErrorKind::InvalidArguments
            }
            Self::ProjectNotFound(_) | Self::FileNotFound(_) | Self::NoRepositorySource(_) => {
                ErrorKind::NotFound
            }
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Remote(_) => ErrorKind::UpstreamError,
            Self::Io { .. } => ErrorKind::HandlerError,
        }
    }

    pub fn details(&self) -> Value {
        match self {
            Self::Conflict { path, expected_hash, current_hash } => json!({
                "reason": "hash_mismatch",
                "path": path,
                "expected_hash": expected_hash,
                "current_hash": current_hash,
            }),
            Self::Remote(error) => error.details(),
            Self::InvalidPath { path, reason } => json!({"path": path, "reason": reason}),
            _ => Value::Null,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use agentdesk_core::ErrorKind;
    use serde_json::json;

    use super::WorkspaceError;

    #[test]
    fn conflict_carries_marker_message_and_hashes() {
        let error = WorkspaceError::Conflict {
            path: "docs/a.md".to_string(),
            expected_hash: "abc".to_string(),
            current_hash: Some("def".to_string()),
        };

        assert_eq!(error.to_string(), "conflict:file_changed_since_load");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert_eq!(error.details()["current_hash"], json!("def"));
    }

    #[test]
    fn missing_sources_are_not_found() {
        assert_eq!(WorkspaceError::FileNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(WorkspaceError::BinaryFile("x.png".into()).kind(), ErrorKind::InvalidArguments);
    }
}
