//! Remote repository adapters. Each provider speaks its own REST dialect but exposes
//! the same read / write / delete contract, and signals a missing branch with
//! [`RemoteError::BranchNotFound`] so callers can fall back to the default branch.

mod azure;
mod bitbucket;
mod github;
mod http;

use std::sync::Arc;
use std::time::Duration;

use agentdesk_core::config::RemoteConfig;
use agentdesk_core::RemoteProvider;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

pub use azure::AzureDevOpsBackend;
pub use bitbucket::BitbucketBackend;
pub use github::GitHubBackend;
pub use http::RetryPolicy;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub size_bytes: u64,
    pub binary: bool,
    pub web_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommit {
    pub branch: String,
    pub commit_id: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteDeletion {
    pub branch: String,
    pub deleted: bool,
    pub commit_id: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("branch `{branch}` not found on {provider}")]
    BranchNotFound { provider: &'static str, branch: String },
    #[error("file `{path}` not found on {provider}")]
    FileNotFound { provider: &'static str, path: String },
    #[error("{provider} {operation} failed ({status}){}", detail_suffix(.detail))]
    Status { provider: &'static str, operation: String, status: u16, detail: String },
    #[error("{provider} {operation} failed: {source}")]
    Transport { provider: &'static str, operation: String, source: reqwest::Error },
    #[error("{provider} connector is misconfigured: {message}")]
    Misconfigured { provider: &'static str, message: String },
    #[error("{provider} returned an unexpected payload: {message}")]
    Payload { provider: &'static str, message: String },
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl RemoteError {
    pub fn details(&self) -> Value {
        match self {
            Self::Status { provider, status, .. } => {
                json!({"provider": provider, "status": status})
            }
            Self::BranchNotFound { provider, branch } => {
                json!({"provider": provider, "reason": "branch_not_found", "branch": branch})
            }
            Self::FileNotFound { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Misconfigured { provider, .. }
            | Self::Payload { provider, .. } => json!({"provider": provider}),
        }
    }
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn provider(&self) -> RemoteProvider;

    /// Branch used when the requested one does not exist on the remote.
    fn default_branch(&self) -> &str;

    async fn read(&self, path: &str, branch: &str) -> Result<RemoteFile, RemoteError>;

    async fn write(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteCommit, RemoteError>;

    async fn delete(
        &self,
        path: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteDeletion, RemoteError>;
}

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Builds the adapter for a configured connector.
pub fn connect(
    config: &RemoteConfig,
    default_branch: &str,
    client: reqwest::Client,
    retry: RetryPolicy,
) -> Arc<dyn RemoteBackend> {
    match config {
        RemoteConfig::GitHub { .. } => {
            Arc::new(GitHubBackend::from_config(config, default_branch, client, retry))
        }
        RemoteConfig::Bitbucket { .. } => {
            Arc::new(BitbucketBackend::from_config(config, default_branch, client, retry))
        }
        RemoteConfig::AzureDevOps { .. } => {
            Arc::new(AzureDevOpsBackend::from_config(config, default_branch, client, retry))
        }
    }
}

/// At most two distinct branches to try: the requested one, then the backend default
/// (or `main` when both are the same).
pub fn branch_candidates(requested: &str, default_branch: &str) -> Vec<String> {
    let mut candidates = Vec::with_capacity(2);
    for branch in [requested.trim(), default_branch.trim(), "main"] {
        if !branch.is_empty() && !candidates.iter().any(|known: &String| known == branch) {
            candidates.push(branch.to_string());
        }
        if candidates.len() == 2 {
            break;
        }
    }
    candidates
}

pub(crate) fn commit_message(path: &str, actor: &str) -> String {
    let actor = actor.trim();
    let actor = if actor.is_empty() { "workspace" } else { actor };
    format!("workspace: update {path} by {actor}")
}

/// Pulls a human-readable message out of a provider error body.
pub(crate) fn error_detail(body: &str) -> String {
    let raw = body.trim();
    if raw.is_empty() {
        return String::new();
    }
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return raw.chars().take(500).collect();
    };
    if let Some(message) = parsed
        .get("error")
        .and_then(|error| error.get("message").or_else(|| error.get("detail")))
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
    {
        return message.trim().to_string();
    }
    for key in ["message", "detail", "error_description"] {
        if let Some(message) =
            parsed.get(key).and_then(Value::as_str).filter(|message| !message.trim().is_empty())
        {
            return message.trim().to_string();
        }
    }
    raw.chars().take(500).collect()
}

pub(crate) fn mentions_missing_branch(detail: &str) -> bool {
    let lowered = detail.to_ascii_lowercase();
    lowered.contains("branch") && lowered.contains("not found")
}

/// Percent-encodes each path segment while keeping `/` separators.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn trim_base_url(configured: Option<&str>, fallback: &str) -> String {
    configured.unwrap_or(fallback).trim_end_matches('/').to_string()
}
