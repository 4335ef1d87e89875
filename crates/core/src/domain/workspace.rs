use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProvider {
    #[serde(rename = "github")]
    GitHub,
    Bitbucket,
    AzureDevOps,
}

impl RemoteProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Bitbucket => "bitbucket",
            Self::AzureDevOps => "azure_devops",
        }
    }
}

impl FromStr for RemoteProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "bitbucket" => Ok(Self::Bitbucket),
            "azure_devops" | "azure" => Ok(Self::AzureDevOps),
            other => Err(format!("unsupported remote provider `{other}`")),
        }
    }
}

/// Where a project's files are served from. Serialized as `local` or `remote:<provider>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkspaceMode {
    Local,
    Remote(RemoteProvider),
}

impl fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(provider) => write!(f, "remote:{}", provider.as_str()),
        }
    }
}

impl FromStr for WorkspaceMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(':') {
            None if value == "local" => Ok(Self::Local),
            Some(("remote", provider)) => provider.parse().map(Self::Remote),
            _ => Err(format!("unsupported workspace mode `{value}`")),
        }
    }
}

impl Serialize for WorkspaceMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WorkspaceMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOnlyReason {
    #[default]
    None,
    BinaryFile,
    LargeFile,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub project_id: String,
    pub branch: String,
    pub path: String,
    pub mode: WorkspaceMode,
    pub content: String,
    pub content_hash: String,
    pub truncated: bool,
    pub read_only: bool,
    pub read_only_reason: ReadOnlyReason,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub project_id: String,
    pub path: String,
    pub mode: WorkspaceMode,
    pub requested_ref: String,
    pub resolved_ref: String,
    pub commit_id: Option<String>,
    pub web_url: Option<String>,
    pub content_hash: String,
    pub bytes_written: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub project_id: String,
    pub path: String,
    pub mode: WorkspaceMode,
    pub resolved_ref: String,
    pub deleted: bool,
    pub commit_id: Option<String>,
    pub web_url: Option<String>,
}

/// Lowercase hex SHA-256 of the exact UTF-8 bytes of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{content_hash, RemoteProvider, WorkspaceMode};

    #[test]
    fn content_hash_is_stable_sha256_hex() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_hash(""), content_hash(""));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn workspace_mode_uses_prefixed_string_form() {
        let mode = WorkspaceMode::Remote(RemoteProvider::AzureDevOps);
        assert_eq!(serde_json::to_value(mode).expect("serialize"), json!("remote:azure_devops"));
        assert_eq!("local".parse::<WorkspaceMode>(), Ok(WorkspaceMode::Local));
        assert_eq!(
            "remote:github".parse::<WorkspaceMode>(),
            Ok(WorkspaceMode::Remote(RemoteProvider::GitHub))
        );
        assert!("remote:gitlab".parse::<WorkspaceMode>().is_err());
    }
}
