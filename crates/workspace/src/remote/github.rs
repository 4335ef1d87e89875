use agentdesk_core::config::RemoteConfig;
use agentdesk_core::RemoteProvider;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{send_with_retries, RetryPolicy};
use super::{
    commit_message, encode_path, mentions_missing_branch, trim_base_url, RemoteBackend,
    RemoteCommit, RemoteDeletion, RemoteError, RemoteFile,
};
use crate::text::looks_binary;

const PROVIDER: &str = "GitHub";
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Contents-API adapter: blobs are addressed by path + ref and updated with the
/// blob sha returned by a lookup read.
pub struct GitHubBackend {
    client: reqwest::Client,
    retry: RetryPolicy,
    api_base: String,
    owner: String,
    repo: String,
    token: SecretString,
    default_branch: String,
}

struct Blob {
    sha: Option<String>,
    raw: Vec<u8>,
    html_url: Option<String>,
}

impl GitHubBackend {
    pub fn new(
        client: reqwest::Client,
        retry: RetryPolicy,
        api_base: Option<&str>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: SecretString,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            api_base: trim_base_url(api_base, DEFAULT_API_BASE),
            owner: owner.into(),
            repo: repo.into(),
            token,
            default_branch: default_branch.into(),
        }
    }

    pub(crate) fn from_config(
        config: &RemoteConfig,
        default_branch: &str,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        let (owner, repo, token) = match config {
            RemoteConfig::GitHub { owner, repo, token, .. } => {
                (owner.clone(), repo.clone(), token.clone())
            }
            _ => (String::new(), String::new(), SecretString::from(String::new())),
        };
        Self::new(client, retry, config.api_base_url(), owner, repo, token, default_branch)
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.owner,
            self.repo,
            encode_path(path)
        )
    }

    fn blob_url(&self, path: &str, branch: &str) -> String {
        format!("https://github.com/{}/{}/blob/{}/{}", self.owner, self.repo, branch, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "agentdesk")
    }

    fn ensure_configured(&self) -> Result<(), RemoteError> {
        if self.owner.is_empty() || self.repo.is_empty() || self.token.expose_secret().is_empty() {
            return Err(RemoteError::Misconfigured {
                provider: PROVIDER,
                message: "owner, repo and token are required".to_string(),
            });
        }
        Ok(())
    }

    /// Fetches a blob, mapping 404s to branch or file absence.
    async fn fetch(&self, path: &str, branch: &str) -> Result<Blob, RemoteError> {
        self.ensure_configured()?;
        let url = self.contents_url(path);
        let operation = format!("read {path}");
        let response = send_with_retries(self.retry, PROVIDER, &operation, || {
            self.authorize(self.client.get(&url).query(&[("ref", branch)]))
        })
        .await
        .map_err(|error| classify_not_found(error, path, branch))?;

        let body: Value = response.json().await.map_err(|error| RemoteError::Payload {
            provider: PROVIDER,
            message: error.to_string(),
        })?;
        if body.get("encoding").and_then(Value::as_str) != Some("base64") {
            return Err(RemoteError::Payload {
                provider: PROVIDER,
                message: format!("`{path}` is not a base64 file payload"),
            });
        }
        let encoded: String = body
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect();
        let raw = STANDARD.decode(encoded).map_err(|error| RemoteError::Payload {
            provider: PROVIDER,
            message: format!("invalid base64 content: {error}"),
        })?;

        Ok(Blob {
            sha: string_field(&body, &["sha"]),
            raw,
            html_url: string_field(&body, &["html_url"]),
        })
    }
}

fn classify_not_found(error: RemoteError, path: &str, branch: &str) -> RemoteError {
    match error {
        RemoteError::Status { status: 404, ref detail, .. } if mentions_missing_branch(detail) => {
            RemoteError::BranchNotFound { provider: PROVIDER, branch: branch.to_string() }
        }
        RemoteError::Status { status: 404, .. } => {
            RemoteError::FileNotFound { provider: PROVIDER, path: path.to_string() }
        }
        other => other,
    }
}

fn string_field(value: &Value, pointer: &[&str]) -> Option<String> {
    let mut current = value;
    for key in pointer {
        current = current.get(key)?;
    }
    current.as_str().map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}

#[async_trait]
impl RemoteBackend for GitHubBackend {
    fn provider(&self) -> RemoteProvider {
        RemoteProvider::GitHub
    }

    fn default_branch(&self) -> &str {
        &self.default_branch
    }

    async fn read(&self, path: &str, branch: &str) -> Result<RemoteFile, RemoteError> {
        let blob = self.fetch(path, branch).await?;
        let binary = looks_binary(&blob.raw);
        Ok(RemoteFile {
            size_bytes: blob.raw.len() as u64,
            content: String::from_utf8_lossy(&blob.raw).into_owned(),
            binary,
            web_url: blob.html_url.or_else(|| Some(self.blob_url(path, branch))),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteCommit, RemoteError> {
        let existing = match self.fetch(path, branch).await {
            Ok(blob) => Some(blob),
            Err(RemoteError::FileNotFound { .. }) => None,
            Err(error) => return Err(error),
        };

        let mut payload = json!({
            "message": commit_message(path, actor),
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = existing.as_ref().and_then(|blob| blob.sha.clone()) {
            payload["sha"] = Value::String(sha);
        }

        let url = self.contents_url(path);
        let operation = format!("write {path}");
        let response = send_with_retries(self.retry, PROVIDER, &operation, || {
            self.authorize(self.client.put(&url).json(&payload))
        })
        .await
        .map_err(|error| classify_not_found(error, path, branch))?;
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let fallback_url =
            existing.and_then(|blob| blob.html_url).unwrap_or_else(|| self.blob_url(path, branch));
        Ok(RemoteCommit {
            branch: branch.to_string(),
            commit_id: string_field(&body, &["commit", "sha"]),
            web_url: Some(string_field(&body, &["content", "html_url"]).unwrap_or(fallback_url)),
        })
    }

    async fn delete(
        &self,
        path: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteDeletion, RemoteError> {
        let blob = match self.fetch(path, branch).await {
            Ok(blob) => blob,
            Err(RemoteError::FileNotFound { .. }) => {
                return Ok(RemoteDeletion {
                    branch: branch.to_string(),
                    deleted: false,
                    commit_id: None,
                    web_url: Some(self.blob_url(path, branch)),
                })
            }
            Err(error) => return Err(error),
        };
        let sha = blob.sha.ok_or_else(|| RemoteError::Payload {
            provider: PROVIDER,
            message: format!("no blob sha returned for `{path}`"),
        })?;

        let payload = json!({
            "message": commit_message(path, actor),
            "sha": sha,
            "branch": branch,
        });
        let url = self.contents_url(path);
        let operation = format!("delete {path}");
        let response = send_with_retries(self.retry, PROVIDER, &operation, || {
            self.authorize(self.client.delete(&url).json(&payload))
        })
        .await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);

        Ok(RemoteDeletion {
            branch: branch.to_string(),
            deleted: true,
            commit_id: string_field(&body, &["commit", "sha"]),
            web_url: blob.html_url.or_else(|| Some(self.blob_url(path, branch))),
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::GitHubBackend;
    use crate::remote::{RemoteBackend, RemoteError, RetryPolicy};

    fn backend(server: &MockServer) -> GitHubBackend {
        GitHubBackend::new(
            reqwest::Client::new(),
            RetryPolicy::immediate(1),
            Some(&server.uri()),
            "acme",
            "handbook",
            SecretString::from("ghp-test".to_string()),
            "main",
        )
    }

    #[tokio::test]
    async fn missing_branch_on_lookup_is_reported_as_branch_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs/a.md"))
            .and(query_param("ref", "feature/gone"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Branch not found"})),
            )
            .mount(&server)
            .await;

        let error = backend(&server)
            .write("docs/a.md", "hello", "feature/gone", "u-1")
            .await
            .expect_err("branch is missing");

        assert!(matches!(
            error,
            RemoteError::BranchNotFound { ref branch, .. } if branch == "feature/gone"
        ));
    }

    #[tokio::test]
    async fn write_sends_looked_up_sha_and_returns_commit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs/a.md"))
            .and(header("authorization", "Bearer ghp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "blob-1",
                "encoding": "base64",
                "content": "b2xk\n",
                "html_url": "https://github.com/acme/handbook/blob/main/docs/a.md",
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/acme/handbook/contents/docs/a.md"))
            .and(wiremock::matchers::body_partial_json(json!({
                "sha": "blob-1",
                "branch": "main",
                "content": "bmV3",
                "message": "workspace: update docs/a.md by u-1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "commit": {"sha": "c0ffee"},
                "content": {"html_url": "https://github.com/acme/handbook/blob/main/docs/a.md"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let commit =
            backend(&server).write("docs/a.md", "new", "main", "u-1").await.expect("write ok");

        assert_eq!(commit.commit_id.as_deref(), Some("c0ffee"));
        assert_eq!(commit.branch, "main");
    }

    #[tokio::test]
    async fn read_decodes_base64_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/README.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "blob-2",
                "encoding": "base64",
                "content": "aGVs\nbG8=\n",
            })))
            .mount(&server)
            .await;

        let file = backend(&server).read("README.md", "main").await.expect("read ok");

        assert_eq!(file.content, "hello");
        assert_eq!(file.size_bytes, 5);
        assert!(!file.binary);
    }

    #[tokio::test]
    async fn plain_404_is_file_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/missing.md"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let error = backend(&server).read("missing.md", "main").await.expect_err("missing");
        assert!(matches!(error, RemoteError::FileNotFound { .. }));
    }
}
