use agentdesk_core::config::RemoteConfig;
use agentdesk_core::RemoteProvider;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{send_with_retries, RetryPolicy};
use super::{
    commit_message, trim_base_url, RemoteBackend, RemoteCommit, RemoteDeletion, RemoteError,
    RemoteFile,
};
use crate::text::looks_binary;

const PROVIDER: &str = "Azure DevOps";
const DEFAULT_API_BASE: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.1";

/// Git REST adapter. Every change is a push against the branch tip, so writes and
/// deletes resolve the tip first and fail with [`RemoteError::BranchNotFound`] when
/// the ref does not exist.
pub struct AzureDevOpsBackend {
    client: reqwest::Client,
    retry: RetryPolicy,
    api_base: String,
    organization: String,
    project: String,
    repository: String,
    pat: SecretString,
    default_branch: String,
}

impl AzureDevOpsBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        retry: RetryPolicy,
        api_base: Option<&str>,
        organization: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
        pat: SecretString,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            api_base: trim_base_url(api_base, DEFAULT_API_BASE),
            organization: organization.into(),
            project: project.into(),
            repository: repository.into(),
            pat,
            default_branch: default_branch.into(),
        }
    }

    pub(crate) fn from_config(
        config: &RemoteConfig,
        default_branch: &str,
        client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        let RemoteConfig::AzureDevOps { organization, project, repository, pat, .. } = config
        else {
            return Self::new(
                client,
                retry,
                None,
                "",
                "",
                "",
                SecretString::from(String::new()),
                default_branch,
            );
        };
        Self::new(
            client,
            retry,
            config.api_base_url(),
            organization.clone(),
            project.clone(),
            repository.clone(),
            pat.clone(),
            default_branch,
        )
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/{}/{}/_apis/git/repositories/{}",
            self.api_base,
            urlencoding::encode(&self.organization),
            urlencoding::encode(&self.project),
            urlencoding::encode(&self.repository)
        )
    }

    fn web_url(&self, path: &str, branch: &str) -> String {
        format!(
            "https://dev.azure.com/{}/{}/_git/{}?path=/{}&version=GB{}",
            self.organization, self.project, self.repository, path, branch
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth("", Some(self.pat.expose_secret()))
    }

    fn ensure_configured(&self) -> Result<(), RemoteError> {
        if self.organization.is_empty()
            || self.project.is_empty()
            || self.repository.is_empty()
            || self.pat.expose_secret().is_empty()
        {
            return Err(RemoteError::Misconfigured {
                provider: PROVIDER,
                message: "organization, project, repository and pat are required".to_string(),
            });
        }
        Ok(())
    }

    async fn branch_tip(&self, branch: &str) -> Result<String, RemoteError> {
        self.ensure_configured()?;
        let url = format!("{}/refs", self.repo_url());
        let filter = format!("heads/{branch}");
        let response = send_with_retries(self.retry, PROVIDER, "resolve branch", || {
            self.authorize(
                self.client
                    .get(&url)
                    .query(&[("filter", filter.as_str()), ("api-version", API_VERSION)]),
            )
        })
        .await?;
        let body: Value = response.json().await.map_err(|error| RemoteError::Payload {
            provider: PROVIDER,
            message: error.to_string(),
        })?;

        let full_name = format!("refs/heads/{branch}");
        body.get("value")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(full_name.as_str()))
            .and_then(|entry| entry.get("objectId").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| RemoteError::BranchNotFound {
                provider: PROVIDER,
                branch: branch.to_string(),
            })
    }

    /// Reads the item at `path` on `branch`; `Ok(None)` when the file does not exist.
    async fn item(&self, path: &str, branch: &str) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/items", self.repo_url());
        let item_path = format!("/{path}");
        let operation = format!("read {path}");
        let result = send_with_retries(self.retry, PROVIDER, &operation, || {
            self.authorize(self.client.get(&url).query(&[
                ("path", item_path.as_str()),
                ("includeContent", "true"),
                ("versionDescriptor.versionType", "branch"),
                ("versionDescriptor.version", branch),
                ("$format", "json"),
                ("api-version", API_VERSION),
            ]))
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(RemoteError::Status { status: 404, .. }) => return Ok(None),
            Err(error) => return Err(error),
        };
        let body: Value = response.json().await.map_err(|error| RemoteError::Payload {
            provider: PROVIDER,
            message: error.to_string(),
        })?;
        Ok(Some(body.get("content").and_then(Value::as_str).unwrap_or_default().to_string()))
    }

    async fn push(
        &self,
        branch: &str,
        tip: &str,
        comment: String,
        change: Value,
        operation: &str,
    ) -> Result<Option<String>, RemoteError> {
        let url = format!("{}/pushes", self.repo_url());
        let payload = json!({
            "refUpdates": [{"name": format!("refs/heads/{branch}"), "oldObjectId": tip}],
            "commits": [{"comment": comment, "changes": [change]}],
        });
        let response = send_with_retries(self.retry, PROVIDER, operation, || {
            self.authorize(
                self.client.post(&url).query(&[("api-version", API_VERSION)]).json(&payload),
            )
        })
        .await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let commit_id = body
            .pointer("/commits/0/commitId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| body.get("pushId").map(|id| id.to_string()));
        Ok(commit_id)
    }
}

#[async_trait]
impl RemoteBackend for AzureDevOpsBackend {
    fn provider(&self) -> RemoteProvider {
        RemoteProvider::AzureDevOps
    }

    fn default_branch(&self) -> &str {
        &self.default_branch
    }

    async fn read(&self, path: &str, branch: &str) -> Result<RemoteFile, RemoteError> {
        self.branch_tip(branch).await?;
        let content = self.item(path, branch).await?.ok_or_else(|| RemoteError::FileNotFound {
            provider: PROVIDER,
            path: path.to_string(),
        })?;
        Ok(RemoteFile {
            size_bytes: content.len() as u64,
            binary: looks_binary(content.as_bytes()),
            content,
            web_url: Some(self.web_url(path, branch)),
        })
    }

    async fn write(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteCommit, RemoteError> {
        let tip = self.branch_tip(branch).await?;
        let change_type = match self.item(path, branch).await? {
            Some(_) => "edit",
            None => "add",
        };
        let change = json!({
            "changeType": change_type,
            "item": {"path": format!("/{path}")},
            "newContent": {"content": content, "contentType": "rawtext"},
        });
        let commit_id = self
            .push(branch, &tip, commit_message(path, actor), change, &format!("write {path}"))
            .await?;

        Ok(RemoteCommit {
            branch: branch.to_string(),
            commit_id,
            web_url: Some(self.web_url(path, branch)),
        })
    }

    async fn delete(
        &self,
        path: &str,
        branch: &str,
        actor: &str,
    ) -> Result<RemoteDeletion, RemoteError> {
        let tip = self.branch_tip(branch).await?;
        if self.item(path, branch).await?.is_none() {
            return Ok(RemoteDeletion {
                branch: branch.to_string(),
                deleted: false,
                commit_id: None,
                web_url: Some(self.web_url(path, branch)),
            });
        }
        let change = json!({"changeType": "delete", "item": {"path": format!("/{path}")}});
        let commit_id = self
            .push(branch, &tip, commit_message(path, actor), change, &format!("delete {path}"))
            .await?;

        Ok(RemoteDeletion {
            branch: branch.to_string(),
            deleted: true,
            commit_id,
            web_url: Some(self.web_url(path, branch)),
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::AzureDevOpsBackend;
    use crate::remote::{RemoteBackend, RemoteError, RetryPolicy};

    const REPO: &str = "/contoso/web/_apis/git/repositories/site";

    fn backend(server: &MockServer) -> AzureDevOpsBackend {
        AzureDevOpsBackend::new(
            reqwest::Client::new(),
            RetryPolicy::immediate(1),
            Some(&server.uri()),
            "contoso",
            "web",
            "site",
            SecretString::from("pat-123".to_string()),
            "main",
        )
    }

    async fn mount_tip(server: &MockServer, branch: &str, object_id: Option<&str>) {
        let value = match object_id {
            Some(id) => json!([{"name": format!("refs/heads/{branch}"), "objectId": id}]),
            None => json!([]),
        };
        Mock::given(method("GET"))
            .and(path(format!("{REPO}/refs")))
            .and(query_param("filter", format!("heads/{branch}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": value})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn missing_ref_is_branch_not_found() {
        let server = MockServer::start().await;
        mount_tip(&server, "feature", None).await;

        let error = backend(&server).read("a.md", "feature").await.expect_err("no ref");

        assert!(matches!(
            error,
            RemoteError::BranchNotFound { ref branch, .. } if branch == "feature"
        ));
    }

    #[tokio::test]
    async fn write_pushes_add_change_against_branch_tip() {
        let server = MockServer::start().await;
        mount_tip(&server, "main", Some("tip-1")).await;
        Mock::given(method("GET"))
            .and(path(format!("{REPO}/items")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{REPO}/pushes")))
            .and(body_partial_json(json!({
                "refUpdates": [{"name": "refs/heads/main", "oldObjectId": "tip-1"}],
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"pushId": 7, "commits": [{"commitId": "c0ffee"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let commit =
            backend(&server).write("docs/new.md", "body", "main", "u-9").await.expect("push");

        assert_eq!(commit.commit_id.as_deref(), Some("c0ffee"));
        assert_eq!(commit.branch, "main");
    }

    #[tokio::test]
    async fn delete_of_missing_item_reports_not_deleted() {
        let server = MockServer::start().await;
        mount_tip(&server, "main", Some("tip-1")).await;
        Mock::given(method("GET"))
            .and(path(format!("{REPO}/items")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let deletion = backend(&server).delete("gone.md", "main", "u-9").await.expect("delete");

        assert!(!deletion.deleted);
        assert!(deletion.commit_id.is_none());
    }
}
