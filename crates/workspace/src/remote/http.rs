use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use super::{error_detail, RemoteError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 2, backoff: Duration::from_millis(350) }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self { attempts: attempts.max(1), ..Self::default() }
    }

    pub fn immediate(attempts: u32) -> Self {
        Self { attempts: attempts.max(1), backoff: Duration::ZERO }
    }
}

fn retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Sends the request built by `build`, retrying transport failures and transient
/// statuses. Any other status >= 400 becomes [`RemoteError::Status`] with the
/// provider's own error message as detail.
pub(crate) async fn send_with_retries<F>(
    policy: RetryPolicy,
    provider: &'static str,
    operation: &str,
    build: F,
) -> Result<Response, RemoteError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match build().send().await {
            Err(source) => {
                if attempt < attempts {
                    tracing::warn!(
                        event_name = "workspace.remote.retry",
                        provider,
                        operation,
                        attempt,
                        error = %source,
                        "remote request failed, retrying"
                    );
                } else {
                    return Err(RemoteError::Transport {
                        provider,
                        operation: operation.to_string(),
                        source,
                    });
                }
            }
            Ok(response) if response.status().as_u16() < 400 => return Ok(response),
            Ok(response) => {
                let status = response.status();
                if !(retryable(status) && attempt < attempts) {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RemoteError::Status {
                        provider,
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        detail: error_detail(&body),
                    });
                }
                tracing::warn!(
                    event_name = "workspace.remote.retry",
                    provider,
                    operation,
                    attempt,
                    status = status.as_u16(),
                    "remote request returned transient status, retrying"
                );
            }
        }
        tokio::time::sleep(policy.backoff * attempt).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{send_with_retries, RetryPolicy};
    use crate::remote::RemoteError;

    #[tokio::test]
    async fn transient_status_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", server.uri());
        let response =
            send_with_retries(RetryPolicy::immediate(2), "Test", "read", || client.get(&url))
                .await
                .expect("second attempt succeeds");

        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried_and_keep_detail() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/write"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string(r#"{"message":"sha is stale"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/write", server.uri());
        let policy = RetryPolicy { attempts: 3, backoff: Duration::ZERO };
        let error = send_with_retries(policy, "Test", "write a.md", || client.put(&url))
            .await
            .expect_err("422 is terminal");

        assert!(matches!(
            error,
            RemoteError::Status { status: 422, ref detail, .. } if detail == "sha is stale"
        ));
    }
}
