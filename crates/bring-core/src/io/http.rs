//! JSON API requests used by release resolvers.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Authentication header for an API request.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(&'a str),
    /// A custom header such as GitLab's `PRIVATE-TOKEN`.
    Header(&'static str, &'a str),
}

/// Retry policy for transient failures (connect errors, timeouts, 5xx, 429).
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
}

fn build(client: &Client, url: &str, auth: Auth<'_>) -> RequestBuilder {
    let req = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .header(reqwest::header::ACCEPT, "application/json");
    match auth {
        Auth::None => req,
        Auth::Bearer(token) => req.bearer_auth(token),
        Auth::Header(name, value) => req.header(name, value),
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// GET `url` and decode the JSON body, retrying only transient failures.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or immediately for
/// non-transient HTTP statuses and decode failures.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    auth: Auth<'_>,
    retry: Retry,
) -> Result<T> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = build(client, url, auth).send().await;
        let transient_error = match outcome {
            Ok(resp) if resp.status().is_success() => {
                return resp
                    .json::<T>()
                    .await
                    .with_context(|| format!("failed to decode response from {url}"));
            }
            Ok(resp) if is_transient_status(resp.status()) => {
                anyhow::anyhow!("{url} returned HTTP {}", resp.status())
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!("{url} returned HTTP {status}: {}", body.chars().take(200).collect::<String>());
            }
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                anyhow::Error::new(e).context(format!("request to {url} failed"))
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("request to {url} failed"))),
        };
        if attempt >= attempts {
            return Err(transient_error.context(format!("giving up after {attempt} attempt(s)")));
        }
        warn!(url, attempt, error = %transient_error, "transient API failure, retrying");
        tokio::time::sleep(retry.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const RETRY: Retry = Retry {
        attempts: 2,
        delay: Duration::from_millis(1),
    };

    #[tokio::test]
    async fn test_get_json_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/x")
            .match_header("authorization", "Bearer sekrit")
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let url = format!("{}/x", server.url());
        let value: Value = get_json(&Client::new(), &url, Auth::Bearer("sekrit"), RETRY)
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/x")
            .with_status(502)
            .expect(2)
            .create_async()
            .await;

        let url = format!("{}/x", server.url());
        let result: Result<Value> = get_json(&Client::new(), &url, Auth::None, RETRY).await;
        assert!(result.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/x")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/x", server.url());
        let result: Result<Value> = get_json(&Client::new(), &url, Auth::None, RETRY).await;
        assert!(result.is_err());
        mock.assert_async().await;
    }
}
