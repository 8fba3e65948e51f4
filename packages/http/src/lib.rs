#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP helpers for the public geodata services.
//!
//! Both external services are free public endpoints with rate limits, so
//! requests are sent once by default. Callers may opt into a small,
//! bounded number of retries with exponential backoff for transient
//! failures (timeouts, connection resets, 429, 5xx).
//!
//! ```ignore
//! let body = briefkasten_http::send_json(|| client.get(&url).query(&params), 0).await?;
//! let html = briefkasten_http::send_text(|| client.get(&url), 1).await?;
//! ```

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

/// Hard cap on configured retries.
pub const MAX_RETRIES_CAP: u32 = 3;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Errors from an HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The body was not valid JSON.
    #[error("JSON parse error: {message}")]
    Json {
        /// Parse error plus a body preview.
        message: String,
    },
}

/// Sends a request and parses the response body as JSON.
///
/// `build_request` is called once per attempt because
/// [`reqwest::RequestBuilder`] is consumed by `send()`.
///
/// # Errors
///
/// Returns [`HttpError`] if the request fails after all attempts, the
/// server returns a non-success status, or the body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(
    build_request: F,
    max_retries: u32,
) -> Result<serde_json::Value, HttpError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, max_retries).await?;
    let url = response.url().to_string();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| {
        let preview = preview(&text);
        log::warn!("JSON parse failed for {url}: {e}\n  body preview: {preview}");
        HttpError::Json {
            message: format!("{e} (received {} bytes)", text.len()),
        }
    })
}

/// Sends a request and returns the response body as text.
///
/// # Errors
///
/// Returns [`HttpError`] if the request fails after all attempts or the
/// server returns a non-success status.
#[allow(clippy::future_not_send)]
pub async fn send_text<F>(build_request: F, max_retries: u32) -> Result<String, HttpError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, max_retries).await?;
    Ok(response.text().await?)
}

/// Retry loop shared by [`send_json`] and [`send_text`]. Returns the first
/// successful (2xx/3xx) response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, HttpError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_retries = max_retries.min(MAX_RETRIES_CAP);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        let retries_left = attempt < max_retries;
        attempt += 1;

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && retries_left {
                    log::warn!("  transient error: {e}");
                    continue;
                }
                return Err(HttpError::Request(e));
            }
            Ok(response) => {
                let status = response.status();

                if (status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                    && retries_left
                {
                    log::warn!("  HTTP {status} from {}", response.url());
                    continue;
                }

                if status.is_client_error() || status.is_server_error() {
                    return Err(HttpError::Status {
                        status: status.as_u16(),
                        url: response.url().to_string(),
                    });
                }

                return Ok(response);
            }
        }
    }
}

/// Delay before retry `attempt` (1-based): 2s, 4s, 8s.
#[must_use]
pub const fn backoff_delay(attempt: u32) -> Duration {
    let exponent = if attempt > MAX_RETRIES_CAP {
        MAX_RETRIES_CAP
    } else {
        attempt
    };
    Duration::from_secs(1u64 << exponent)
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LEN {
        return text;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedResponse, serve};

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(8));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "ä".repeat(BODY_PREVIEW_LEN);
        let cut = preview(&text);
        assert!(cut.len() <= BODY_PREVIEW_LEN);
        assert!(cut.chars().all(|c| c == 'ä'));
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_retry() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        // Port 9 (discard) on localhost is not served in test environments
        let result = send_text(|| client.get("http://127.0.0.1:9/"), 0).await;
        assert!(matches!(result, Err(HttpError::Request(_))));
    }

    #[tokio::test]
    async fn json_body_is_parsed() {
        let base = serve(vec![CannedResponse::json(r#"{"results": [1, 2]}"#)])
            .await
            .unwrap();
        let client = client();

        let body = send_json(|| client.get(format!("{base}/identify")), 0)
            .await
            .unwrap();

        assert_eq!(body["results"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn error_status_is_mapped() {
        let base = serve(vec![CannedResponse::status(500)]).await.unwrap();
        let client = client();

        let result = send_json(|| client.get(format!("{base}/identify")), 0).await;

        match result {
            Err(HttpError::Status { status, url }) => {
                assert_eq!(status, 500);
                assert!(url.ends_with("/identify"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_a_json_error() {
        let base = serve(vec![CannedResponse::html("<html>maintenance</html>")])
            .await
            .unwrap();
        let client = client();

        let result = send_json(|| client.get(&base), 0).await;

        match result {
            Err(HttpError::Json { message }) => assert!(message.contains("24 bytes")),
            other => panic!("expected JSON error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_retried_when_allowed() {
        let base = serve(vec![
            CannedResponse::status(500),
            CannedResponse::json(r#"{"ok": true}"#),
        ])
        .await
        .unwrap();
        let client = client();

        let body = send_json(|| client.get(&base), 1).await.unwrap();

        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let base = serve(vec![
            CannedResponse::status(404),
            CannedResponse::html("never served"),
        ])
        .await
        .unwrap();
        let client = client();

        let result = send_text(|| client.get(&base), 3).await;

        assert!(matches!(result, Err(HttpError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn text_body_is_returned() {
        let base = serve(vec![CannedResponse::html("<title>2025-01-22.0</title>")])
            .await
            .unwrap();
        let client = client();

        let text = send_text(|| client.get(&base), 0).await.unwrap();

        assert_eq!(text, "<title>2025-01-22.0</title>");
    }
}
