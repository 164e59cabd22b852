//! HTTP plumbing shared by the remote embedding and chat providers.
//!
//! Retry policy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub(crate) const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub(crate) const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` as JSON and return the parsed JSON response, retrying
/// transient failures up to `max_retries` times.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(attempt, "{} API error {}, retrying", label, status);
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                warn!(attempt, "{} request failed: {}", label, e);
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub(crate) fn base_url(configured: Option<&str>, default: &str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}

pub(crate) fn require_key(key: Option<&String>, var: &str) -> Result<String> {
    match key {
        Some(k) => Ok(k.clone()),
        None => bail!("{} environment variable not set", var),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trims_trailing_slash() {
        assert_eq!(
            base_url(Some("http://127.0.0.1:9000/"), GEMINI_BASE_URL),
            "http://127.0.0.1:9000"
        );
        assert_eq!(base_url(None, OPENAI_BASE_URL), OPENAI_BASE_URL);
    }

    #[test]
    fn missing_key_names_the_variable() {
        let err = require_key(None, "GOOGLE_API_KEY").unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
    }
}
