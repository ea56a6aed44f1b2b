// Translation provider abstraction and the Gemini-backed implementation.
//
// The scheduler only sees the trait, so tests substitute scripted
// providers and the pipeline never couples to a concrete API.

use crate::core::errors::{TranslationError, TranslationResult};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Raw provider response before scheduling metadata is attached.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Send one prompt to the named model and return its text completion.
    async fn translate(&self, prompt: &str, model: &str) -> TranslationResult<ProviderResponse>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini generateContent client with retry and backoff.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(api_key: String, max_retries: u32, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            max_retries,
        }
    }

    fn request_url(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, model, self.api_key
        )
    }

    fn is_retryable(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status.is_server_error()
    }

    async fn send_with_retries(&self, url: &str, body: &Value) -> TranslationResult<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.client.post(url).json(body).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            TranslationError::Provider(format!("malformed response body: {e}"))
                        });
                    }

                    let text = response.text().await.unwrap_or_default();
                    if Self::is_retryable(status) && attempt <= self.max_retries {
                        let delay = Self::backoff_delay(attempt);
                        warn!(%status, attempt, ?delay, "retryable provider error, backing off");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(TranslationError::Provider(format!(
                        "HTTP {status}: {text}"
                    )));
                }
                Err(e) if attempt <= self.max_retries => {
                    let delay = Self::backoff_delay(attempt);
                    warn!(error = %e, attempt, ?delay, "request failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(TranslationError::Provider(e.to_string())),
            }
        }
    }

    /// Exponential backoff with jitter: base 500ms doubled per attempt,
    /// plus up to 250ms of random spread.
    fn backoff_delay(attempt: u32) -> Duration {
        let base = 500u64.saturating_mul(1 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..250);
        Duration::from_millis(base + jitter)
    }
}

/// Pull the completion text out of a generateContent response.
fn extract_text(response: &Value) -> Option<String> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(|s| s.to_string())
}

/// Total token usage as reported in usageMetadata, zero when absent.
fn extract_token_usage(response: &Value) -> u64 {
    response["usageMetadata"]["totalTokenCount"]
        .as_u64()
        .unwrap_or(0)
}

#[async_trait]
impl TranslationProvider for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %model, prompt_len = prompt.len()))]
    async fn translate(&self, prompt: &str, model: &str) -> TranslationResult<ProviderResponse> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": 0.2
            }
        });

        let response = self
            .send_with_retries(&self.request_url(model), &body)
            .await?;

        let text = extract_text(&response).ok_or_else(|| {
            TranslationError::Provider("response contained no candidate text".to_string())
        })?;
        let tokens_used = extract_token_usage(&response);
        debug!(tokens_used, "provider response received");

        Ok(ProviderResponse { text, tokens_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_and_usage() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello" }] }
            }],
            "usageMetadata": { "totalTokenCount": 42 }
        });
        assert_eq!(extract_text(&response).as_deref(), Some("Hello"));
        assert_eq!(extract_token_usage(&response), 42);
    }

    #[test]
    fn test_missing_fields_are_handled() {
        let response = json!({ "candidates": [] });
        assert!(extract_text(&response).is_none());
        assert_eq!(extract_token_usage(&response), 0);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let d1 = GeminiClient::backoff_delay(1);
        let d3 = GeminiClient::backoff_delay(3);
        assert!(d1 >= Duration::from_millis(1000));
        assert!(d3 >= Duration::from_millis(4000));
    }
}
