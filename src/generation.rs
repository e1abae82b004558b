//! Chat-completions client for the generation contract.
//!
//! A thin, retry-free client against an OpenAI-compatible
//! `/chat/completions` endpoint in JSON mode. Every failure is typed so the
//! batch evaluator can fold it into a single failed item; retry and backoff
//! are the provider layer's concern, never this loop's.

use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::validator::parse_lenient;

const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Generous request timeout for slow model responses.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Shared pooled client so concurrent chunk fan-out reuses connections
/// instead of paying a TLS handshake per call.
static SHARED_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Per-item generation failure.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response truncated at the output limit")]
    Truncated { raw: String },
    #[error("empty response")]
    Empty,
    #[error("response is not valid JSON")]
    Malformed { raw: String },
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}

impl GenerationError {
    /// Transient failures are retryable at the provider layer; this loop
    /// folds them into failed items either way.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Transport(_) => true,
            GenerationError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Raw model text, when the failure retained any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            GenerationError::Truncated { raw } | GenerationError::Malformed { raw } => {
                Some(raw.as_str())
            }
            _ => None,
        }
    }
}

/// A successful structured generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub value: Value,
    pub raw_text: String,
    /// Provider-reported completion tokens, when present.
    pub output_tokens: Option<u64>,
}

#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
}

impl ChatClient {
    /// `base_url` includes the version segment, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Run one JSON-mode generation. A `finish_reason` of `"length"` and
    /// empty or non-JSON output are reported as typed failures carrying the
    /// raw text where there is any.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
        temperature: f64,
    ) -> Result<Generation, GenerationError> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
            "temperature": temperature,
            "response_format": {"type": "json_object"},
        });

        let resp = SHARED_CLIENT
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = resp.json().await?;
        let choice = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| GenerationError::UnexpectedResponse("missing choices".to_string()))?;
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("");
        let text = choice
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let output_tokens = data
            .get("usage")
            .and_then(|usage| usage.get("completion_tokens"))
            .and_then(Value::as_u64);

        if finish_reason == "length" {
            return Err(GenerationError::Truncated { raw: text });
        }
        if text.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        let value = parse_lenient(&text).map_err(|_| GenerationError::Malformed {
            raw: text.clone(),
        })?;
        Ok(Generation {
            value,
            raw_text: text,
            output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> ChatClient {
        ChatClient::new(format!("{}/v1", server.base_url()), "sk_test")
    }

    #[tokio::test]
    async fn test_generate_parses_structured_output() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("json_object");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {"content": "{\"intent\": \"refund\"}"},
                    "finish_reason": "stop"
                }],
                "usage": {"completion_tokens": 6}
            }));
        });

        let generation = client(&server)
            .generate("system", "user", "test-model", 0.0)
            .await
            .unwrap();
        assert_eq!(generation.value, json!({"intent": "refund"}));
        assert_eq!(generation.output_tokens, Some(6));
        mock.assert();
    }

    #[tokio::test]
    async fn test_generate_strips_code_fence() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {"content": "```json\n{\"x\": 1}\n```"},
                    "finish_reason": "stop"
                }]
            }));
        });

        let generation = client(&server)
            .generate("system", "user", "test-model", 0.0)
            .await
            .unwrap();
        assert_eq!(generation.value, json!({"x": 1}));
        assert_eq!(generation.output_tokens, None);
    }

    #[tokio::test]
    async fn test_length_finish_is_truncation_with_raw_text() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {"content": "{\"partial\": "},
                    "finish_reason": "length"
                }]
            }));
        });

        let err = client(&server)
            .generate("system", "user", "test-model", 0.0)
            .await
            .unwrap_err();
        match err {
            GenerationError::Truncated { raw } => assert_eq!(raw, "{\"partial\": "),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_and_malformed_output() {
        let server = MockServer::start();
        let _empty = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("empty-case");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": ""}, "finish_reason": "stop"}]
            }));
        });
        let _malformed = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("malformed-case");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": "not json"}, "finish_reason": "stop"}]
            }));
        });

        let client = client(&server);
        let err = client
            .generate("system", "empty-case", "test-model", 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Empty));

        let err = client
            .generate("system", "malformed-case", "test-model", 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.raw_output(), Some("not json"));
    }

    #[tokio::test]
    async fn test_api_error_transience() {
        let server = MockServer::start();
        let _five_hundred = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("overloaded");
            then.status(500).body("overloaded");
        });
        let _four_hundred = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("rejected");
            then.status(400).body("bad request");
        });

        let client = client(&server);
        let err = client
            .generate("system", "overloaded", "test-model", 0.0)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let err = client
            .generate("system", "rejected", "test-model", 0.0)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
