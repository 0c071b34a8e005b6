//! Chat-completions client for the external LLM contract (spec.md §6),
//! adapted from the teacher's `services/llm/client.rs` HTTP plumbing and
//! grounded in `intelligence/core/classifier.py::_call_brain` /
//! `intelligence/core/orchestrator.py::_call_brain`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::ApiError;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Thin HTTP client over the `{model, messages, max_tokens, temperature} ->
/// {choices:[{message:{content}}]}` contract (spec.md §6). One instance is
/// constructed at startup and shared (cheap to clone: holds a pooled
/// `reqwest::Client`) across the classifier, NL->SQL and orchestrator.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Calls `{base_url}/v1/chat/completions` with a single user message.
    /// `max_tokens` follows the source's per-call tuning (500 for
    /// classification/SQL, 1000 for synthesis).
    pub async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        timeout_secs: u64,
        max_tokens: u32,
    ) -> Result<String, ApiError> {
        let request = ChatCompletionRequest {
            model: "default".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
        };

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::external(format!("LLM call timed out after {timeout_secs}s"))
                } else {
                    ApiError::external(format!("LLM call failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external(format!("LLM returned {status}: {body}")));
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| ApiError::external(format!("bad LLM response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::external("LLM returned an empty response".to_string()))
    }
}
