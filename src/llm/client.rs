//! Anthropic Messages API client: one streamed call with retry/backoff.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::LlmError;
use crate::llm::{
    HEARTBEAT_TIMEOUT_SECS, MAX_RETRIES, MIN_SALVAGEABLE_CHARS,
    RETRY_DELAYS_SECS, TRANSPORT_TIMEOUT_SECS, ONE_M_CONTEXT_BETA, is_non_retryable,
    needs_one_m_context, thinking_effort_for_chars, ThinkingEffort,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub allow_thinking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub thinking_tokens: u32,
    pub retries: u32,
    /// Set when the stream was cut short but enough text was salvaged to
    /// keep (`content.len() >= MIN_SALVAGEABLE_CHARS`).
    pub truncated: bool,
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// No whole-request `.timeout()` here: reqwest's builder timeout caps
    /// total call duration, which would kill a healthy stream still
    /// actively producing events past that mark (plausible with 1M-context
    /// or deep multi-pass calls). Liveness is instead enforced per stream
    /// event in `drain_stream` via `HEARTBEAT_TIMEOUT_SECS`, which also
    /// catches a socket that never sends a first byte.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(TRANSPORT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, api_key: api_key.into(), base_url: base_url.into() })
    }

    /// Run one call, retrying on transient failures per the original's
    /// fixed backoff schedule. Gives up immediately on a non-retryable
    /// provider error.
    pub async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut last_err: Option<String> = None;

        for attempt in 0..MAX_RETRIES {
            match self.call_once(request).await {
                Ok(mut response) => {
                    response.retries = attempt;
                    return Ok(response);
                }
                Err(LlmError::SalvageTooSmall { .. }) | Err(LlmError::HeartbeatTimeout) => {
                    let message = "stream stalled or produced too little salvageable output".to_string();
                    if attempt + 1 == MAX_RETRIES {
                        return Err(LlmError::ExhaustedRetries {
                            model: request.model.clone(),
                            retries: attempt + 1,
                            message,
                        });
                    }
                    last_err = Some(message);
                }
                Err(LlmError::NonRetryable(message)) => {
                    return Err(LlmError::NonRetryable(message));
                }
                Err(other) => {
                    let message = other.to_string();
                    if is_non_retryable(&message) {
                        return Err(LlmError::NonRetryable(message));
                    }
                    if attempt + 1 == MAX_RETRIES {
                        return Err(LlmError::ExhaustedRetries {
                            model: request.model.clone(),
                            retries: attempt + 1,
                            message,
                        });
                    }
                    last_err = Some(message);
                }
            }

            let delay = RETRY_DELAYS_SECS[attempt as usize % RETRY_DELAYS_SECS.len()];
            warn!(attempt, delay, error = ?last_err, "llm call failed, retrying");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        Err(LlmError::ExhaustedRetries {
            model: request.model.clone(),
            retries: MAX_RETRIES,
            message: last_err.unwrap_or_else(|| "exhausted retries".to_string()),
        })
    }

    async fn call_once(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let char_count = request.system_prompt.len() + request.user_prompt.len();
        let effort = thinking_effort_for_chars(char_count);
        let thinking_enabled = request.allow_thinking && effort != ThinkingEffort::Disabled;

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "stream": true,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.user_prompt}],
        });
        if thinking_enabled {
            let budget = if effort == ThinkingEffort::Low { 2048 } else { 8192 };
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }

        let mut req = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json");

        if needs_one_m_context(char_count) {
            req = req.header("anthropic-beta", ONE_M_CONTEXT_BETA);
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Other(anyhow::anyhow!(e)))?;

        if let Err(status_err) = response.error_for_status_ref() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{status_err}: {text}");
            if is_non_retryable(&message) {
                return Err(LlmError::NonRetryable(message));
            }
            return Err(LlmError::Other(anyhow::anyhow!(message)));
        }

        self.drain_stream(response, &request.model).await
    }

    async fn drain_stream(
        &self,
        response: reqwest::Response,
        model: &str,
    ) -> Result<LlmResponse, LlmError> {
        let mut stream = response.bytes_stream().eventsource();
        let mut content = String::new();
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;
        let mut thinking_tokens = 0u32;
        let mut model_used = model.to_string();

        loop {
            let next = timeout(Duration::from_secs(HEARTBEAT_TIMEOUT_SECS), stream.next()).await;
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    if content.len() >= MIN_SALVAGEABLE_CHARS {
                        debug!(chars = content.len(), "heartbeat timeout, salvaging partial content");
                        return Ok(LlmResponse {
                            content,
                            model_used,
                            input_tokens,
                            output_tokens,
                            thinking_tokens,
                            retries: 0,
                            truncated: true,
                        });
                    }
                    return Err(LlmError::HeartbeatTimeout);
                }
            };

            let event = event.map_err(|e| LlmError::Other(anyhow::anyhow!(e)))?;
            if event.data == "[DONE]" || event.data.is_empty() {
                continue;
            }

            let payload: serde_json::Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match payload.get("type").and_then(|t| t.as_str()) {
                Some("message_start") => {
                    if let Some(m) = payload.pointer("/message/model").and_then(|v| v.as_str()) {
                        model_used = m.to_string();
                    }
                    if let Some(t) = payload.pointer("/message/usage/input_tokens").and_then(|v| v.as_u64()) {
                        input_tokens = t as u32;
                    }
                }
                Some("content_block_delta") => {
                    if let Some(text) = payload.pointer("/delta/text").and_then(|v| v.as_str()) {
                        content.push_str(text);
                    }
                    if let Some(text) = payload.pointer("/delta/thinking").and_then(|v| v.as_str()) {
                        thinking_tokens += (text.len() / 4) as u32;
                    }
                }
                Some("message_delta") => {
                    if let Some(t) = payload.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                        output_tokens = t as u32;
                    }
                }
                _ => {}
            }
        }

        if content.is_empty() {
            return Err(LlmError::SalvageTooSmall { chars: 0, min: MIN_SALVAGEABLE_CHARS });
        }

        Ok(LlmResponse {
            content,
            model_used,
            input_tokens,
            output_tokens,
            thinking_tokens,
            retries: 0,
            truncated: false,
        })
    }
}
