//! HTTP transport for OpenAI-compatible chat-completion endpoints.
//!
//! The transport deals in raw JSON bodies: it knows how to reach the endpoint
//! and how to turn an HTTP failure into a [`PipelineError`], nothing more.
//! Message building and the structured-output fallback live one level up in
//! [`crate::pipeline::llm`]. The passthrough route of the HTTP service sends
//! its bodies through the same transport.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Sends one chat-completion request body and returns the response body.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, body: &Value) -> Result<Value, PipelineError>;
}

/// `reqwest`-backed client for `{base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl OpenAiClient {
    /// Build a client from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for OpenAiClient {
    async fn send(&self, body: &Value) -> Result<Value, PipelineError> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_reqwest(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_reqwest(e))?;
        debug!("POST {} → {} ({} bytes)", self.endpoint, status, text.len());

        if !status.is_success() {
            return Err(PipelineError::CompletionFailed {
                status: Some(status.as_u16()),
                message: upstream_message(&text),
            });
        }

        serde_json::from_str(&text).map_err(|e| PipelineError::CompletionFailed {
            status: Some(status.as_u16()),
            message: format!("response is not JSON: {e}"),
        })
    }
}

impl OpenAiClient {
    fn map_reqwest(&self, e: reqwest::Error) -> PipelineError {
        if e.is_timeout() {
            PipelineError::CompletionTimeout {
                secs: self.timeout_secs,
            }
        } else {
            PipelineError::CompletionFailed {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

/// Pull `error.message` out of an OpenAI-style error body, else return the body.
pub(crate) fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
