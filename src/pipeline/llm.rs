//! Completion gateway: chat messages in, model text out.
//!
//! This module owns the OpenAI chat-completions request shape and the one
//! piece of policy that sits on top of the raw transport: structured output
//! with graceful degradation.
//!
//! ## Structured-output fallback
//!
//! When a JSON schema is supplied the first request carries
//! `response_format: {type: "json_schema", …}`. Many OpenAI-compatible
//! servers (older vLLM, llama.cpp, some proxies) reject that field with a
//! 400. Such a rejection is recognised by its error text and the same
//! messages are resent without `response_format`; the strict-JSON system
//! instruction still asks for JSON and [`crate::pipeline::parse`] recovers it.
//! Every other failure (network, auth, 5xx) propagates on the first attempt.

use crate::error::PipelineError;
use crate::provider::ChatTransport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Error-text fragments that identify a rejected `response_format`.
const SCHEMA_REJECTION_MARKERS: &[&str] = &[
    "response_format",
    "json_schema",
    "structured output",
    "schema",
];

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// Plain string content or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A typed part of user content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image reference; always a `data:` URI here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image part with `detail: "high"`.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: Some("high".to_string()),
            },
        }
    }
}

/// A JSON schema plus the name the API wants for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub name: String,
    pub schema: Value,
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    r#type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Deterministic chat completions with optional structured output.
#[derive(Clone)]
pub struct CompletionGateway {
    transport: Arc<dyn ChatTransport>,
    model: String,
}

impl CompletionGateway {
    pub fn new(transport: Arc<dyn ChatTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one completion at temperature 0 and return the assistant text.
    ///
    /// With `schema`, structured output is requested first; a schema-related
    /// rejection triggers one schema-less retry whose result is returned as is.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: Option<&SchemaSpec>,
    ) -> Result<String, PipelineError> {
        let start = Instant::now();
        let Some(schema) = schema else {
            return self.send(messages, None).await;
        };

        match self.send(messages, Some(schema)).await {
            Ok(text) => {
                debug!(
                    "Structured completion '{}' in {}ms",
                    schema.name,
                    start.elapsed().as_millis()
                );
                Ok(text)
            }
            Err(e) if is_schema_rejection(&e) => {
                warn!(
                    "Endpoint rejected response_format for '{}', retrying without it: {}",
                    schema.name, e
                );
                self.send(messages, None).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        schema: Option<&SchemaSpec>,
    ) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            response_format: schema.map(|s| ResponseFormat {
                r#type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &s.name,
                    schema: &s.schema,
                },
            }),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| PipelineError::Internal(format!("serialise chat request: {e}")))?;

        let response = self.transport.send(&body).await?;
        extract_content(response)
    }
}

/// First choice's message text.
fn extract_content(response: Value) -> Result<String, PipelineError> {
    let parsed: ChatResponse =
        serde_json::from_value(response).map_err(|e| PipelineError::CompletionFailed {
            status: None,
            message: format!("unexpected completion response shape: {e}"),
        })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| PipelineError::CompletionFailed {
            status: None,
            message: "completion response has no message content".into(),
        })
}

/// Does this error mean "this endpoint does not support structured output"?
pub fn is_schema_rejection(err: &PipelineError) -> bool {
    let PipelineError::CompletionFailed { status, message } = err else {
        return false;
    };
    if matches!(status, Some(s) if *s >= 500) {
        return false;
    }
    let message = message.to_lowercase();
    SCHEMA_REJECTION_MARKERS.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Value, PipelineError>>>,
        seen: Mutex<Vec<Value>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Value, PipelineError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatTransport for Scripted {
        async fn send(&self, body: &Value) -> Result<Value, PipelineError> {
            self.seen.lock().unwrap().push(body.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra request")
        }
    }

    fn reply(text: &str) -> Result<Value, PipelineError> {
        Ok(json!({"choices": [{"message": {"role": "assistant", "content": text}}]}))
    }

    fn schema() -> SchemaSpec {
        SchemaSpec::new("page_extraction", json!({"type": "object"}))
    }

    #[test]
    fn user_parts_serialise_as_openai_content() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::text("Extract totals"),
            ContentPart::image_url("data:image/png;base64,AAAA"),
        ]);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "Extract totals"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA", "detail": "high"}}
                ]
            })
        );
    }

    #[test]
    fn system_message_is_plain_string() {
        assert_eq!(
            serde_json::to_value(ChatMessage::system("JSON only")).unwrap(),
            json!({"role": "system", "content": "JSON only"})
        );
    }

    #[tokio::test]
    async fn request_is_deterministic_and_schema_free_by_default() {
        let transport = Scripted::new(vec![reply("hello")]);
        let gateway = CompletionGateway::new(transport.clone(), "gpt-test");
        let text = gateway
            .complete(&[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(text, "hello");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0]["model"], "gpt-test");
        assert_eq!(seen[0]["temperature"], 0.0);
        assert!(seen[0].get("response_format").is_none());
    }

    #[tokio::test]
    async fn schema_goes_into_response_format() {
        let transport = Scripted::new(vec![reply("{}")]);
        let gateway = CompletionGateway::new(transport.clone(), "m");
        gateway
            .complete(&[ChatMessage::user("hi")], Some(&schema()))
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(
            seen[0]["response_format"],
            json!({
                "type": "json_schema",
                "json_schema": {"name": "page_extraction", "schema": {"type": "object"}}
            })
        );
    }

    #[tokio::test]
    async fn schema_rejection_retries_without_schema() {
        let transport = Scripted::new(vec![
            Err(PipelineError::CompletionFailed {
                status: Some(400),
                message: "Unsupported parameter: 'response_format' of type json_schema".into(),
            }),
            reply("free text answer"),
        ]);
        let gateway = CompletionGateway::new(transport.clone(), "m");
        let text = gateway
            .complete(&[ChatMessage::user("hi")], Some(&schema()))
            .await
            .unwrap();
        assert_eq!(text, "free text answer");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].get("response_format").is_some());
        assert!(seen[1].get("response_format").is_none());
        assert_eq!(seen[0]["messages"], seen[1]["messages"]);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let transport = Scripted::new(vec![Err(PipelineError::CompletionFailed {
            status: Some(401),
            message: "Incorrect API key provided".into(),
        })]);
        let gateway = CompletionGateway::new(transport.clone(), "m");
        let err = gateway
            .complete(&[ChatMessage::user("hi")], Some(&schema()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CompletionFailed {
                status: Some(401),
                ..
            }
        ));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_content_is_an_error() {
        let transport = Scripted::new(vec![Ok(json!({"choices": []}))]);
        let gateway = CompletionGateway::new(transport, "m");
        let err = gateway
            .complete(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no message content"));
    }

    #[test]
    fn schema_rejection_detection() {
        let reject = |status, message: &str| PipelineError::CompletionFailed {
            status,
            message: message.into(),
        };
        assert!(is_schema_rejection(&reject(Some(400), "response_format is not supported")));
        assert!(is_schema_rejection(&reject(Some(422), "Invalid JSON Schema")));
        assert!(is_schema_rejection(&reject(None, "Structured Outputs unavailable")));
        assert!(!is_schema_rejection(&reject(Some(400), "context length exceeded")));
        assert!(!is_schema_rejection(&reject(Some(503), "schema service overloaded")));
        assert!(!is_schema_rejection(&PipelineError::CompletionTimeout { secs: 3 }));
    }
}
