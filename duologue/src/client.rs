//! Chat transport for agent endpoints.
//!
//! One request per call, full text back. The per-call deadline is owned by
//! the caller (see [`call_with_deadline`]), not by the transport, so a hung
//! request can be abandoned without tearing down the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SamplingParams;

/// Message role on the wire and in per-agent histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One ordered entry of an agent's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Failures at the network boundary. All are recoverable for the run:
/// the caller substitutes [`AgentError::inline_text`] and continues.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("endpoint {endpoint} unreachable: {detail}")]
    Unreachable { endpoint: String, detail: String },

    #[error("timed out after {seconds}s contacting {endpoint}")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("unparseable response from {endpoint}: {detail}")]
    BadResponse { endpoint: String, detail: String },
}

impl AgentError {
    /// The text substituted for a reply when the call fails.
    pub fn inline_text(&self) -> String {
        match self {
            Self::Unreachable { endpoint, detail } => {
                format!("[ERROR contacting {endpoint}: {detail}]")
            }
            Self::Timeout { endpoint, seconds } => {
                format!("[ERROR: timeout after {seconds}s contacting {endpoint}]")
            }
            Self::BadResponse { endpoint, detail } => {
                format!("[ERROR: unreadable reply from {endpoint}: {detail}]")
            }
        }
    }
}

/// The network seam: one chat request to one endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<String, AgentError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

type Extractor = fn(&Value) -> Option<String>;

/// Known response payload shapes, probed in order; first match wins.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("message_content", extract_message_content),
    ("message_text", extract_message_text),
    ("top_level_content", extract_top_level_content),
    ("choice_message_content", extract_choice_message_content),
];

fn extract_message_content(value: &Value) -> Option<String> {
    value
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn extract_message_text(value: &Value) -> Option<String> {
    value
        .get("message")?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

fn extract_top_level_content(value: &Value) -> Option<String> {
    value.get("content")?.as_str().map(str::to_string)
}

fn extract_choice_message_content(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Probe the payload with each extraction strategy in order.
pub fn extract_content(value: &Value) -> Option<(&'static str, String)> {
    for &(name, extract) in EXTRACTORS {
        if let Some(text) = extract(value) {
            debug!(strategy = name, "response payload extracted");
            return Some((name, text));
        }
    }
    None
}

/// HTTP implementation of [`ChatTransport`].
///
/// Built without a client-level timeout: the deadline belongs to the
/// caller.
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for HttpAgentClient {
    async fn send(
        &self,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<String, AgentError> {
        let body = ChatRequest {
            model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: params.stop.as_deref(),
            stream: params.stream,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Unreachable {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AgentError::Unreachable {
                endpoint: endpoint.to_string(),
                detail: format!("HTTP {status}: {snippet}"),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AgentError::BadResponse {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;

        match extract_content(&payload) {
            Some((_, text)) => Ok(text),
            None => Err(AgentError::BadResponse {
                endpoint: endpoint.to_string(),
                detail: "no content field in payload".to_string(),
            }),
        }
    }
}

/// Run one transport call on its own task, racing the deadline.
///
/// On expiry the task is abandoned, not cancelled: it may still complete
/// in the background and its result is discarded.
pub async fn call_with_deadline(
    transport: Arc<dyn ChatTransport>,
    endpoint: &str,
    model: &str,
    messages: Vec<Message>,
    params: SamplingParams,
    deadline: Duration,
) -> Result<String, AgentError> {
    let endpoint_owned = endpoint.to_string();
    let model_owned = model.to_string();
    let call_endpoint = endpoint_owned.clone();
    let task = tokio::spawn(async move {
        transport
            .send(&call_endpoint, &model_owned, &messages, &params)
            .await
    });

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AgentError::Unreachable {
            endpoint: endpoint_owned,
            detail: format!("call task failed: {join_err}"),
        }),
        Err(_) => {
            warn!(
                endpoint = %endpoint_owned,
                seconds = deadline.as_secs(),
                "agent call abandoned after deadline"
            );
            Err(AgentError::Timeout {
                endpoint: endpoint_owned,
                seconds: deadline.as_secs(),
            })
        }
    }
}
