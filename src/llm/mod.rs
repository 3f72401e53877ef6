pub mod loopback;

use crate::core::registry::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Errors raised by provider client implementations.
///
/// Opaque to the gateway core: any variant fails the current target attempt
/// and moves failover on to the next target.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("streaming error: {0}")]
    Stream(String),
}

/// A chat message with a role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A tool the model may call this turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// A tool invocation produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Request for one chat turn against a concrete provider/model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Response from a non-streaming chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
}

/// Request for embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: Vec<String>,
}

/// Response from an embeddings request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f64>>,
    #[serde(default)]
    pub usage: Usage,
}

/// One incremental piece of streamed output.
///
/// A delta may carry a text fragment and a tool-call fragment from the same
/// generation step; the stream manager surfaces the text strictly before the
/// tool call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta {
        content: Option<String>,
        tool_call: Option<ToolCall>,
    },
    Done {
        usage: Usage,
    },
}

/// A boxed, pinned, sendable chunk stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Uniform capability every upstream backend exposes to the core.
///
/// Implementations own all provider API translation (HTTP clients, local
/// runners); the core only sees success/failure outcomes. The provider record
/// carries whatever the backend needs to address the endpoint.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send one chat turn and wait for the full completion.
    async fn chat(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;

    /// Send one chat turn and stream the completion incrementally.
    async fn chat_stream(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChunkStream, ProviderError>;

    /// Generate embeddings for the given input texts.
    async fn embed(
        &self,
        provider: &Provider,
        request: EmbedRequest,
    ) -> Result<EmbedResponse, ProviderError>;
}

/// Pending device-flow challenge handed back when an OAuth provider is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthChallenge {
    pub verification_uri: String,
    pub user_code: String,
    pub expires_in_secs: u64,
}

/// External OAuth collaborator: runs the device flow and owns credentials.
#[async_trait]
pub trait OauthFlow: Send + Sync {
    /// Start a device flow for a newly added provider, returning the pending
    /// challenge the caller must complete out of band.
    async fn start_device_flow(
        &self,
        provider_id: &str,
        provider_name: &str,
    ) -> Result<OauthChallenge, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_serde() {
        let request = ChatRequest {
            model: "gpt-4".into(),
            messages: vec![ChatMessage::user("Hello")],
            tools: vec![],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gpt-4"));
        assert!(json.contains("Hello"));

        // Omitted tools deserialize to an empty list.
        let back: ChatRequest = serde_json::from_str(r#"{"model":"m","messages":[]}"#).unwrap();
        assert!(back.tools.is_empty());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "rate limit exceeded, retry after 30s");
    }

    #[test]
    fn test_tool_call_default_arguments() {
        let call: ToolCall = serde_json::from_str(r#"{"name":"search"}"#).unwrap();
        assert_eq!(call.name, "search");
        assert!(call.arguments.is_null());
    }
}
