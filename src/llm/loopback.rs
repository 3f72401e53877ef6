//! Deterministic in-process provider client.
//!
//! Used by the daemon before platform provider clients are attached, and by
//! tests that need a real streaming backend without the network. Echoes the
//! last user message, streams it word by word, and counts whitespace-separated
//! words as tokens.

use super::{
    ChatRequest, ChatResponse, ChunkStream, EmbedRequest, EmbedResponse, OauthChallenge,
    OauthFlow, ProviderClient, ProviderError, StreamEvent, ToolCall, Usage,
};
use crate::core::registry::Provider;
use async_trait::async_trait;
use serde_json::json;

const EMBEDDING_WIDTH: usize = 8;

/// Echo client: the reply to any chat turn is the last user message.
#[derive(Debug, Default, Clone)]
pub struct LoopbackClient;

impl LoopbackClient {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(request: &ChatRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(empty)".to_string())
    }

    fn usage_for(request: &ChatRequest, reply: &str) -> Usage {
        let prompt_tokens: u64 = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let completion_tokens = reply.split_whitespace().count() as u64;
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[async_trait]
impl ProviderClient for LoopbackClient {
    async fn chat(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        tracing::debug!(
            "Loopback chat: provider={}, model={}",
            provider.provider_id,
            request.model
        );
        let content = Self::reply_for(&request);
        let usage = Self::usage_for(&request, &content);
        let tool_calls = request
            .tools
            .first()
            .map(|tool| {
                vec![ToolCall {
                    name: tool.name.clone(),
                    arguments: json!({}),
                }]
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: request.model,
            tool_calls,
            usage,
        })
    }

    async fn chat_stream(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChunkStream, ProviderError> {
        tracing::debug!(
            "Loopback stream: provider={}, model={}",
            provider.provider_id,
            request.model
        );
        let reply = Self::reply_for(&request);
        let usage = Self::usage_for(&request, &reply);
        let words: Vec<String> = reply.split_whitespace().map(str::to_string).collect();
        let first_tool = request.tools.first().cloned();

        let mut events: Vec<Result<StreamEvent, ProviderError>> = Vec::new();
        let last = words.len().saturating_sub(1);
        for (i, word) in words.into_iter().enumerate() {
            let text = if i == last { word } else { format!("{} ", word) };
            // The final step carries the tool call alongside its text delta,
            // exercising the text-before-tool-call delivery rule downstream.
            let tool_call = if i == last {
                first_tool.clone().map(|tool| ToolCall {
                    name: tool.name,
                    arguments: json!({}),
                })
            } else {
                None
            };
            events.push(Ok(StreamEvent::Delta {
                content: Some(text),
                tool_call,
            }));
        }
        events.push(Ok(StreamEvent::Done { usage }));

        Ok(Box::pin(tokio_stream::iter(events)))
    }

    async fn embed(
        &self,
        _provider: &Provider,
        request: EmbedRequest,
    ) -> Result<EmbedResponse, ProviderError> {
        let mut prompt_tokens = 0u64;
        let embeddings = request
            .input
            .iter()
            .map(|text| {
                prompt_tokens += text.split_whitespace().count() as u64;
                hash_embedding(text)
            })
            .collect();

        Ok(EmbedResponse {
            embeddings,
            usage: Usage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
            },
        })
    }
}

/// Fixed-width bag-of-bytes projection. Deterministic, not meaningful.
fn hash_embedding(text: &str) -> Vec<f64> {
    let mut out = vec![0f64; EMBEDDING_WIDTH];
    for (i, byte) in text.bytes().enumerate() {
        out[i % EMBEDDING_WIDTH] += byte as f64 / 255.0;
    }
    out
}

/// Canned device-flow broker for development setups with no platform OAuth
/// collaborator attached.
#[derive(Debug, Default, Clone)]
pub struct LoopbackOauth;

#[async_trait]
impl OauthFlow for LoopbackOauth {
    async fn start_device_flow(
        &self,
        provider_id: &str,
        provider_name: &str,
    ) -> Result<OauthChallenge, ProviderError> {
        tracing::info!(
            "Loopback device flow started for provider '{}' ({})",
            provider_name,
            provider_id
        );
        Ok(OauthChallenge {
            verification_uri: "http://localhost/device".into(),
            user_code: format!("LOOP-{}", &provider_id[..provider_id.len().min(4)]),
            expires_in_secs: 900,
        })
    }
}
