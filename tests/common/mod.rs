#![allow(dead_code)]

use async_trait::async_trait;
use modelgate::config::Config;
use modelgate::core::registry::{Model, ModelCost, Provider, ProviderKind};
use modelgate::core::routes::RouteTarget;
use modelgate::core::Gateway;
use modelgate::llm::loopback::{LoopbackClient, LoopbackOauth};
use modelgate::llm::{
    ChatRequest, ChatResponse, ChunkStream, EmbedRequest, EmbedResponse, ProviderClient,
    ProviderError, StreamEvent, Usage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Loopback-backed client whose failures are scripted by provider name.
pub struct MockClient {
    inner: LoopbackClient,
    fail_chat: Vec<String>,
    fail_stream_open: Vec<String>,
    fail_mid_stream: Vec<String>,
    pub calls: AtomicUsize,
}

impl MockClient {
    pub fn healthy() -> Self {
        Self::with_failures(&[], &[], &[])
    }

    pub fn with_failures(
        fail_chat: &[&str],
        fail_stream_open: &[&str],
        fail_mid_stream: &[&str],
    ) -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            inner: LoopbackClient::new(),
            fail_chat: names(fail_chat),
            fail_stream_open: names(fail_stream_open),
            fail_mid_stream: names(fail_mid_stream),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn chat(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_chat.contains(&provider.name) {
            return Err(ProviderError::RequestFailed(format!(
                "{} is down",
                provider.name
            )));
        }
        self.inner.chat(provider, request).await
    }

    async fn chat_stream(
        &self,
        provider: &Provider,
        request: ChatRequest,
    ) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream_open.contains(&provider.name) {
            return Err(ProviderError::RequestFailed(format!(
                "{} refused the stream",
                provider.name
            )));
        }
        if self.fail_mid_stream.contains(&provider.name) {
            let events: Vec<Result<StreamEvent, ProviderError>> = vec![
                Ok(StreamEvent::Delta {
                    content: Some("partial ".into()),
                    tool_call: None,
                }),
                Err(ProviderError::Stream(format!(
                    "{} dropped the stream",
                    provider.name
                ))),
            ];
            return Ok(Box::pin(tokio_stream::iter(events)));
        }
        self.inner.chat_stream(provider, request).await
    }

    async fn embed(
        &self,
        provider: &Provider,
        request: EmbedRequest,
    ) -> Result<EmbedResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_chat.contains(&provider.name) {
            return Err(ProviderError::RequestFailed(format!(
                "{} is down",
                provider.name
            )));
        }
        self.inner.embed(provider, request).await
    }
}

/// Gateway seeded with one provider per name, a shared model "m" priced at
/// $1/$2 per million tokens, and alias "fast" routed over the providers in
/// the given order. Returns provider name -> provider_id.
pub async fn seeded_gateway(
    client: Arc<dyn ProviderClient>,
    provider_names: &[&str],
) -> (Gateway, HashMap<String, String>) {
    let gateway = Gateway::new(Config::default(), client, Arc::new(LoopbackOauth));

    let mut ids = HashMap::new();
    let mut targets = Vec::new();
    for name in provider_names {
        let (provider, _) = gateway
            .add_provider(
                name,
                ProviderKind::ApiKey {
                    api_key: "test-key".into(),
                    base_url: None,
                },
            )
            .await
            .unwrap();
        targets.push(RouteTarget {
            provider_id: provider.provider_id.clone(),
            model_id: "m".into(),
        });
        ids.insert(name.to_string(), provider.provider_id);
    }

    gateway.set_models(vec![Model {
        model_id: "m".into(),
        provider_id: None,
        enabled: true,
        capabilities: Default::default(),
        cost: Some(ModelCost {
            input: 1.0,
            output: 2.0,
            cache_read: None,
            cache_write: None,
        }),
    }]);
    gateway.set_alias_list(vec!["fast".into()]);
    if !targets.is_empty() {
        gateway.set_route_rules("fast", targets).unwrap();
    }

    (gateway, ids)
}

/// Usage helper for assertions.
pub fn word_usage(prompt: u64, completion: u64) -> Usage {
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }
}
