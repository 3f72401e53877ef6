use crate::core::error::{GatewayError, Result};
use crate::core::metrics::{now_ms, MetricsAggregator};
use crate::core::registry::{ModelCost, Provider, Registry};
use crate::core::routes::{RouteTable, RouteTarget};
use crate::llm::{
    ChatMessage, ChatRequest, ChunkStream, EmbedRequest, EmbedResponse, ProviderClient,
    ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a successful chat dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub provider_id: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
}

/// The target that won a streaming dispatch, plus its pricing for the
/// end-of-stream usage record.
#[derive(Debug, Clone)]
pub struct StreamTicket {
    pub target: RouteTarget,
    pub cost: Option<ModelCost>,
}

/// Executes requests against a resolved route with ordered failover.
///
/// Targets are attempted strictly in rule order; the first success wins and
/// later targets are never touched. Every per-target attempt outcome posts
/// exactly one update to the metrics aggregator tagged with that target.
pub struct Dispatcher {
    registry: Arc<Registry>,
    routes: Arc<RouteTable>,
    client: Arc<dyn ProviderClient>,
    metrics: Arc<MetricsAggregator>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        routes: Arc<RouteTable>,
        client: Arc<dyn ProviderClient>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            registry,
            routes,
            client,
            metrics,
        }
    }

    /// Resolve `alias` and run the failover loop for one chat turn.
    pub async fn complete(
        &self,
        alias: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<Completion> {
        let targets = self.routes.resolve(alias)?;
        let mut last_error = String::new();

        for (attempt, target) in targets.iter().enumerate() {
            match self.try_chat(target, &messages, &tools).await {
                Ok(completion) => {
                    tracing::debug!(
                        "Dispatch succeeded: alias='{}', target={}/{}, attempt={}",
                        alias,
                        target.provider_id,
                        target.model_id,
                        attempt + 1
                    );
                    return Ok(completion);
                }
                Err(reason) => {
                    tracing::warn!(
                        "Dispatch attempt failed: alias='{}', target={}/{}: {}",
                        alias,
                        target.provider_id,
                        target.model_id,
                        reason
                    );
                    self.metrics
                        .record_failure(&target.provider_id, &target.model_id, now_ms());
                    last_error = reason;
                }
            }
        }

        Err(GatewayError::UpstreamExhausted {
            alias: alias.to_string(),
            attempts: targets.len(),
            last_error,
        })
    }

    async fn try_chat(
        &self,
        target: &RouteTarget,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> std::result::Result<Completion, String> {
        let (provider, cost) = self.validate_target(target)?;

        let request = ChatRequest {
            model: target.model_id.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        };
        let response = self
            .client
            .chat(&provider, request)
            .await
            .map_err(|e| e.to_string())?;

        self.metrics.record_success(
            &target.provider_id,
            &target.model_id,
            response.usage,
            estimate_cost(cost.as_ref(), response.usage),
            now_ms(),
        );

        Ok(Completion {
            content: response.content,
            model: target.model_id.clone(),
            provider_id: target.provider_id.clone(),
            tool_calls: response.tool_calls,
            usage: response.usage,
        })
    }

    /// Run the failover loop in streaming mode.
    ///
    /// Returns the winning target's ticket plus its live chunk stream. Once a
    /// stream is open, failover never happens again for this generation: a
    /// mid-stream failure is the stream owner's problem to surface.
    pub async fn open_stream(
        &self,
        alias: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<(StreamTicket, ChunkStream)> {
        let targets = self.routes.resolve(alias)?;
        let mut last_error = String::new();

        for target in &targets {
            let (provider, cost) = match self.validate_target(target) {
                Ok(found) => found,
                Err(reason) => {
                    self.metrics
                        .record_failure(&target.provider_id, &target.model_id, now_ms());
                    last_error = reason;
                    continue;
                }
            };

            let request = ChatRequest {
                model: target.model_id.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            match self.client.chat_stream(&provider, request).await {
                Ok(stream) => {
                    return Ok((
                        StreamTicket {
                            target: target.clone(),
                            cost,
                        },
                        stream,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        "Stream open failed: alias='{}', target={}/{}: {}",
                        alias,
                        target.provider_id,
                        target.model_id,
                        e
                    );
                    self.metrics
                        .record_failure(&target.provider_id, &target.model_id, now_ms());
                    last_error = e.to_string();
                }
            }
        }

        Err(GatewayError::UpstreamExhausted {
            alias: alias.to_string(),
            attempts: targets.len(),
            last_error,
        })
    }

    /// Run the failover loop for an embeddings request.
    pub async fn embed(&self, alias: &str, input: Vec<String>) -> Result<EmbedResponse> {
        let targets = self.routes.resolve(alias)?;
        let mut last_error = String::new();

        for target in &targets {
            let (provider, cost) = match self.validate_target(target) {
                Ok(found) => found,
                Err(reason) => {
                    self.metrics
                        .record_failure(&target.provider_id, &target.model_id, now_ms());
                    last_error = reason;
                    continue;
                }
            };

            let request = EmbedRequest {
                model: target.model_id.clone(),
                input: input.clone(),
            };
            match self.client.embed(&provider, request).await {
                Ok(response) => {
                    self.metrics.record_success(
                        &target.provider_id,
                        &target.model_id,
                        response.usage,
                        estimate_cost(cost.as_ref(), response.usage),
                        now_ms(),
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        "Embed attempt failed: alias='{}', target={}/{}: {}",
                        alias,
                        target.provider_id,
                        target.model_id,
                        e
                    );
                    self.metrics
                        .record_failure(&target.provider_id, &target.model_id, now_ms());
                    last_error = e.to_string();
                }
            }
        }

        Err(GatewayError::UpstreamExhausted {
            alias: alias.to_string(),
            attempts: targets.len(),
            last_error,
        })
    }

    /// A target is attemptable only while its provider exists and is enabled
    /// and its model is still in the catalog and enabled. Anything else fails
    /// the attempt without invoking the client.
    fn validate_target(
        &self,
        target: &RouteTarget,
    ) -> std::result::Result<(Provider, Option<ModelCost>), String> {
        let provider = self
            .registry
            .get_provider(&target.provider_id)
            .map_err(|_| format!("provider '{}' no longer exists", target.provider_id))?;
        if !provider.enabled {
            return Err(format!("provider '{}' is disabled", target.provider_id));
        }

        let model = self
            .registry
            .find_model(&target.model_id, &target.provider_id)
            .ok_or_else(|| format!("model '{}' no longer exists", target.model_id))?;
        if !model.enabled {
            return Err(format!("model '{}' is disabled", target.model_id));
        }

        Ok((provider, model.cost))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }
}

/// Cost in USD from per-million-token rates and observed counts.
pub fn estimate_cost(cost: Option<&ModelCost>, usage: Usage) -> f64 {
    match cost {
        Some(c) => {
            (usage.prompt_tokens as f64 * c.input + usage.completion_tokens as f64 * c.output)
                / 1_000_000.0
        }
        None => 0.0,
    }
}
