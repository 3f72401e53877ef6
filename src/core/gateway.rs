use crate::config::Config;
use crate::core::connections::{Connection, ConnectionTracker};
use crate::core::dispatcher::{Completion, Dispatcher};
use crate::core::error::{GatewayError, Result};
use crate::core::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::core::registry::{Model, Provider, ProviderKind, Registry};
use crate::core::routes::{RouteRule, RouteTable, RouteTarget};
use crate::core::stream::{ReplyChunk, StreamManager};
use crate::llm::{ChatMessage, EmbedResponse, OauthChallenge, OauthFlow, ProviderClient, ToolDefinition};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The gateway facade: one entry point per exposed operation.
///
/// Owns every core component and the cross-component flows (OAuth kickoff on
/// provider add, stream cleanup on connection close). Transport layers hold an
/// `Arc<Gateway>` and call straight in; there is no internal command queue.
pub struct Gateway {
    config: Config,
    registry: Arc<Registry>,
    routes: Arc<RouteTable>,
    metrics: Arc<MetricsAggregator>,
    dispatcher: Arc<Dispatcher>,
    streams: Arc<StreamManager>,
    connections: ConnectionTracker,
    oauth: Arc<dyn OauthFlow>,
}

impl Gateway {
    pub fn new(
        config: Config,
        client: Arc<dyn ProviderClient>,
        oauth: Arc<dyn OauthFlow>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let routes = Arc::new(RouteTable::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&routes),
            client,
            Arc::clone(&metrics),
        ));
        let streams = Arc::new(StreamManager::new(
            Arc::clone(&dispatcher),
            Duration::from_millis(config.streams.default_reply_wait_ms),
        ));

        Self {
            config,
            registry,
            routes,
            metrics,
            dispatcher,
            streams,
            connections: ConnectionTracker::new(),
            oauth,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- providers ----

    pub fn list_providers(&self, name_filter: Option<&str>) -> Vec<Provider> {
        self.registry.list_providers(name_filter)
    }

    pub fn get_provider(&self, provider_id: &str) -> Result<Provider> {
        self.registry.get_provider(provider_id)
    }

    /// Add a provider. For OAuth providers the device flow starts immediately
    /// and the pending challenge rides back with the new record.
    pub async fn add_provider(
        &self,
        name: &str,
        kind: ProviderKind,
    ) -> Result<(Provider, Option<OauthChallenge>)> {
        let provider = self.registry.add_provider(name, kind)?;

        let challenge = match provider.kind {
            ProviderKind::Oauth { .. } => {
                let challenge = self
                    .oauth
                    .start_device_flow(&provider.provider_id, &provider.name)
                    .await
                    .map_err(|e| {
                        GatewayError::Transport(format!(
                            "device flow failed for provider '{}': {}",
                            provider.name, e
                        ))
                    })?;
                Some(challenge)
            }
            _ => None,
        };

        Ok((provider, challenge))
    }

    pub fn delete_provider(&self, provider_id: &str) -> Result<()> {
        self.registry.delete_provider(provider_id)
    }

    pub fn set_provider_enabled(&self, provider_id: &str, enabled: bool) -> Result<()> {
        self.registry.set_provider_enabled(provider_id, enabled)
    }

    // ---- models ----

    pub fn get_models(&self, name_filter: Option<&str>) -> Vec<Model> {
        self.registry.get_models(name_filter)
    }

    pub fn set_models(&self, models: Vec<Model>) {
        self.registry.set_models(models);
    }

    // ---- routing ----

    pub fn set_alias_list(&self, aliases: Vec<String>) {
        self.routes.set_alias_list(aliases);
    }

    pub fn get_alias_list(&self) -> Vec<String> {
        self.routes.get_alias_list()
    }

    pub fn set_route_rules(&self, alias: &str, targets: Vec<RouteTarget>) -> Result<()> {
        self.routes.set_route_rules(alias, targets)
    }

    pub fn get_route_rules(&self, alias: &str) -> Result<RouteRule> {
        self.routes.get_route_rules(alias)
    }

    // ---- dispatch ----

    /// One-shot chat turn through an alias with ordered failover.
    pub async fn complete_chat(
        &self,
        alias: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<Completion> {
        self.dispatcher.complete(alias, messages, tools).await
    }

    /// Embed a file's content through the configured embedding alias.
    pub async fn embed_content(&self, file_path: &str) -> Result<EmbedResponse> {
        let path = Path::new(file_path);
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Validation(format!("cannot read '{}': {}", path.display(), e))
        })?;

        self.dispatcher
            .embed(&self.config.embedding.alias, vec![contents])
            .await
    }

    // ---- streams ----

    pub fn create_stream(&self, alias: &str, owner: Option<String>) -> Result<String> {
        self.streams.create(alias, owner)
    }

    pub async fn ask_stream(
        &self,
        stream_id: &str,
        message: String,
        tools: Vec<ToolDefinition>,
    ) -> Result<()> {
        self.streams.ask(stream_id, message, tools).await
    }

    pub async fn stream_reply(
        &self,
        stream_id: &str,
        wait_ms: Option<u64>,
    ) -> Result<ReplyChunk> {
        self.streams.reply(stream_id, wait_ms).await
    }

    pub async fn cancel_stream(&self, stream_id: &str) -> Result<()> {
        self.streams.cancel(stream_id).await
    }

    pub async fn reap_idle_streams(&self) {
        self.streams
            .reap_idle(Duration::from_secs(self.config.streams.idle_timeout_secs))
            .await;
    }

    // ---- connections ----

    pub fn register_connection(
        &self,
        connection_id: &str,
        program_name: &str,
        program_path: Option<String>,
    ) {
        self.connections.register(connection_id, program_name, program_path);
    }

    pub fn touch_connection(&self, connection_id: &str) {
        self.connections.touch(connection_id);
    }

    pub fn list_connections(&self) -> Vec<Connection> {
        self.connections.list()
    }

    /// Remove a connection and cancel every stream it owns.
    pub async fn close_connection(&self, connection_id: &str) -> Result<Connection> {
        let cancelled = self.streams.cancel_owned(connection_id).await;
        if cancelled > 0 {
            tracing::info!(
                "Cancelled {} stream(s) owned by connection {}",
                cancelled,
                connection_id
            );
        }
        self.connections.close(connection_id)
    }

    // ---- metrics ----

    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.metrics.snapshot(crate::core::metrics::now_ms())
    }

    pub fn metrics_range(&self, start_ms: u64, end_ms: u64) -> Vec<MetricsSnapshot> {
        self.metrics.range(start_ms, end_ms)
    }
}
