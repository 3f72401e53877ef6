use crate::core::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

/// Provider authentication kind.
///
/// A tagged variant rather than a class hierarchy: each kind carries only the
/// fields it needs. Cross-cutting behavior (enable/disable, deletion) operates
/// on the common [`Provider`] record. OAuth tokens are owned by the external
/// OAuth collaborator and never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    /// API-key-based provider (OpenAI-compatible endpoints, Anthropic, ...).
    /// An empty key is allowed only for keyless local servers with an
    /// explicit base URL (e.g. Ollama).
    ApiKey {
        #[serde(default)]
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
    /// OAuth device-flow provider; credentials live with the OAuth collaborator.
    Oauth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
    /// Local in-process model runner.
    Local { local_path: PathBuf },
}

/// One upstream provider record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub provider_id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
    pub enabled: bool,
}

/// Capability flags for a model. All default to false when unspecified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub chat: bool,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub embeddings: bool,
    #[serde(default)]
    pub streaming: bool,
}

/// Per-million-token pricing, USD.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelCost {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
}

/// One model record in the catalog.
///
/// `provider_id` is optional: `None` means the model is not owned by any
/// specific provider and may be served by whichever provider a route target
/// names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<ModelCost>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default)]
struct RegistryState {
    providers: Vec<Provider>,
    models: Vec<Model>,
}

/// Provider and model catalog.
///
/// Exclusively owns provider/model records. All mutations are atomic with
/// respect to readers: a `set_models` replace is observed wholesale or not
/// at all.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// List providers, optionally filtered by a case-insensitive substring
    /// match on the display name.
    pub fn list_providers(&self, name_filter: Option<&str>) -> Vec<Provider> {
        let state = self.state.read().expect("registry lock poisoned");
        match name_filter {
            Some(filter) => {
                let needle = filter.to_lowercase();
                state
                    .providers
                    .iter()
                    .filter(|p| p.name.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            }
            None => state.providers.clone(),
        }
    }

    pub fn get_provider(&self, provider_id: &str) -> Result<Provider> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .providers
            .iter()
            .find(|p| p.provider_id == provider_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("provider '{}'", provider_id)))
    }

    /// Add a provider with a freshly generated id.
    ///
    /// Rejects records missing the discriminating fields their kind requires.
    pub fn add_provider(&self, name: &str, kind: ProviderKind) -> Result<Provider> {
        if name.trim().is_empty() {
            return Err(GatewayError::Validation(
                "provider name must not be empty".into(),
            ));
        }
        match &kind {
            ProviderKind::ApiKey { api_key, base_url } => {
                if api_key.is_empty() && base_url.is_none() {
                    return Err(GatewayError::Validation(
                        "api_key provider requires an api_key or an explicit base_url".into(),
                    ));
                }
            }
            ProviderKind::Local { local_path } => {
                if local_path.as_os_str().is_empty() {
                    return Err(GatewayError::Validation(
                        "local provider requires a local_path".into(),
                    ));
                }
            }
            ProviderKind::Oauth { .. } => {}
        }

        let provider = Provider {
            provider_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            enabled: true,
        };

        let mut state = self.state.write().expect("registry lock poisoned");
        state.providers.push(provider.clone());
        tracing::info!(
            "Provider added: id={}, name={}",
            provider.provider_id,
            provider.name
        );
        Ok(provider)
    }

    /// Delete a provider.
    ///
    /// Route targets referencing it are NOT removed; they become perpetually
    /// failing until the caller repairs the route rule.
    pub fn delete_provider(&self, provider_id: &str) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let before = state.providers.len();
        state.providers.retain(|p| p.provider_id != provider_id);
        if state.providers.len() == before {
            return Err(GatewayError::NotFound(format!(
                "provider '{}'",
                provider_id
            )));
        }
        tracing::info!("Provider deleted: id={}", provider_id);
        Ok(())
    }

    /// Flip a provider's enabled flag. A disabled provider fails dispatch
    /// attempts exactly like a deleted one.
    pub fn set_provider_enabled(&self, provider_id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write().expect("registry lock poisoned");
        let provider = state
            .providers
            .iter_mut()
            .find(|p| p.provider_id == provider_id)
            .ok_or_else(|| GatewayError::NotFound(format!("provider '{}'", provider_id)))?;
        provider.enabled = enabled;
        Ok(())
    }

    /// List models, optionally filtered by a case-insensitive substring match
    /// on the model id.
    pub fn get_models(&self, name_filter: Option<&str>) -> Vec<Model> {
        let state = self.state.read().expect("registry lock poisoned");
        match name_filter {
            Some(filter) => {
                let needle = filter.to_lowercase();
                state
                    .models
                    .iter()
                    .filter(|m| m.model_id.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            }
            None => state.models.clone(),
        }
    }

    /// Replace the full model list. There is no partial update path.
    pub fn set_models(&self, models: Vec<Model>) {
        let mut state = self.state.write().expect("registry lock poisoned");
        tracing::info!(
            "Model catalog replaced: {} -> {} models",
            state.models.len(),
            models.len()
        );
        state.models = models;
    }

    /// Look up a model for a dispatch target. A model owned by a specific
    /// provider only matches that provider; an unowned model matches any.
    pub fn find_model(&self, model_id: &str, provider_id: &str) -> Option<Model> {
        let state = self.state.read().expect("registry lock poisoned");
        state
            .models
            .iter()
            .find(|m| {
                m.model_id == model_id
                    && m.provider_id
                        .as_deref()
                        .map(|owner| owner == provider_id)
                        .unwrap_or(true)
            })
            .cloned()
    }
}
