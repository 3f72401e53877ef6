use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Route alias embeddings are dispatched through.
    #[serde(default = "default_embedding_alias")]
    pub alias: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            alias: default_embedding_alias(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_reply_wait_ms")]
    pub default_reply_wait_ms: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            default_reply_wait_ms: default_reply_wait_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_socket_path() -> String {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("modelgate.sock")
        .display()
        .to_string()
}

fn default_embedding_alias() -> String {
    "embeddings".to_string()
}

fn default_reply_wait_ms() -> u64 {
    crate::core::stream::DEFAULT_REPLY_WAIT_MS
}

fn default_idle_timeout_secs() -> u64 {
    900
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
