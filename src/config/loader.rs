use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = Config::default_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let contents =
        serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    fs::write(&path, contents)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.embedding.alias.trim().is_empty() {
        anyhow::bail!("Embedding alias must not be empty");
    }

    if config.streams.default_reply_wait_ms == 0 {
        anyhow::bail!("Default reply wait must be at least 1ms");
    }

    let valid_formats = ["pretty", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid log format: {}", config.logging.format);
    }

    Ok(())
}
