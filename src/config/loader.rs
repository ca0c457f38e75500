use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Prefix of environment variables overriding file values, e.g.
/// `TRELLIS_LISTENER_PREFIX` or `TRELLIS_LOGGING__LEVEL`
pub const ENV_PREFIX: &str = "TRELLIS";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, INI
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format_for(config_path),
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

/// Load configuration and reject it unless it passes validation
pub async fn load_validated_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config(config_path).await?;
    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Configuration in {config_path} is invalid"))?;
    Ok(config)
}

/// Pick a file format from the extension, YAML when unknown
pub fn format_for(config_path: &Path) -> FileFormat {
    match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    }
}
