//! Configuration data structures for trellis.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every
//! field has a default so an empty file describes a server on
//! `http://localhost:1234/` serving `./public`.
use serde::{Deserialize, Serialize};

use crate::core::prefix::DEFAULT_LISTENER_PREFIX;

fn default_listener_prefix() -> String {
    DEFAULT_LISTENER_PREFIX.to_string()
}

fn default_drain_timeout_secs() -> u64 {
    10
}

/// Top-level server configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen prefix, e.g. `http://*:8080/`
    #[serde(default = "default_listener_prefix")]
    pub listener_prefix: String,
    /// Surface handler and hook faults to the caller instead of logging them
    pub enable_throwing_exceptions: bool,
    /// Static roots, consulted in order after the router declines
    pub public_folders: Vec<PublicFolderConfig>,
    pub logging: LoggingConfig,
    /// How long the binary waits for in-flight requests after stopping
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener_prefix: default_listener_prefix(),
            enable_throwing_exceptions: false,
            public_folders: Vec::new(),
            logging: LoggingConfig::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// A static root served under a URL prefix
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PublicFolderConfig {
    pub path: String,
    /// URL prefix the folder is mounted under
    pub prefix: String,
    /// Documents tried, in order, for directory requests. Empty means `index.html`.
    pub default_documents: Vec<String>,
}

impl Default for PublicFolderConfig {
    fn default() -> Self {
        Self {
            path: "public".to_string(),
            prefix: "/".to_string(),
            default_documents: Vec::new(),
        }
    }
}

/// Logging output configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listener_prefix, "http://localhost:1234/");
        assert!(!config.enable_throwing_exceptions);
        assert!(config.public_folders.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.drain_timeout_secs, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{ "public_folders": [ { "path": "site" } ], "logging": { "json": true } }"#,
        )
        .unwrap();
        assert_eq!(config.listener_prefix, DEFAULT_LISTENER_PREFIX);
        assert_eq!(config.public_folders[0].path, "site");
        assert_eq!(config.public_folders[0].prefix, "/");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }
}
