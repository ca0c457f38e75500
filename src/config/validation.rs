use std::{collections::HashSet, path::Path};

use crate::{config::models::ServerConfig, core::prefix::ListenerPrefix};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listener prefix '{prefix}': {reason}")]
    InvalidListenerPrefix { prefix: String, reason: String },

    #[error("Public folder conflict detected: {message}")]
    FolderConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listener_prefix(&config.listener_prefix) {
            errors.push(e);
        }

        for (index, folder) in config.public_folders.iter().enumerate() {
            let field = format!("public_folders[{index}]");
            if folder.path.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.path"),
                    message: "Folder path must not be empty".to_string(),
                });
            } else if !Path::new(&folder.path).is_dir() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.path"),
                    message: format!("Directory '{}' does not exist", folder.path),
                });
            }
            if !folder.prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("{field}.prefix"),
                    message: "Prefixes must start with '/'".to_string(),
                });
            }
            for document in &folder.default_documents {
                if document.is_empty() || document.contains('/') || document.contains('\\') {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{field}.default_documents"),
                        message: format!("'{document}' must be a plain file name"),
                    });
                }
            }
        }

        if let Err(e) = Self::check_folder_conflicts(config) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_log_level(&config.logging.level) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listener_prefix(prefix: &str) -> ValidationResult<()> {
        let parsed = ListenerPrefix::parse(prefix).map_err(|e| {
            ValidationError::InvalidListenerPrefix {
                prefix: prefix.to_string(),
                reason: e.to_string(),
            }
        })?;
        if parsed.is_secure() {
            return Err(ValidationError::InvalidListenerPrefix {
                prefix: prefix.to_string(),
                reason: "https prefixes are not supported by the built-in listener".to_string(),
            });
        }
        Ok(())
    }

    /// The same folder mounted twice under the same prefix is almost always a typo
    fn check_folder_conflicts(config: &ServerConfig) -> ValidationResult<()> {
        let mut seen = HashSet::new();
        for folder in &config.public_folders {
            let key = (folder.prefix.trim_end_matches('/'), folder.path.trim_end_matches('/'));
            if !seen.insert(key) {
                return Err(ValidationError::FolderConflict {
                    message: format!(
                        "'{}' is mounted more than once under '{}'",
                        folder.path, folder.prefix
                    ),
                });
            }
        }
        Ok(())
    }

    fn validate_log_level(level: &str) -> ValidationResult<()> {
        tracing_subscriber::EnvFilter::try_new(level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            })
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
