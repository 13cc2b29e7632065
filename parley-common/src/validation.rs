//! Configuration validation for Parley.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    Config, EngineConfig, ObservabilityConfig, PlanConfig, PlansConfig, StorageConfig,
    TelegramConfig, TelegraphConfig,
};

/// Capability names accepted in plan definitions.
pub const KNOWN_CAPABILITIES: &[&str] = &["chat", "image_generation", "video_download"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.engine,
            &self.plans,
            &self.telegram,
            &self.telegraph,
            &self.storage,
            &self.observability,
        ];

        collect(
            sections
                .iter()
                .filter_map(|section| section.validate().err())
                .collect(),
        )
    }

    /// Validate that the Telegram adapter has the credentials it needs to start.
    pub fn validate_telegram_ready(&self) -> ValidationResult<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            });
        }
        Ok(())
    }

    /// Load and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.context_window == 0 {
            return Err(ValidationError::InvalidValue {
                field: "engine.context_window".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.length_ceiling == 0 {
            return Err(ValidationError::InvalidValue {
                field: "engine.length_ceiling".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.preview_chars == 0 || self.preview_chars >= self.length_ceiling {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "engine.preview_chars ({}) must be between 1 and engine.length_ceiling ({})",
                    self.preview_chars, self.length_ceiling
                ),
            });
        }

        if self.split_chunk_chars == 0 || self.split_chunk_chars > self.length_ceiling {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "engine.split_chunk_chars ({}) must be between 1 and engine.length_ceiling ({})",
                    self.split_chunk_chars, self.length_ceiling
                ),
            });
        }

        let deadlines = [
            ("engine.model_timeout_secs", self.model_timeout_secs),
            ("engine.fragment_timeout_secs", self.fragment_timeout_secs),
            ("engine.transport_timeout_secs", self.transport_timeout_secs),
            ("engine.summarize_timeout_secs", self.summarize_timeout_secs),
            ("engine.storage_timeout_secs", self.storage_timeout_secs),
        ];
        for (field, secs) in deadlines {
            if secs == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than 0".into(),
                });
            }
        }

        Ok(())
    }
}

fn validate_plan(name: &str, plan: &PlanConfig) -> ValidationResult<()> {
    if plan.capabilities.is_empty() {
        return Err(ValidationError::MissingField {
            field: format!("plans.{name}.capabilities"),
        });
    }

    for capability in &plan.capabilities {
        if !KNOWN_CAPABILITIES.contains(&capability.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: format!("plans.{name}.capabilities"),
                reason: format!(
                    "unknown capability '{capability}', must be one of: {}",
                    KNOWN_CAPABILITIES.join(", ")
                ),
            });
        }
    }

    Ok(())
}

impl Validate for PlansConfig {
    fn validate(&self) -> ValidationResult<()> {
        collect(
            [("free", &self.free), ("basic", &self.basic), ("pro", &self.pro)]
                .into_iter()
                .filter_map(|(name, plan)| validate_plan(name, plan).err())
                .collect(),
        )
    }
}

fn validate_url(field: &str, value: &str) -> ValidationResult<()> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("'{value}' is not an http(s) URL"),
        });
    }
    Ok(())
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        validate_url("telegram.api_base", &self.api_base)
    }
}

impl Validate for TelegraphConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.short_name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "telegraph.short_name".into(),
            });
        }
        validate_url("telegraph.api_base", &self.api_base)
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_backends = ["memory", "sqlite"];
        if !valid_backends.contains(&self.backend.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "storage.backend".into(),
                reason: format!("must be one of: {}", valid_backends.join(", ")),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
