//! Parley Common - Shared types, utilities, and configuration for the Parley session engine.
//!
//! This crate provides:
//! - Configuration types and loading (file, modular overlay, environment)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and structured logging helpers
//! - Text utilities shared by the engine and the channel adapters

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, EngineConfig, ObservabilityConfig, PlanConfig, PlansConfig, StorageConfig,
    TelegramConfig, TelegraphConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, EngineConfig, PlansConfig};
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
