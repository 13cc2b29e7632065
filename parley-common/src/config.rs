//! Configuration management for Parley.
//!
//! The engine reads a single configuration file at `~/.parley/config.json`,
//! optionally overlaid with `secrets.json` and `plans.json` from the same
//! directory (see [`crate::config_loader`]).
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Modular overlay files
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format
//! - `BOT_TOKEN` → telegram.bot_token
//! - `PARLEY_CONTEXT_WINDOW` → engine.context_window
//! - `PARLEY_THROTTLE_MS` → engine.throttle_interval_ms
//! - `PARLEY_STORAGE_BACKEND` → storage.backend
//! - `PARLEY_STORAGE_PATH` → storage.path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Tuning for the conversation session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of full turns retained before compaction (W).
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Minimum spacing between visible-content updates, in milliseconds.
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,

    /// Final texts longer than this (in characters) go to the long-form publisher.
    #[serde(default = "default_length_ceiling")]
    pub length_ceiling: usize,

    /// Characters of the response shown inline when the full text is published elsewhere.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Chunk size used when long-form publishing is unavailable and the text is split.
    #[serde(default = "default_split_chunk_chars")]
    pub split_chunk_chars: usize,

    /// Deadline for a model call to start streaming, in seconds.
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Maximum silence between two fragments of one stream, in seconds.
    #[serde(default = "default_fragment_timeout_secs")]
    pub fragment_timeout_secs: u64,

    /// Deadline for one transport call, in seconds.
    #[serde(default = "default_transport_timeout_secs")]
    pub transport_timeout_secs: u64,

    /// Deadline for one summarization call, in seconds.
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,

    /// Deadline for one persistence operation, in seconds.
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
}

fn default_context_window() -> usize {
    20
}

fn default_throttle_interval_ms() -> u64 {
    1000
}

fn default_length_ceiling() -> usize {
    3800
}

fn default_preview_chars() -> usize {
    800
}

fn default_split_chunk_chars() -> usize {
    3000
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_fragment_timeout_secs() -> u64 {
    90
}

fn default_transport_timeout_secs() -> u64 {
    15
}

fn default_summarize_timeout_secs() -> u64 {
    60
}

fn default_storage_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            throttle_interval_ms: default_throttle_interval_ms(),
            length_ceiling: default_length_ceiling(),
            preview_chars: default_preview_chars(),
            split_chunk_chars: default_split_chunk_chars(),
            model_timeout_secs: default_model_timeout_secs(),
            fragment_timeout_secs: default_fragment_timeout_secs(),
            transport_timeout_secs: default_transport_timeout_secs(),
            summarize_timeout_secs: default_summarize_timeout_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_secs(self.fragment_timeout_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}

// ============================================================================
// Plan Configuration
// ============================================================================

/// Limits and capabilities of one plan tier. A limit of `0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Daily token allowance (0 = unlimited)
    #[serde(default)]
    pub tokens_limit: u64,

    /// Daily generated-asset allowance (0 = unlimited)
    #[serde(default)]
    pub assets_limit: u64,

    /// Enabled capabilities: "chat", "image_generation", "video_download"
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_capabilities() -> Vec<String> {
    vec!["chat".into(), "image_generation".into()]
}

/// Static plan table supplied to the quota enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlansConfig {
    #[serde(default = "default_free_plan")]
    pub free: PlanConfig,

    #[serde(default = "default_basic_plan")]
    pub basic: PlanConfig,

    #[serde(default = "default_pro_plan")]
    pub pro: PlanConfig,
}

fn default_free_plan() -> PlanConfig {
    PlanConfig {
        tokens_limit: 10_000,
        assets_limit: 3,
        capabilities: default_capabilities(),
    }
}

fn default_basic_plan() -> PlanConfig {
    PlanConfig {
        tokens_limit: 100_000,
        assets_limit: 20,
        capabilities: vec![
            "chat".into(),
            "image_generation".into(),
            "video_download".into(),
        ],
    }
}

fn default_pro_plan() -> PlanConfig {
    PlanConfig {
        tokens_limit: 0,
        assets_limit: 0,
        capabilities: vec![
            "chat".into(),
            "image_generation".into(),
            "video_download".into(),
        ],
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            free: default_free_plan(),
            basic: default_basic_plan(),
            pro: default_pro_plan(),
        }
    }
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by @BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Bot API base URL (a local Bot API server can be used instead)
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api_base(),
        }
    }
}

/// Telegraph long-form publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegraphConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_telegraph_short_name")]
    pub short_name: String,

    #[serde(default = "default_telegraph_author")]
    pub author_name: String,

    #[serde(default = "default_telegraph_api_base")]
    pub api_base: String,
}

fn default_true() -> bool {
    true
}

fn default_telegraph_short_name() -> String {
    "ParleyBot".into()
}

fn default_telegraph_author() -> String {
    "Parley".into()
}

fn default_telegraph_api_base() -> String {
    "https://api.telegra.ph".into()
}

impl Default for TelegraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            short_name: default_telegraph_short_name(),
            author_name: default_telegraph_author(),
            api_base: default_telegraph_api_base(),
        }
    }
}

// ============================================================================
// Storage & Observability
// ============================================================================

/// Persistence backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend type (memory, sqlite)
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database path for `sqlite`; `~` is expanded
    #[serde(default)]
    pub path: Option<String>,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    /// Resolved database path, defaulting to `~/.parley/parley.db`.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.as_deref() {
            Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => config_dir().join("parley.db"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format ("pretty" or "json")
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for Parley.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub plans: PlansConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub telegraph: TelegraphConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default directory, with overlays and env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load configuration from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let merged = crate::config_loader::load_modular_config(Some(dir.to_path_buf()))?;
        let mut config: Self = serde_json::from_value(merged)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a single config file without overlays.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(window) = std::env::var("PARLEY_CONTEXT_WINDOW") {
            if let Ok(w) = window.parse() {
                self.engine.context_window = w;
            }
        }
        if let Ok(throttle) = std::env::var("PARLEY_THROTTLE_MS") {
            if let Ok(ms) = throttle.parse() {
                self.engine.throttle_interval_ms = ms;
            }
        }
        if let Ok(backend) = std::env::var("PARLEY_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Ok(path) = std::env::var("PARLEY_STORAGE_PATH") {
            self.storage.path = Some(path);
        }
    }

    /// Save configuration to a file as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.context_window, 20);
        assert_eq!(config.engine.throttle_interval(), Duration::from_secs(1));
        assert_eq!(config.engine.length_ceiling, 3800);
        assert_eq!(config.plans.free.tokens_limit, 10_000);
        assert_eq!(config.plans.free.assets_limit, 3);
        assert_eq!(config.plans.pro.tokens_limit, 0);
        assert_eq!(config.storage.backend, "sqlite");
    }

    #[test]
    fn test_partial_config_deserialization() {
        let json = r#"{"engine": {"context_window": 8}, "plans": {"free": {"tokens_limit": 500}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.context_window, 8);
        assert_eq!(config.engine.throttle_interval_ms, 1000);
        assert_eq!(config.plans.free.tokens_limit, 500);
        assert_eq!(config.plans.free.assets_limit, 0);
        assert_eq!(config.plans.basic.tokens_limit, 100_000);
    }

    #[test]
    fn test_free_plan_has_no_video_download() {
        let plans = PlansConfig::default();
        assert!(!plans.free.capabilities.iter().any(|c| c == "video_download"));
        assert!(plans.basic.capabilities.iter().any(|c| c == "video_download"));
    }

    #[test]
    fn test_storage_path_expansion() {
        let storage = StorageConfig {
            backend: "sqlite".into(),
            path: Some("/tmp/parley-test.db".into()),
        };
        assert_eq!(storage.resolved_path(), PathBuf::from("/tmp/parley-test.db"));

        let default = StorageConfig::default();
        assert!(default.resolved_path().ends_with("parley.db"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.engine.preview_chars = 640;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.preview_chars, 640);
    }
}
