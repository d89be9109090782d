//! Configuration loading and validation for helmsman.
//!
//! Loads configuration from `~/.helmsman/config.toml` with environment
//! variable overrides. Every field has a default, so a missing file (or a
//! partial one) still yields a usable kernel configuration.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.helmsman/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults applied to every session
    #[serde(default)]
    pub session: SessionDefaults,

    /// Credential rotation settings
    #[serde(default)]
    pub keys: KeyConfig,

    /// Registered model providers, in failover order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// TOML file holding `[[policies]]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Model context window, in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Per-action execution timeout
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// Fraction of `max_tokens` at which the working context is compacted
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Treat an empty final-text reply as completion
    #[serde(default = "default_true")]
    pub complete_on_empty_reply: bool,

    /// Memory entries recalled into the initial context
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_max_iterations() -> u32 {
    50
}
fn default_max_tokens() -> usize {
    128_000
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_temperature() -> f32 {
    0.7
}
fn default_action_timeout_secs() -> u64 {
    30
}
fn default_compaction_threshold() -> f64 {
    0.8
}
fn default_recall_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: None,
            action_timeout_secs: default_action_timeout_secs(),
            compaction_threshold: default_compaction_threshold(),
            complete_on_empty_reply: true,
            recall_limit: default_recall_limit(),
        }
    }
}

/// What the key manager hands out when every credential is cooling down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedKeyPolicy {
    /// Return the credential whose cooldown ends first
    #[default]
    SoonestExpiry,
    /// Refuse until a credential recovers
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Consecutive errors that put a credential in cooldown
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    #[serde(default)]
    pub when_exhausted: ExhaustedKeyPolicy,
}

fn default_cooldown_secs() -> u64 {
    60
}
fn default_error_threshold() -> u32 {
    3
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            error_threshold: default_error_threshold(),
            when_exhausted: ExhaustedKeyPolicy::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Models explicitly routed to this provider (added to what it advertises)
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Per-model price overrides
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("models", &self.models)
            .field("api_keys", &format_args!("[{} REDACTED]", self.api_keys.len()))
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard cap on total spend in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// How long an approval request may wait. 0 = forever.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_approval_timeout_secs() -> u64 {
    3600
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_short_term_max")]
    pub short_term_max_entries: usize,

    /// Short-term entries per subject that trigger compaction
    #[serde(default = "default_memory_compaction_threshold")]
    pub compaction_threshold: usize,
}

fn default_short_term_max() -> usize {
    100
}
fn default_memory_compaction_threshold() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_max_entries: default_short_term_max(),
            compaction_threshold: default_memory_compaction_threshold(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from the default path (~/.helmsman/config.toml).
    ///
    /// Environment variables override the file:
    /// - `HELMSMAN_LOG_LEVEL`
    /// - `HELMSMAN_BUDGET_USD`
    /// - `HELMSMAN_MAX_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(level) = lookup("HELMSMAN_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(raw) = lookup("HELMSMAN_BUDGET_USD") {
            let max_usd = raw.parse::<f64>().map_err(|_| {
                ConfigError::ValidationError(format!("HELMSMAN_BUDGET_USD is not a number: {raw}"))
            })?;
            self.budget.max_usd = Some(max_usd);
        }

        if let Some(raw) = lookup("HELMSMAN_MAX_ITERATIONS") {
            self.session.max_iterations = raw.parse::<u32>().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "HELMSMAN_MAX_ITERATIONS is not a positive integer: {raw}"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".helmsman")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_iterations must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.session.temperature) {
            return Err(ConfigError::ValidationError(
                "session.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(self.session.compaction_threshold > 0.0 && self.session.compaction_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "session.compaction_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if self.keys.error_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "keys.error_threshold must be at least 1".into(),
            ));
        }

        if let Some(max_usd) = self.budget.max_usd {
            if max_usd < 0.0 {
                return Err(ConfigError::ValidationError(
                    "budget.max_usd cannot be negative".into(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "provider name cannot be empty".into(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' is registered twice",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to initialise logging: {0}")]
    LoggingError(String),
}
