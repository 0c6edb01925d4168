//! Configuration system.
//!
//! Provides hierarchical configuration loading from:
//! - rulekit.toml (default configuration)
//! - rulekit.local.toml (git-ignored local overrides)
//! - Environment variables (RULEKIT_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # rulekit.toml
//! [engine]
//! short_circuit = true
//! root_fallback = false
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULEKIT_ENGINE__SHORT_CIRCUIT=false
//! RULEKIT_LOGGING__LEVEL=trace
//! ```

use crate::predicate::EvalOptions;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default evaluation flags for bare handle calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stop `and` at the first false operand, `or` at the first true one
    #[serde(default = "default_true")]
    pub short_circuit: bool,

    /// Fallback seeded at the root of fallback propagation
    #[serde(default)]
    pub root_fallback: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            short_circuit: true,
            root_fallback: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. rulekit.toml (base configuration)
    /// 2. rulekit.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RULEKIT_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("rulekit.toml"))
            .merge(Toml::file("rulekit.local.toml"))
            .merge(Env::prefixed("RULEKIT_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RULEKIT_").split("__"))
            .extract()
    }
}

impl From<&EngineConfig> for EvalOptions {
    fn from(config: &EngineConfig) -> Self {
        EvalOptions::new()
            .with_short_circuit(config.short_circuit)
            .with_root_fallback(config.root_fallback)
    }
}

/// Install a global tracing subscriber from the logging config. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format == "json" {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
