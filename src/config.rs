//! Forge configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/forge.toml` by default)
//! 2. environment variables prefixed with `RUST_FORGE_`, nested keys separated by `__`
//!
//! Named targets are plain TOML tables under `[targets.<name>]`. They are not interpreted
//! here; [`ForgeConfig::target_metas`] turns them into [`Meta`] trees for the workspace.
//!
//! # Example
//! ```no_run
//! use rust_forge::config::ForgeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ForgeConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use forge_core::{ForgeError, ForgeResult, Meta};
use serde::{Deserialize, Serialize};

/// Top-level forge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Shared executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Task output cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Named task configurations
    #[serde(default)]
    pub targets: BTreeMap<String, toml::Value>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker thread count; unset means one per core
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Name prefix of worker threads
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name(),
        }
    }
}

impl ExecutorConfig {
    /// Build the multi-threaded runtime goals are dispatched on.
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name(self.thread_name.clone());
        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        builder.build()
    }
}

/// Task output cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global cache switch. Single runs can still opt out with `cache.enabled = false`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

fn default_name() -> String {
    "rust_forge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_thread_name() -> String {
    "forge-worker".to_string()
}

fn default_enabled() -> bool {
    true
}

impl ForgeConfig {
    /// Load configuration from `config/forge.toml` and environment variables
    ///
    /// Example override: `RUST_FORGE_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/forge.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(path.as_ref())).extract()
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, figment::Error> {
        Self::figment(Toml::string(text)).extract()
    }

    fn figment(toml: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(ForgeConfig::default()))
            .merge(toml)
            .merge(Env::prefixed("RUST_FORGE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ForgeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ForgeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.executor.worker_threads == Some(0) {
            return Err(ForgeError::Configuration(
                "Invalid worker_threads 0. Must be at least 1".to_string(),
            ));
        }

        for (name, target) in &self.targets {
            if !target.is_table() {
                return Err(ForgeError::Configuration(format!(
                    "Target '{}' must be a table",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Targets converted to metas, keyed by target name
    pub fn target_metas(&self) -> BTreeMap<String, Meta> {
        self.targets
            .iter()
            .map(|(name, value)| (name.clone(), Meta::from_toml(name.clone(), value)))
            .collect()
    }
}
