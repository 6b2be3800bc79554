//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::execution::ExecutionConfig;
use crate::routing::RouterConfig;
use crate::tracker::{TrackerConfig, TrackerMode};

/// Switchboard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RouterConfig,
    pub tracker: TrackerConfig,
    pub execution: ExecutionConfig,
    pub catalog: CatalogConfig,
}

/// Where provider definitions come from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// TOML catalog file; the built-in providers are used when unset
    pub path: Option<PathBuf>,
}

const KEYS: &[&str] = &[
    "routing.max_fallbacks",
    "routing.task_weight",
    "routing.preference_weight",
    "routing.reference_cost_usd",
    "routing.reference_tokens_per_second",
    "tracker.ema_alpha",
    "tracker.refresh_interval_secs",
    "tracker.quality_floor",
    "tracker.mode",
    "tracker.health_check_timeout_ms",
    "execution.max_attempts",
    "execution.timeout_safety_factor",
    "execution.min_attempt_timeout_ms",
    "catalog.path",
];

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid value for {}: {} ({})", key, value, e))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SWITCHBOARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("switchboard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, or defaults if it does not exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> anyhow::Result<()> {
        self.routing
            .validate()
            .map_err(|e| anyhow!("routing: {}", e))?;
        self.tracker
            .validate()
            .map_err(|e| anyhow!("tracker: {}", e))?;
        self.execution
            .validate()
            .map_err(|e| anyhow!("execution: {}", e))?;
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "routing.max_fallbacks" => self.routing.max_fallbacks.to_string(),
            "routing.task_weight" => self.routing.task_weight.to_string(),
            "routing.preference_weight" => self.routing.preference_weight.to_string(),
            "routing.reference_cost_usd" => self.routing.reference_cost_usd.to_string(),
            "routing.reference_tokens_per_second" => {
                self.routing.reference_tokens_per_second.to_string()
            }

            "tracker.ema_alpha" => self.tracker.ema_alpha.to_string(),
            "tracker.refresh_interval_secs" => self.tracker.refresh_interval_secs.to_string(),
            "tracker.quality_floor" => self.tracker.quality_floor.to_string(),
            "tracker.mode" => self.tracker.mode.to_string(),
            "tracker.health_check_timeout_ms" => self.tracker.health_check_timeout_ms.to_string(),

            "execution.max_attempts" => self.execution.max_attempts.to_string(),
            "execution.timeout_safety_factor" => self.execution.timeout_safety_factor.to_string(),
            "execution.min_attempt_timeout_ms" => {
                self.execution.min_attempt_timeout_ms.to_string()
            }

            "catalog.path" => match &self.catalog.path {
                Some(path) => path.display().to_string(),
                None => "(built-in providers)".to_string(),
            },

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchboard config list` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key.
    ///
    /// The change only sticks if the resulting configuration validates.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        match key {
            "routing.max_fallbacks" => next.routing.max_fallbacks = parse(key, value)?,
            "routing.task_weight" => next.routing.task_weight = parse(key, value)?,
            "routing.preference_weight" => next.routing.preference_weight = parse(key, value)?,
            "routing.reference_cost_usd" => next.routing.reference_cost_usd = parse(key, value)?,
            "routing.reference_tokens_per_second" => {
                next.routing.reference_tokens_per_second = parse(key, value)?
            }

            "tracker.ema_alpha" => next.tracker.ema_alpha = parse(key, value)?,
            "tracker.refresh_interval_secs" => {
                next.tracker.refresh_interval_secs = parse(key, value)?
            }
            "tracker.quality_floor" => next.tracker.quality_floor = parse(key, value)?,
            "tracker.mode" => next.tracker.mode = parse::<TrackerMode>(key, value)?,
            "tracker.health_check_timeout_ms" => {
                next.tracker.health_check_timeout_ms = parse(key, value)?
            }

            "execution.max_attempts" => next.execution.max_attempts = parse(key, value)?,
            "execution.timeout_safety_factor" => {
                next.execution.timeout_safety_factor = parse(key, value)?
            }
            "execution.min_attempt_timeout_ms" => {
                next.execution.min_attempt_timeout_ms = parse(key, value)?
            }

            "catalog.path" => {
                let value = value.trim();
                next.catalog.path = (!value.is_empty()).then(|| PathBuf::from(value));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `switchboard config list` to see available keys.",
                    key
                ));
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults by removing the config file
    pub fn reset() -> anyhow::Result<()> {
        Self::reset_at(&Self::config_path()?)
    }

    /// Remove a config file if present
    pub fn reset_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
