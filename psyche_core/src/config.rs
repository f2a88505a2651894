//! Configuration file support for Psyche.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/psyche/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub cooldowns: CooldownConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub automation: AutomationConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Recurrence grid configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Length of one base interval in seconds
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
        }
    }
}

/// Lifetime of each cooldown type in seconds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_treatment_interrupted_secs")]
    pub treatment_interrupted_secs: u64,

    #[serde(default = "default_top_affinities_set_secs")]
    pub top_affinities_set_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            treatment_interrupted_secs: default_treatment_interrupted_secs(),
            top_affinities_set_secs: default_top_affinities_set_secs(),
        }
    }
}

/// Affinity ranking parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_max_affinities")]
    pub max_affinities: usize,

    /// Characteristic holding the patient's income code
    #[serde(default = "default_income_characteristic")]
    pub income_characteristic: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_affinities: default_max_affinities(),
            income_characteristic: default_income_characteristic(),
        }
    }
}

/// Values interpolated into notification templates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
        }
    }
}

/// Identity the scheduler runs as
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_automation_identity")]
    pub identity: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            identity: default_automation_identity(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("psyche")
}

fn default_base_interval_secs() -> u64 {
    604_800
}

fn default_treatment_interrupted_secs() -> u64 {
    30 * 86_400
}

fn default_top_affinities_set_secs() -> u64 {
    86_400
}

fn default_max_affinities() -> usize {
    10
}

fn default_income_characteristic() -> String {
    "income".into()
}

fn default_site_url() -> String {
    "http://localhost:3000".into()
}

fn default_automation_identity() -> String {
    "scheduler".into()
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("psyche").join("config.toml")
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.schedule.base_interval_secs == 0 {
            return Err(Error::Config("base_interval_secs must be positive".into()));
        }
        if self.schedule.base_interval_secs > i64::MAX as u64 {
            return Err(Error::Config("base_interval_secs is too large".into()));
        }
        if self.cooldowns.treatment_interrupted_secs == 0
            || self.cooldowns.top_affinities_set_secs == 0
        {
            return Err(Error::Config("cooldown durations must be positive".into()));
        }
        if self.matching.max_affinities == 0 {
            return Err(Error::Config("max_affinities must be positive".into()));
        }
        if self.matching.income_characteristic.trim().is_empty() {
            return Err(Error::Config("income_characteristic cannot be empty".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
