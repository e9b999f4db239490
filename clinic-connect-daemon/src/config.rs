//! Daemon Configuration
//!
//! Configuration management for the Clinic Connect daemon.

use anyhow::{bail, Context, Result};
use clinic_connect_sync::PollingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "daemon.toml";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signed-in user
    pub user: UserConfig,

    /// Poll timing
    #[serde(default)]
    pub polling: PollingConfig,

    /// Storage paths
    pub paths: PathConfig,
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Id of the user this daemon syncs for
    pub user_id: String,

    /// Access token presented to the message store
    #[serde(default)]
    pub token: Option<String>,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// Data directory (message store)
    pub data_dir: PathBuf,
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("clinic-connect")
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir();
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("clinic-connect");

        Self {
            user: UserConfig {
                user_id: std::env::var("USER").unwrap_or_else(|_| "clinic-user".to_string()),
                token: None,
            },
            polling: PollingConfig::default(),
            paths: PathConfig {
                config_dir,
                data_dir,
            },
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if not found
    pub fn load() -> Result<Self> {
        let config_path = default_config_dir().join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            tracing::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;

        let config_path = self.config_path();
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.user_id.trim().is_empty() {
            bail!("user.user_id must not be empty");
        }
        self.polling
            .validate()
            .context("Invalid [polling] section")?;
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.paths.config_dir.join(CONFIG_FILE_NAME)
    }
}
