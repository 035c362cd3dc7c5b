//! Application configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use moltguard_core::GuardConfig;
use moltguard_gateway::GatewayConfig;

/// Top-level configuration, loaded from a JSON file with every field
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Master switch; when false nothing is analyzed and no gateway runs.
    pub enabled: bool,
    /// Mark detected tool results as blocked in the analysis log.
    pub block_on_risk: bool,
    /// Supervise the intercepting gateway.
    pub gateway_enabled: bool,
    /// Detection pipeline settings.
    pub guard: GuardConfig,
    /// Gateway settings.
    pub gateway: GatewayConfig,
    /// Analysis log path; defaults to the app data directory.
    pub db_path: Option<PathBuf>,
    /// Credentials file path; defaults to the app data directory.
    pub credentials_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_on_risk: false,
            gateway_enabled: true,
            guard: GuardConfig::default(),
            gateway: GatewayConfig::default(),
            db_path: None,
            credentials_path: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing config file {:?}", path))?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_config_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "moltguard", "moltguard")
            .context("could not determine config directory")?;
        Ok(dirs.config_dir().join("config.json"))
    }
}
