use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::region::RegionPreference;
use crate::util::xdg;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "ONECLICK_CONFIG";

/// User configuration loaded from `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub region: RegionPreference,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub go: GoSettings,
    #[serde(default)]
    pub node: NodeSettings,
}

/// Network timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub probe_secs: u64,
    pub fetch_secs: u64,
    pub connect_secs: u64,
    pub transfer_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: 3,
            fetch_secs: 10,
            connect_secs: 30,
            transfer_secs: 600,
        }
    }
}

impl Timeouts {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GoSettings {
    #[serde(default)]
    pub install_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeSettings {
    #[serde(default)]
    pub nvm_dir: Option<String>,
}

impl Config {
    /// Location of the config file: `$ONECLICK_CONFIG` or `$XDG_CONFIG_HOME/oneclick/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        match env::var(CONFIG_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(PathBuf::from(value)),
            _ => Ok(xdg::config_dir()?.join(CONFIG_FILE)),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
    }
}
