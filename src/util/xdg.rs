use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "oneclick";

/// Get the XDG config directory for oneclick
///
/// Returns `$XDG_CONFIG_HOME/oneclick` or `~/.config/oneclick` if not set
pub fn config_dir() -> Result<PathBuf> {
    let base = match env::var("XDG_CONFIG_HOME") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => home_dir()?.join(".config"),
    };

    Ok(base.join(APP_DIR))
}

/// Get the XDG state directory for oneclick
///
/// Returns `$XDG_STATE_HOME/oneclick` or `~/.local/state/oneclick` if not set
pub fn state_dir() -> Result<PathBuf> {
    let base = match env::var("XDG_STATE_HOME") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => home_dir()?.join(".local/state"),
    };

    Ok(base.join(APP_DIR))
}

/// Get the home directory
pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .context("Failed to get home directory")
        .map(|bd| bd.home_dir().to_path_buf())
}
