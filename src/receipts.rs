use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::installers::Tool;
use crate::orchestrator::FetchedArtifact;
use crate::region::Region;
use crate::util::xdg;

/// What the last successful install of each tool produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipts {
    /// Format version
    version: u32,
    #[serde(default, rename = "receipt")]
    pub receipts: Vec<InstallReceipt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub tool: String,
    /// Version as given on the command line, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    /// Version reported by the installed tool
    pub resolved: String,
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub installed_at: String,
}

impl InstallReceipt {
    pub fn new(tool: Tool, resolved: impl Into<String>, region: Region) -> Self {
        Self {
            tool: tool.as_str().to_string(),
            requested: None,
            resolved: resolved.into(),
            region,
            install_dir: None,
            artifact_url: None,
            sha256: None,
            installed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn requested(mut self, requested: Option<String>) -> Self {
        self.requested = requested;
        self
    }

    pub fn install_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.install_dir = dir;
        self
    }

    pub fn artifact(mut self, artifact: Option<&FetchedArtifact>) -> Self {
        if let Some(artifact) = artifact {
            self.artifact_url = Some(artifact.url.clone());
            self.sha256 = Some(artifact.sha256.clone());
        }
        self
    }
}

impl Default for Receipts {
    fn default() -> Self {
        Self::new()
    }
}

impl Receipts {
    pub fn new() -> Self {
        Self {
            version: 1,
            receipts: Vec::new(),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(xdg::state_dir()?.join("receipts.toml"))
    }

    /// Load receipts, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read receipts from {:?}", path))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse receipts from {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize receipts")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write receipts to {:?}", path))?;

        Ok(())
    }

    /// Replace any earlier receipt for the same tool.
    pub fn record(&mut self, receipt: InstallReceipt) {
        self.receipts.retain(|existing| existing.tool != receipt.tool);
        self.receipts.push(receipt);
        self.receipts.sort_by(|a, b| a.tool.cmp(&b.tool));
    }

    pub fn get(&self, tool: Tool) -> Option<&InstallReceipt> {
        self.receipts.iter().find(|receipt| receipt.tool == tool.as_str())
    }
}
