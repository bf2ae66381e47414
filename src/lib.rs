// Public API
pub mod cli;
pub mod commands;

// Core domain types
mod config;
mod error;
mod http;
mod installers;
mod orchestrator;
mod platform;
mod profile;
mod receipts;
mod region;
mod system;
mod ui;
mod util;
mod version;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::Config;
pub use error::InstallError;
pub use installers::{DockerInstaller, GoInstaller, NodeInstaller, Tool, ToolInstaller};
pub use orchestrator::{InstallReport, InstallTarget, Orchestrator, Outcome, VerificationResult};
pub use region::{Region, RegionPreference, RegionResolver};
pub use version::{ResolvedVersion, VersionResolver};
