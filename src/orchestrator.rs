//! The check → remove → download → install → configure → verify pipeline.

use std::fmt;
use std::path::PathBuf;

use crate::error::InstallError;
use crate::http::Transport;
use crate::installers::{archive, Tool, ToolInstaller};
use crate::platform::Platform;
use crate::profile;
use crate::system::System;
use crate::ui;
use crate::version;

/// What one invocation installs. `resolved_version` is fixed before the
/// orchestrator runs; `None` accepts whatever version is already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub tool: Tool,
    pub requested_version: Option<String>,
    pub resolved_version: Option<String>,
    pub install_dir: Option<PathBuf>,
    pub platform: Platform,
}

impl InstallTarget {
    pub fn new(tool: Tool, platform: Platform) -> Self {
        Self {
            tool,
            requested_version: None,
            resolved_version: None,
            install_dir: None,
            platform,
        }
    }

    pub fn with_version(mut self, requested: Option<String>, resolved: Option<String>) -> Self {
        self.requested_version = requested;
        self.resolved_version = resolved;
        self
    }

    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    fn is_satisfied_by(&self, installed: &str) -> bool {
        self.resolved_version
            .as_deref()
            .map_or(true, |wanted| version::satisfies(wanted, installed))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub found: bool,
    pub reported_version: String,
    pub smoke_test_passed: bool,
    pub warnings: Vec<String>,
}

impl VerificationResult {
    pub fn missing(reason: impl Into<String>) -> Self {
        Self {
            warnings: vec![reason.into()],
            ..Self::default()
        }
    }

    pub fn found(version: impl Into<String>) -> Self {
        Self {
            found: true,
            reported_version: version.into(),
            ..Self::default()
        }
    }

    pub fn smoke(mut self, passed: bool, failure: impl FnOnce() -> String) -> Self {
        self.smoke_test_passed = passed;
        if !passed {
            self.warnings.push(failure());
        }
        self
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    CheckExisting,
    Skip,
    RemoveOld,
    Download,
    Install,
    Configure,
    Verify,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::CheckExisting => "check-existing",
            Stage::Skip => "skip",
            Stage::RemoveOld => "remove-old",
            Stage::Download => "download",
            Stage::Install => "install",
            Stage::Configure => "configure",
            Stage::Verify => "verify",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    AlreadyInstalled { version: String },
}

/// The downloaded artifact as recorded in the receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub url: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub outcome: Outcome,
    /// `None` on the skip path, where nothing was re-verified.
    pub verification: Option<VerificationResult>,
    pub stages: Vec<Stage>,
    pub artifact: Option<FetchedArtifact>,
    pub profiles_updated: usize,
    pub warnings: Vec<String>,
}

impl InstallReport {
    pub fn all_warnings(&self) -> impl Iterator<Item = &String> {
        self.warnings.iter().chain(
            self.verification
                .iter()
                .flat_map(|verification| verification.warnings.iter()),
        )
    }
}

pub struct Orchestrator<'a> {
    system: &'a dyn System,
    transport: &'a dyn Transport,
    profile_paths: Vec<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        system: &'a dyn System,
        transport: &'a dyn Transport,
        profile_paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            system,
            transport,
            profile_paths,
        }
    }

    pub fn install(
        &self,
        installer: &dyn ToolInstaller,
        target: &InstallTarget,
        force: bool,
    ) -> Result<InstallReport, InstallError> {
        let mut stages = vec![Stage::Start];
        match self.run(installer, target, force, &mut stages) {
            Ok(mut report) => {
                report.stages = stages;
                Ok(report)
            }
            Err(err) => {
                let failed_at = stages.last().copied().unwrap_or(Stage::Start);
                tracing::warn!(
                    tool = %target.tool,
                    from = %failed_at,
                    stage = %Stage::Failed,
                    error = %err,
                    "install failed"
                );
                Err(err)
            }
        }
    }

    fn run(
        &self,
        installer: &dyn ToolInstaller,
        target: &InstallTarget,
        force: bool,
        stages: &mut Vec<Stage>,
    ) -> Result<InstallReport, InstallError> {
        let tool = target.tool;
        let mut enter = |stage: Stage| {
            tracing::debug!(%tool, %stage, "entering stage");
            stages.push(stage);
        };

        enter(Stage::CheckExisting);
        let installed = installer.installed_version(self.system, target);
        tracing::debug!(%tool, ?installed, wanted = ?target.resolved_version, force, "existing installation");

        if let Some(version) = installed.as_deref() {
            if !force && target.is_satisfied_by(version) {
                enter(Stage::Skip);
                enter(Stage::Done);
                return Ok(InstallReport {
                    outcome: Outcome::AlreadyInstalled {
                        version: version.to_string(),
                    },
                    verification: None,
                    stages: Vec::new(),
                    artifact: None,
                    profiles_updated: 0,
                    warnings: Vec::new(),
                });
            }
        }

        if let Some(dir) = installer.replaceable_dir(target)?.filter(|dir| dir.exists()) {
            enter(Stage::RemoveOld);
            ui::status("Removing", format!("previous installation at {}", dir.display()));
            archive::remove_tree(self.system, &dir)
                .map_err(|err| InstallError::install(tool.as_str(), format!("{err:#}")))?;
        }

        // Dropped on every return path below, which removes the downloaded artifact.
        let scratch = tempfile::Builder::new()
            .prefix("oneclick-")
            .tempdir()
            .map_err(|err| {
                InstallError::install(tool.as_str(), format!("cannot create temp dir: {err}"))
            })?;

        let mut fetched = None;
        let mut artifact_path = None;
        if let Some(artifact) = installer.artifact(self.system, target) {
            enter(Stage::Download);
            let progress = ui::Progress::new("Downloading", artifact.url.clone());
            let dest = scratch.path().join(&artifact.file_name);
            match self.transport.download(&artifact.url, &dest) {
                Ok(download) => {
                    progress.success("Downloaded", Some(format!("({} bytes)", download.bytes)));
                    fetched = Some(FetchedArtifact {
                        url: artifact.url.clone(),
                        sha256: download.digest(),
                        bytes: download.bytes,
                    });
                    artifact_path = Some(download.path);
                }
                Err(err) => {
                    progress.fail("Failed", format!("{err:#}"));
                    return Err(InstallError::download(&artifact.url, format!("{err:#}")));
                }
            }
        }

        enter(Stage::Install);
        ui::status("Installing", format!("{tool} {}", version_label(target)));
        installer.install(self.system, target, artifact_path.as_deref(), scratch.path())?;

        enter(Stage::Configure);
        let mut warnings = installer.configure(self.system, target);
        let mut profiles_updated = 0;
        if let Some(block) = installer.profile_block(target) {
            let update = profile::apply(&self.profile_paths, &block);
            warnings.extend(update.refused.iter().map(|err| format!("{err:#}")));
            profiles_updated = update.updated;
            if update.updated == 0 {
                warnings.push(format!(
                    "No shell profile updated; add this to your profile manually:\n{}",
                    block.render()
                ));
            }
        }

        enter(Stage::Verify);
        let verification = installer.verify(self.system, target);
        if !verification.found {
            let reason = verification
                .warnings
                .first()
                .cloned()
                .unwrap_or_else(|| "binary not found after installation".to_string());
            return Err(InstallError::install(tool.as_str(), reason));
        }

        enter(Stage::Done);
        Ok(InstallReport {
            outcome: Outcome::Installed,
            verification: Some(verification),
            stages: Vec::new(),
            artifact: fetched,
            profiles_updated,
            warnings,
        })
    }
}

fn version_label(target: &InstallTarget) -> String {
    target
        .resolved_version
        .clone()
        .unwrap_or_else(|| "(latest)".to_string())
}
