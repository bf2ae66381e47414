use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::InstallError;
use crate::orchestrator::{InstallTarget, VerificationResult};
use crate::profile::ProfileEditBlock;
use crate::system::{CommandOutput, CommandSpec, System};

pub mod archive;
pub mod docker;
pub mod go;
pub mod node;

pub use docker::DockerInstaller;
pub use go::GoInstaller;
pub use node::NodeInstaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Go,
    Docker,
    Node,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Go => "go",
            Tool::Docker => "docker",
            Tool::Node => "node",
        }
    }

    /// Prefix the tool puts in front of version numbers.
    pub fn version_prefix(self) -> &'static str {
        match self {
            Tool::Go => "go",
            Tool::Docker => "",
            Tool::Node => "v",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file the install step needs, fetched by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    pub file_name: String,
}

impl Artifact {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
        }
    }
}

/// Per-tool steps driven by the [`Orchestrator`](crate::orchestrator::Orchestrator).
pub trait ToolInstaller {
    fn tool(&self) -> Tool;

    /// Version currently installed, if any.
    fn installed_version(&self, system: &dyn System, target: &InstallTarget) -> Option<String>;

    /// Directory the install step writes to and that must be cleared first.
    /// Errors when the directory exists but does not belong to this tool.
    fn replaceable_dir(&self, target: &InstallTarget) -> Result<Option<PathBuf>, InstallError>;

    /// What to download before installing. `None` skips the download step.
    fn artifact(&self, system: &dyn System, target: &InstallTarget) -> Option<Artifact>;

    fn install(
        &self,
        system: &dyn System,
        target: &InstallTarget,
        artifact: Option<&Path>,
        scratch: &Path,
    ) -> Result<(), InstallError>;

    /// Write default runtime configuration. Returns warnings.
    fn configure(&self, system: &dyn System, target: &InstallTarget) -> Vec<String>;

    fn profile_block(&self, target: &InstallTarget) -> Option<ProfileEditBlock>;

    fn verify(&self, system: &dyn System, target: &InstallTarget) -> VerificationResult;
}

/// Join a file name onto a base URL.
pub(crate) fn join_url(base: &str, file: &str) -> String {
    let base = base.trim_end_matches('/');
    Url::parse(&format!("{base}/"))
        .and_then(|url| url.join(file))
        .map(String::from)
        .unwrap_or_else(|_| format!("{base}/{file}"))
}

/// Run a command, treating spawn failures as an unsuccessful run.
pub(crate) fn run_quiet(system: &dyn System, spec: &CommandSpec) -> CommandOutput {
    system.run(spec).unwrap_or_else(|err| {
        tracing::debug!(command = %spec, error = %err, "command unavailable");
        CommandOutput::failed(err.to_string())
    })
}

/// Run a required install command; failure aborts the run.
pub(crate) fn run_step(
    system: &dyn System,
    tool: Tool,
    spec: &CommandSpec,
) -> Result<CommandOutput, InstallError> {
    let output = system
        .run(spec)
        .map_err(|err| InstallError::install(tool.as_str(), format!("{err:#}")))?;
    if !output.success {
        let detail = output.text();
        let reason = if detail.is_empty() {
            format!("`{spec}` exited unsuccessfully")
        } else {
            format!("`{spec}` failed: {detail}")
        };
        return Err(InstallError::install(tool.as_str(), reason));
    }
    Ok(output)
}

/// Mark a command privileged unless already root; fail if escalation is impossible.
pub(crate) fn elevate(system: &dyn System, spec: CommandSpec) -> Result<CommandSpec, InstallError> {
    if system.is_root() {
        return Ok(spec);
    }
    if system.which("sudo").is_none() {
        return Err(InstallError::EnvironmentUnsupported(format!(
            "`{spec}` requires root and sudo is not available"
        )));
    }
    Ok(spec.privileged())
}
