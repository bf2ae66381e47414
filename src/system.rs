//! Process execution and PATH lookup.
//!
//! Installers never spawn processes directly; they describe a [`CommandSpec`]
//! and hand it to a [`System`], which lets tests substitute scripted output.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A command to run, optionally through the privileged-execution mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub privileged: bool,
    /// Stream output to the terminal instead of capturing it.
    pub inherit_output: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            privileged: false,
            inherit_output: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.inherit_output = true;
        self
    }

    /// Shorthand for `bash -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "sudo ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout when present, otherwise stderr (some tools print versions there).
    pub fn text(&self) -> &str {
        if self.stdout.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        }
    }
}

/// The host operating system as seen by installers.
pub trait System {
    /// Run a command to completion. `Err` means the program could not be spawned.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Locate an executable on `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Whether the current process already has administrative rights.
    fn is_root(&self) -> bool;
}

/// [`System`] backed by real processes.
#[derive(Debug, Default)]
pub struct HostSystem;

impl System for HostSystem {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = if spec.privileged && !self.is_root() {
            let mut command = Command::new("sudo");
            // sudo drops the caller's environment; pass what the spec needs explicitly.
            command.arg("env");
            for (key, value) in &spec.env {
                command.arg(format!("{key}={value}"));
            }
            command.arg(&spec.program);
            command
        } else {
            let mut command = Command::new(&spec.program);
            command.envs(&spec.env);
            command
        };

        command.args(&spec.args).stdin(Stdio::inherit());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        tracing::debug!(command = %spec, "running command");

        if spec.inherit_output {
            let status = command
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .with_context(|| format!("Failed to start `{spec}`"))?;
            return Ok(CommandOutput {
                success: status.success(),
                ..CommandOutput::default()
            });
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to start `{spec}`"))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        resolve_tool_path(program, &parse_system_path())
    }

    fn is_root(&self) -> bool {
        is_elevated()
    }
}

/// Whether the effective user is root.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid() is a simple syscall that returns the effective user ID
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

/// Check whether a file has executable permission bits set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(_path: &Path) -> bool {
    true
}

/// Resolve a tool's binary path by iterating over PATH entries.
pub fn resolve_tool_path(tool: &str, path_entries: &[PathBuf]) -> Option<PathBuf> {
    path_entries
        .iter()
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file() && is_executable(candidate))
}

pub fn parse_system_path() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn create_fake_binary(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn resolve_tool_path_finds_first_executable() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(first.path().join("docker"), "not executable").unwrap();
        create_fake_binary(&second.path().join("docker"));

        let entries = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            resolve_tool_path("docker", &entries),
            Some(second.path().join("docker"))
        );
        assert_eq!(resolve_tool_path("podman", &entries), None);
    }

    #[test]
    fn command_spec_display_marks_privilege() {
        let spec = CommandSpec::new("sh").arg("get-docker.sh").privileged();
        assert_eq!(spec.to_string(), "sudo sh get-docker.sh");

        let spec = CommandSpec::shell("nvm --version");
        assert_eq!(spec.program, "bash");
        assert_eq!(spec.args, vec!["-c", "nvm --version"]);
    }

    #[test]
    fn output_text_falls_back_to_stderr() {
        let output = CommandOutput {
            success: true,
            stdout: "  ".to_string(),
            stderr: "v1.2.3\n".to_string(),
        };
        assert_eq!(output.text(), "v1.2.3");
    }

    #[test]
    #[cfg(unix)]
    fn root_check_agrees_with_id() {
        let uid = Command::new("id").arg("-u").output().unwrap();
        let is_root = String::from_utf8_lossy(&uid.stdout).trim() == "0";
        assert_eq!(HostSystem.is_root(), is_root);
        assert_eq!(is_elevated(), is_root);
    }

    #[test]
    #[cfg(unix)]
    fn host_system_captures_output() {
        let output = HostSystem
            .run(&CommandSpec::new("sh").arg("-c").arg("echo hello; exit 3"))
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }
}
