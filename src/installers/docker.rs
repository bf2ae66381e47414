//! Docker Engine and the Compose plugin, installed through the upstream
//! convenience script on Linux and the Homebrew cask on macOS.

use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::installers::{archive, elevate, run_quiet, run_step, Artifact, Tool, ToolInstaller};
use crate::orchestrator::{InstallTarget, VerificationResult};
use crate::platform::{Os, PackageManager, Platform};
use crate::profile::ProfileEditBlock;
use crate::region::{Region, RegionProfile};
use crate::system::{CommandSpec, System};
use crate::version::parse_reported;

pub const DAEMON_CONFIG: &str = "/etc/docker/daemon.json";

const SCRIPT_NAME: &str = "get-docker.sh";
const COMPOSE_PLUGIN: &str = "docker-compose-plugin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerEndpoints {
    pub script_url: String,
    /// Value for the convenience script's `--mirror` option.
    pub script_mirror: Option<String>,
    pub registry_mirrors: Vec<String>,
}

impl DockerEndpoints {
    pub fn global() -> Self {
        Self {
            script_url: "https://get.docker.com".to_string(),
            script_mirror: None,
            registry_mirrors: Vec::new(),
        }
    }

    pub fn mirror() -> Self {
        Self {
            script_url: "https://get.docker.com".to_string(),
            script_mirror: Some("Aliyun".to_string()),
            registry_mirrors: vec!["https://docker.m.daocloud.io".to_string()],
        }
    }
}

/// How Docker gets onto a given platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStrategy {
    ConvenienceScript { package_manager: PackageManager },
    HomebrewCask,
}

impl DockerStrategy {
    pub fn select(platform: &Platform) -> Result<Self, InstallError> {
        match (platform.os, platform.package_manager) {
            (
                Os::Linux,
                Some(pm @ (PackageManager::Apt | PackageManager::Dnf | PackageManager::Yum)),
            ) => Ok(Self::ConvenienceScript {
                package_manager: pm,
            }),
            (Os::Darwin, Some(PackageManager::Brew)) => Ok(Self::HomebrewCask),
            (os, pm) => Err(InstallError::EnvironmentUnsupported(format!(
                "no Docker installation method for {} with {}",
                os.as_str(),
                pm.map_or("no package manager".to_string(), |pm| pm.to_string())
            ))),
        }
    }
}

pub struct DockerInstaller {
    strategy: DockerStrategy,
    endpoints: RegionProfile<DockerEndpoints>,
    daemon_config: PathBuf,
    user: Option<String>,
}

impl DockerInstaller {
    /// Fails before any side effect when the platform has no supported method.
    pub fn new(region: Region, platform: &Platform) -> Result<Self, InstallError> {
        Ok(Self {
            strategy: DockerStrategy::select(platform)?,
            endpoints: RegionProfile::new(
                DockerEndpoints::global(),
                DockerEndpoints::mirror(),
                region,
            ),
            daemon_config: PathBuf::from(DAEMON_CONFIG),
            user: invoking_user(),
        })
    }

    pub fn probe_url() -> String {
        DockerEndpoints::global().script_url
    }

    pub fn with_daemon_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.daemon_config = path.into();
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    fn script_command(&self, script: &Path, target: &InstallTarget) -> CommandSpec {
        let mut spec = CommandSpec::new("sh").arg(script.to_string_lossy());
        if let Some(mirror) = &self.endpoints.selected().script_mirror {
            spec = spec.arg("--mirror").arg(mirror);
        }
        if let Some(version) = &target.resolved_version {
            spec = spec.arg("--version").arg(version);
        }
        spec.interactive()
    }

    fn compose_available(system: &dyn System) -> bool {
        run_quiet(system, &CommandSpec::new("docker").args(["compose", "version"])).success
    }

    fn ensure_compose(&self, system: &dyn System, package_manager: PackageManager) -> Option<String> {
        if Self::compose_available(system) {
            return None;
        }

        tracing::info!(%package_manager, "compose plugin missing, installing");
        let spec = CommandSpec::new(package_manager.program())
            .args(["install", "-y", COMPOSE_PLUGIN])
            .interactive();
        let result = elevate(system, spec).map_err(|err| err.to_string()).and_then(|spec| {
            run_step(system, Tool::Docker, &spec)
                .map(|_| ())
                .map_err(|err| err.to_string())
        });
        result
            .err()
            .map(|err| format!("Could not install {COMPOSE_PLUGIN}: {err}"))
    }

    /// Writes `daemon.json` unless one already exists. Returns whether it was written.
    fn write_daemon_config(&self, system: &dyn System) -> Result<bool> {
        let mirrors = &self.endpoints.selected().registry_mirrors;
        if mirrors.is_empty() || self.daemon_config.exists() {
            return Ok(false);
        }

        let contents = serde_json::to_string_pretty(&json!({ "registry-mirrors": mirrors }))?;
        match write_config(&self.daemon_config, &contents) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                let staged = tempfile::NamedTempFile::new()?;
                fs::write(staged.path(), &contents)?;
                let parent = self
                    .daemon_config
                    .parent()
                    .context("daemon config path has no parent")?;
                archive::run_privileged(
                    system,
                    CommandSpec::new("mkdir").arg("-p").arg(parent.to_string_lossy()),
                )?;
                archive::run_privileged(
                    system,
                    CommandSpec::new("cp")
                        .arg(staged.path().to_string_lossy())
                        .arg(self.daemon_config.to_string_lossy()),
                )?;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to write {:?}", self.daemon_config))
            }
        }

        tracing::info!(path = %self.daemon_config.display(), "wrote registry mirrors");
        Ok(true)
    }

    fn enable_service(&self, system: &dyn System, restart: bool) -> Vec<String> {
        if system.which("systemctl").is_none() {
            tracing::debug!("systemctl not found, leaving the docker service alone");
            return Vec::new();
        }

        let mut commands = vec![CommandSpec::new("systemctl").args(["enable", "--now", "docker"])];
        if restart {
            commands.push(CommandSpec::new("systemctl").args(["restart", "docker"]));
        }

        commands
            .into_iter()
            .filter_map(|spec| {
                let spec = match elevate(system, spec) {
                    Ok(spec) => spec,
                    Err(err) => return Some(err.to_string()),
                };
                run_step(system, Tool::Docker, &spec).err().map(|err| err.to_string())
            })
            .collect()
    }

    fn add_to_group(&self, system: &dyn System) -> Option<String> {
        let user = self.user.as_deref().filter(|user| *user != "root")?;
        let spec = CommandSpec::new("usermod").args(["-aG", "docker", user]);
        let outcome = elevate(system, spec)
            .map_err(|err| err.to_string())
            .and_then(|spec| run_step(system, Tool::Docker, &spec).map_err(|err| err.to_string()));

        Some(match outcome {
            Ok(_) => format!(
                "Added {user} to the docker group; log out and back in to use docker without sudo"
            ),
            Err(err) => format!("Could not add {user} to the docker group: {err}"),
        })
    }

    fn smoke_command(&self, system: &dyn System) -> CommandSpec {
        let spec = CommandSpec::new("docker").args(["run", "--rm", "hello-world"]);
        match self.strategy {
            // Group membership only applies to new login sessions.
            DockerStrategy::ConvenienceScript { .. } => elevate(system, spec.clone()).unwrap_or(spec),
            DockerStrategy::HomebrewCask => spec,
        }
    }
}

fn write_config(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

/// The human behind `sudo`, if any, else the current user.
fn invoking_user() -> Option<String> {
    ["SUDO_USER", "USER"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.is_empty()))
}

impl ToolInstaller for DockerInstaller {
    fn tool(&self) -> Tool {
        Tool::Docker
    }

    fn installed_version(&self, system: &dyn System, _target: &InstallTarget) -> Option<String> {
        let output = run_quiet(system, &CommandSpec::new("docker").arg("--version"));
        if !output.success {
            return None;
        }
        parse_reported(output.text(), "")
    }

    fn replaceable_dir(&self, _target: &InstallTarget) -> Result<Option<PathBuf>, InstallError> {
        Ok(None)
    }

    fn artifact(&self, _system: &dyn System, _target: &InstallTarget) -> Option<Artifact> {
        match self.strategy {
            DockerStrategy::ConvenienceScript { .. } => Some(Artifact::new(
                &self.endpoints.selected().script_url,
                SCRIPT_NAME,
            )),
            DockerStrategy::HomebrewCask => None,
        }
    }

    fn install(
        &self,
        system: &dyn System,
        target: &InstallTarget,
        artifact: Option<&Path>,
        _scratch: &Path,
    ) -> Result<(), InstallError> {
        match self.strategy {
            DockerStrategy::ConvenienceScript { .. } => {
                let script = artifact.ok_or_else(|| {
                    InstallError::install("docker", "the install script was not downloaded")
                })?;
                let spec = elevate(system, self.script_command(script, target))?;
                run_step(system, Tool::Docker, &spec)?;
            }
            DockerStrategy::HomebrewCask => {
                if let Some(version) = &target.resolved_version {
                    tracing::warn!(%version, "the Homebrew cask cannot pin a version");
                }
                let spec = CommandSpec::new("brew")
                    .args(["install", "--cask", "docker"])
                    .interactive();
                run_step(system, Tool::Docker, &spec)?;
            }
        }
        Ok(())
    }

    fn configure(&self, system: &dyn System, target: &InstallTarget) -> Vec<String> {
        let DockerStrategy::ConvenienceScript { package_manager } = self.strategy else {
            return target
                .resolved_version
                .iter()
                .map(|version| {
                    format!("Homebrew installs the current Docker Desktop, not {version}")
                })
                .collect();
        };

        let mut warnings: Vec<String> = self
            .ensure_compose(system, package_manager)
            .into_iter()
            .collect();

        let wrote_config = match self.write_daemon_config(system) {
            Ok(written) => written,
            Err(err) => {
                warnings.push(format!("Could not write {}: {err:#}", self.daemon_config.display()));
                false
            }
        };
        warnings.extend(self.enable_service(system, wrote_config));
        warnings.extend(self.add_to_group(system));
        warnings
    }

    fn profile_block(&self, _target: &InstallTarget) -> Option<ProfileEditBlock> {
        None
    }

    fn verify(&self, system: &dyn System, target: &InstallTarget) -> VerificationResult {
        let Some(version) = self.installed_version(system, target) else {
            return VerificationResult::missing("`docker --version` did not report a version");
        };

        let mut result = VerificationResult::found(version);
        if !Self::compose_available(system) {
            result = result.warn("`docker compose version` failed; Compose is not available");
        }

        let output = run_quiet(system, &self.smoke_command(system));
        result.smoke(output.success, || {
            format!("`docker run --rm hello-world` failed: {}", output.text())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Orchestrator, Outcome, Stage};
    use crate::system::CommandOutput;
    use crate::testing::{write_file, FakeSystem, FakeTransport};
    use rstest::rstest;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    const SCRIPT_URL: &str = "https://get.docker.com";

    fn linux(pm: Option<PackageManager>) -> Platform {
        Platform::from_parts("linux", "x86_64", pm).unwrap()
    }

    /// Root host with apt where running the script makes `docker` appear.
    fn docker_host() -> FakeSystem {
        let installed = Rc::new(Cell::new(false));
        let after_script = Rc::clone(&installed);
        FakeSystem::new()
            .root()
            .with_program("apt-get")
            .with_program("systemctl")
            .respond_with(move |spec| {
                (spec.program == "sh").then(|| {
                    after_script.set(true);
                    CommandOutput::ok("")
                })
            })
            .respond_with(move |spec| {
                (spec.program == "docker" && installed.get())
                    .then(|| CommandOutput::ok("Docker version 24.0.7, build afdd53b"))
            })
            .respond("systemctl", CommandOutput::ok(""))
            .respond("usermod", CommandOutput::ok(""))
    }

    fn target(platform: Platform, version: Option<&str>) -> InstallTarget {
        let version = version.map(str::to_string);
        InstallTarget::new(Tool::Docker, platform).with_version(version.clone(), version)
    }

    #[rstest]
    #[case("linux", Some(PackageManager::Apt), true)]
    #[case("linux", Some(PackageManager::Dnf), true)]
    #[case("linux", Some(PackageManager::Yum), true)]
    #[case("macos", Some(PackageManager::Brew), true)]
    #[case("linux", Some(PackageManager::Brew), false)]
    #[case("linux", None, false)]
    #[case("macos", None, false)]
    fn strategy_selection(
        #[case] os: &str,
        #[case] pm: Option<PackageManager>,
        #[case] supported: bool,
    ) {
        let platform = Platform::from_parts(os, "aarch64", pm).unwrap();
        let strategy = DockerStrategy::select(&platform);
        assert_eq!(strategy.is_ok(), supported);
        if let Err(err) = strategy {
            assert!(matches!(err, InstallError::EnvironmentUnsupported(_)));
        }
    }

    #[test]
    fn script_arguments_follow_region_and_version() {
        let platform = linux(Some(PackageManager::Apt));
        let script = Path::new("/tmp/get-docker.sh");

        let global = DockerInstaller::new(Region::Global, &platform).unwrap();
        let spec = global.script_command(script, &target(platform, None));
        assert_eq!(spec.to_string(), "sh /tmp/get-docker.sh");

        let mirror = DockerInstaller::new(Region::Mirror, &platform).unwrap();
        let spec = mirror.script_command(script, &target(platform, Some("24.0.7")));
        assert_eq!(
            spec.to_string(),
            "sh /tmp/get-docker.sh --mirror Aliyun --version 24.0.7"
        );
    }

    #[test]
    fn linux_install_runs_script_and_configures() {
        let temp = TempDir::new().unwrap();
        let daemon = temp.path().join("docker/daemon.json");
        let transport = FakeTransport::new().with_file(SCRIPT_URL, b"#!/bin/sh\necho ok\n".to_vec());
        let system = docker_host();
        let platform = linux(Some(PackageManager::Apt));
        let installer = DockerInstaller::new(Region::Mirror, &platform)
            .unwrap()
            .with_daemon_config(&daemon)
            .with_user(Some("dev".to_string()));

        let report = Orchestrator::new(&system, &transport, Vec::new())
            .install(&installer, &target(platform, None), false)
            .unwrap();

        assert_eq!(report.outcome, Outcome::Installed);
        assert!(report.stages.contains(&Stage::Download));
        assert_eq!(report.profiles_updated, 0);
        let verification = report.verification.as_ref().unwrap();
        assert_eq!(verification.reported_version, "24.0.7");
        assert!(verification.smoke_test_passed);

        assert!(system.ran("get-docker.sh --mirror Aliyun"));
        assert!(system.ran("systemctl enable --now docker"));
        assert!(system.ran("systemctl restart docker"));
        assert!(system.ran("usermod -aG docker dev"));
        assert!(!system.ran(COMPOSE_PLUGIN));

        let config: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&daemon).unwrap()).unwrap();
        assert_eq!(config["registry-mirrors"][0], "https://docker.m.daocloud.io");
    }

    #[test]
    fn existing_daemon_config_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let daemon = temp.path().join("daemon.json");
        write_file(&daemon, "{\"log-driver\": \"journald\"}\n");
        let system = docker_host().respond(
            "docker compose version",
            CommandOutput::ok("Docker Compose version v2.24.0"),
        );
        let platform = linux(Some(PackageManager::Apt));
        let installer = DockerInstaller::new(Region::Mirror, &platform)
            .unwrap()
            .with_daemon_config(&daemon)
            .with_user(None);

        let warnings = installer.configure(&system, &target(platform, None));

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(
            fs::read_to_string(&daemon).unwrap(),
            "{\"log-driver\": \"journald\"}\n"
        );
        assert!(!system.ran("systemctl restart"));
    }

    #[test]
    fn missing_compose_installs_plugin() {
        let temp = TempDir::new().unwrap();
        let system = FakeSystem::new()
            .root()
            .with_program("dnf")
            .respond("docker compose version", CommandOutput::failed("unknown command"))
            .respond("dnf install", CommandOutput::failed("no match"));
        let platform = linux(Some(PackageManager::Dnf));
        let installer = DockerInstaller::new(Region::Global, &platform)
            .unwrap()
            .with_daemon_config(temp.path().join("daemon.json"))
            .with_user(None);

        let warnings = installer.configure(&system, &target(platform, None));

        assert!(system.ran("dnf install -y docker-compose-plugin"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains(COMPOSE_PLUGIN));
        assert!(!temp.path().join("daemon.json").exists());
    }

    #[test]
    fn already_installed_docker_is_skipped() {
        let system = FakeSystem::new()
            .with_program("apt-get")
            .respond("docker --version", CommandOutput::ok("Docker version 24.0.7, build afdd53b"));
        let transport = FakeTransport::new();
        let platform = linux(Some(PackageManager::Apt));
        let installer = DockerInstaller::new(Region::Global, &platform).unwrap();

        let report = Orchestrator::new(&system, &transport, Vec::new())
            .install(&installer, &target(platform, None), false)
            .unwrap();

        assert_eq!(
            report.outcome,
            Outcome::AlreadyInstalled {
                version: "24.0.7".to_string()
            }
        );
        assert_eq!(transport.network_calls(), 0);
    }

    #[test]
    fn minor_release_request_accepts_installed_patch() {
        let system = FakeSystem::new()
            .with_program("apt-get")
            .respond("docker --version", CommandOutput::ok("Docker version 24.0.7, build afdd53b"));
        let transport = FakeTransport::new();
        let platform = linux(Some(PackageManager::Apt));
        let installer = DockerInstaller::new(Region::Global, &platform).unwrap();
        let orchestrator = Orchestrator::new(&system, &transport, Vec::new());

        let report = orchestrator
            .install(&installer, &target(platform, Some("24.0")), false)
            .unwrap();
        assert_eq!(
            report.outcome,
            Outcome::AlreadyInstalled {
                version: "24.0.7".to_string()
            }
        );
        assert_eq!(transport.network_calls(), 0);

        let err = orchestrator
            .install(&installer, &target(platform, Some("25.0")), false)
            .unwrap_err();
        assert!(matches!(err, InstallError::DownloadFailed { .. }));
    }

    #[test]
    fn homebrew_cask_needs_no_download() {
        let installed = Rc::new(Cell::new(false));
        let after_brew = Rc::clone(&installed);
        let system = FakeSystem::new()
            .with_program("brew")
            .respond_with(move |spec| {
                (spec.program == "brew").then(|| {
                    after_brew.set(true);
                    CommandOutput::ok("")
                })
            })
            .respond_with(move |spec| {
                (spec.program == "docker" && installed.get())
                    .then(|| CommandOutput::ok("Docker version 25.0.3, build 4debf41"))
            });
        let transport = FakeTransport::new();
        let platform = Platform::from_parts("macos", "aarch64", Some(PackageManager::Brew)).unwrap();
        let installer = DockerInstaller::new(Region::Global, &platform).unwrap();

        let report = Orchestrator::new(&system, &transport, Vec::new())
            .install(&installer, &target(platform, None), false)
            .unwrap();

        assert!(!report.stages.contains(&Stage::Download));
        assert_eq!(transport.download_count(), 0);
        assert!(system.ran("brew install --cask docker"));
        assert!(!system.ran("sudo"));
        assert_eq!(report.verification.unwrap().reported_version, "25.0.3");
    }

    #[test]
    fn non_root_without_sudo_cannot_run_script() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join(SCRIPT_NAME);
        write_file(&script, "#!/bin/sh\n");
        let system = FakeSystem::new().with_program("apt-get");
        let platform = linux(Some(PackageManager::Apt));
        let installer = DockerInstaller::new(Region::Global, &platform).unwrap();

        let err = installer
            .install(&system, &target(platform, None), Some(&script), temp.path())
            .unwrap_err();
        assert!(matches!(err, InstallError::EnvironmentUnsupported(_)));
        assert!(system.calls().is_empty());
    }
}
