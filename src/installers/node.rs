//! Node.js through NVM.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::installers::{run_quiet, run_step, Artifact, Tool, ToolInstaller};
use crate::orchestrator::{InstallTarget, VerificationResult};
use crate::profile::ProfileEditBlock;
use crate::region::{Region, RegionProfile};
use crate::system::{CommandSpec, System};
use crate::util::expand_path;
use crate::version::{self, parse_reported, LatestPointer};

pub const NVM_FALLBACK_VERSION: &str = "0.40.1";
pub const NVM_RELEASES_URL: &str = "https://api.github.com/repos/nvm-sh/nvm/releases/latest";
pub const NVM_DIR_ENV: &str = "NVM_DIR";

const INSTALL_SCRIPT_NAME: &str = "install-nvm.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoints {
    /// Base of the NVM repository's raw files; `v{nvm}/install.sh` is appended.
    pub nvm_raw_base: String,
    /// Git remote the NVM installer clones, when not GitHub.
    pub nvm_git_source: Option<String>,
    pub node_dist: String,
    pub npm_registry: Option<String>,
}

impl NodeEndpoints {
    pub fn global() -> Self {
        Self {
            nvm_raw_base: "https://raw.githubusercontent.com/nvm-sh/nvm".to_string(),
            nvm_git_source: None,
            node_dist: "https://nodejs.org/dist".to_string(),
            npm_registry: None,
        }
    }

    pub fn mirror() -> Self {
        Self {
            nvm_raw_base: "https://gitee.com/mirrors/nvm/raw".to_string(),
            nvm_git_source: Some("https://gitee.com/mirrors/nvm.git".to_string()),
            node_dist: "https://npmmirror.com/mirrors/node".to_string(),
            npm_registry: Some("https://registry.npmmirror.com".to_string()),
        }
    }

    pub fn install_script_url(&self, nvm_version: &str) -> String {
        format!("{}/v{nvm_version}/install.sh", self.nvm_raw_base)
    }
}

/// `$NVM_DIR` beats the config file, which beats `~/.nvm`.
pub fn resolve_nvm_dir(env_value: Option<&str>, config: Option<&str>, home: &Path) -> PathBuf {
    [env_value, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(expand_path)
        .unwrap_or_else(|| home.join(".nvm"))
}

/// Where NVM's own latest version is published.
pub fn nvm_release_pointer() -> LatestPointer {
    LatestPointer::GithubRelease {
        url: NVM_RELEASES_URL.to_string(),
        prefix: "v".to_string(),
    }
}

pub struct NodeInstaller {
    endpoints: RegionProfile<NodeEndpoints>,
    nvm_dir: PathBuf,
    nvm_version: String,
    npmrc: Option<PathBuf>,
}

impl NodeInstaller {
    pub fn new(region: Region, nvm_dir: impl Into<PathBuf>, nvm_version: impl Into<String>) -> Self {
        Self {
            endpoints: RegionProfile::new(NodeEndpoints::global(), NodeEndpoints::mirror(), region),
            nvm_dir: nvm_dir.into(),
            nvm_version: nvm_version.into(),
            npmrc: None,
        }
    }

    /// Where to write the npm registry default. `None` leaves npm alone.
    pub fn with_npmrc(mut self, npmrc: Option<PathBuf>) -> Self {
        self.npmrc = npmrc;
        self
    }

    pub fn probe_url() -> String {
        NodeEndpoints::global().node_dist
    }

    pub fn latest_pointer(&self, lts: bool) -> LatestPointer {
        LatestPointer::NodeIndex {
            url: format!("{}/index.json", self.endpoints.selected().node_dist),
            lts,
        }
    }

    fn nvm_script(&self) -> PathBuf {
        self.nvm_dir.join("nvm.sh")
    }

    fn versions_root(&self) -> PathBuf {
        self.nvm_dir.join("versions").join("node")
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_root().join(format!("v{version}"))
    }

    /// Newest installed version that satisfies `wanted`; `20.14` finds `v20.14.3`.
    fn find_installed(&self, wanted: &str) -> Option<String> {
        let entries = fs::read_dir(self.versions_root()).ok()?;
        let installed: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix('v'))
                    .map(str::to_string)
            })
            .collect();
        let newest = version::newest_matching(wanted, installed.iter().map(String::as_str))?;
        Some(newest.to_string())
    }

    fn node_binary(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("bin").join("node")
    }

    fn nvm_command(&self, script: &str) -> CommandSpec {
        CommandSpec::shell(format!(". \"$NVM_DIR/nvm.sh\" && {script}"))
            .env(NVM_DIR_ENV, self.nvm_dir.to_string_lossy())
            .env(
                "NVM_NODEJS_ORG_MIRROR",
                self.endpoints.selected().node_dist.as_str(),
            )
    }

    fn install_nvm(&self, system: &dyn System, script: &Path) -> Result<(), InstallError> {
        fs::create_dir_all(&self.nvm_dir).map_err(|err| {
            InstallError::install("node", format!("cannot create {:?}: {err}", self.nvm_dir))
        })?;

        let mut spec = CommandSpec::new("bash")
            .arg(script.to_string_lossy())
            .env(NVM_DIR_ENV, self.nvm_dir.to_string_lossy())
            // The profile block is ours to write.
            .env("PROFILE", "/dev/null")
            .interactive();
        if let Some(source) = &self.endpoints.selected().nvm_git_source {
            spec = spec.env("NVM_SOURCE", source);
        }

        run_step(system, Tool::Node, &spec)?;
        if !self.nvm_script().is_file() {
            return Err(InstallError::install(
                "node",
                format!("NVM installer finished but {:?} is missing", self.nvm_script()),
            ));
        }
        tracing::info!(dir = %self.nvm_dir.display(), version = %self.nvm_version, "installed nvm");
        Ok(())
    }

    fn write_npmrc(&self) -> Option<String> {
        let registry = self.endpoints.selected().npm_registry.as_deref()?;
        let npmrc = self.npmrc.as_deref()?;
        if npmrc.exists() {
            tracing::debug!(path = %npmrc.display(), "npmrc exists, leaving registry alone");
            return None;
        }

        match fs::write(npmrc, format!("registry={registry}\n")) {
            Ok(()) => {
                tracing::info!(path = %npmrc.display(), registry, "wrote npm registry");
                None
            }
            Err(err) => Some(format!("Could not write {}: {err}", npmrc.display())),
        }
    }
}

impl ToolInstaller for NodeInstaller {
    fn tool(&self) -> Tool {
        Tool::Node
    }

    fn installed_version(&self, _system: &dyn System, target: &InstallTarget) -> Option<String> {
        self.find_installed(target.resolved_version.as_deref()?)
    }

    fn replaceable_dir(&self, target: &InstallTarget) -> Result<Option<PathBuf>, InstallError> {
        let Some(wanted) = target.resolved_version.as_deref() else {
            return Ok(None);
        };
        let version = self
            .find_installed(wanted)
            .unwrap_or_else(|| wanted.to_string());
        Ok(Some(self.version_dir(&version)))
    }

    fn artifact(&self, _system: &dyn System, _target: &InstallTarget) -> Option<Artifact> {
        if self.nvm_script().is_file() {
            return None;
        }
        Some(Artifact::new(
            self.endpoints.selected().install_script_url(&self.nvm_version),
            INSTALL_SCRIPT_NAME,
        ))
    }

    fn install(
        &self,
        system: &dyn System,
        target: &InstallTarget,
        artifact: Option<&Path>,
        _scratch: &Path,
    ) -> Result<(), InstallError> {
        let version = target
            .resolved_version
            .as_deref()
            .ok_or_else(|| InstallError::install("node", "no version resolved"))?;

        if let Some(script) = artifact {
            self.install_nvm(system, script)?;
        }

        let spec = self
            .nvm_command(&format!("nvm install {version} && nvm alias default {version}"))
            .interactive();
        run_step(system, Tool::Node, &spec)?;
        Ok(())
    }

    fn configure(&self, _system: &dyn System, _target: &InstallTarget) -> Vec<String> {
        self.write_npmrc().into_iter().collect()
    }

    fn profile_block(&self, _target: &InstallTarget) -> Option<ProfileEditBlock> {
        let mut block = ProfileEditBlock::new("nvm")
            .export(NVM_DIR_ENV, self.nvm_dir.to_string_lossy())
            .line("[ -s \"$NVM_DIR/nvm.sh\" ] && \\. \"$NVM_DIR/nvm.sh\"");
        if self.endpoints.region() == Region::Mirror {
            block = block.export("NVM_NODEJS_ORG_MIRROR", &self.endpoints.selected().node_dist);
        }
        Some(block)
    }

    fn verify(&self, system: &dyn System, target: &InstallTarget) -> VerificationResult {
        let Some(wanted) = target.resolved_version.as_deref() else {
            return VerificationResult::missing("no Node.js version resolved");
        };
        let Some(installed) = self.find_installed(wanted) else {
            return VerificationResult::missing(format!(
                "no Node.js {wanted} found under {}",
                self.versions_root().display()
            ));
        };
        let node = self.node_binary(&installed);
        let node_program = node.to_string_lossy().into_owned();

        let output = run_quiet(system, &CommandSpec::new(node_program.as_str()).arg("--version"));
        let Some(version) = output
            .success
            .then(|| parse_reported(output.text(), "v"))
            .flatten()
        else {
            return VerificationResult::missing(format!(
                "`{} --version` did not report a version",
                node.display()
            ));
        };

        let mut result = VerificationResult::found(&version);
        if !version::satisfies(wanted, &version) {
            result = result.warn(format!("node reports {version}, expected {wanted}"));
        }

        let smoke = run_quiet(
            system,
            &CommandSpec::new(node_program.as_str()).args(["-e", "console.log(6 * 7)"]),
        );
        result.smoke(smoke.success && smoke.stdout.trim() == "42", || {
            format!("`node -e` smoke test failed: {}", smoke.text())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Orchestrator, Outcome, Stage};
    use crate::platform::Platform;
    use crate::system::CommandOutput;
    use crate::testing::{write_file, FakeSystem, FakeTransport};
    use tempfile::TempDir;

    const SCRIPT_URL: &str = "https://raw.githubusercontent.com/nvm-sh/nvm/v0.40.1/install.sh";

    /// Fakes the NVM installer and `nvm install` by creating the files they would.
    fn nvm_host(nvm_dir: &Path) -> FakeSystem {
        let for_script = nvm_dir.to_path_buf();
        let for_install = nvm_dir.to_path_buf();
        FakeSystem::new()
            .respond_with(move |spec| {
                let runs_script = spec.program == "bash"
                    && spec.args.first().is_some_and(|arg| arg.ends_with(INSTALL_SCRIPT_NAME));
                runs_script.then(|| {
                    write_file(&for_script.join("nvm.sh"), "nvm() { :; }\n");
                    CommandOutput::ok("=> Close and reopen your terminal")
                })
            })
            .respond_with(move |spec| {
                let script = spec.args.get(1)?;
                let version = script
                    .split("nvm install ")
                    .nth(1)?
                    .split_whitespace()
                    .next()?;
                // nvm completes a partial version to a concrete release.
                let concrete = if version.matches('.').count() == 1 {
                    format!("{version}.0")
                } else {
                    version.to_string()
                };
                write_file(
                    &for_install.join(format!("versions/node/v{concrete}/bin/node")),
                    "",
                );
                Some(CommandOutput::ok(""))
            })
            .respond_with(|spec| {
                if !spec.program.ends_with("bin/node") {
                    return None;
                }
                let version = Path::new(&spec.program)
                    .parent()?
                    .parent()?
                    .file_name()?
                    .to_string_lossy()
                    .into_owned();
                match spec.args.first().map(String::as_str) {
                    Some("--version") => Some(CommandOutput::ok(format!("{version}\n"))),
                    Some("-e") => Some(CommandOutput::ok("42\n")),
                    _ => None,
                }
            })
    }

    fn target(version: &str) -> InstallTarget {
        InstallTarget::new(
            Tool::Node,
            Platform::from_parts("linux", "x86_64", None).unwrap(),
        )
        .with_version(Some(version.to_string()), Some(version.to_string()))
    }

    #[test]
    fn nvm_dir_precedence() {
        let home = Path::new("/home/dev");
        assert_eq!(
            resolve_nvm_dir(Some("/opt/nvm"), Some("/cfg/nvm"), home),
            PathBuf::from("/opt/nvm")
        );
        assert_eq!(
            resolve_nvm_dir(None, Some("/cfg/nvm"), home),
            PathBuf::from("/cfg/nvm")
        );
        assert_eq!(
            resolve_nvm_dir(Some("  "), None, home),
            PathBuf::from("/home/dev/.nvm")
        );
    }

    #[test]
    fn endpoints_follow_region() {
        let global = NodeInstaller::new(Region::Global, "/nvm", "0.40.1");
        assert_eq!(
            global.latest_pointer(true),
            LatestPointer::NodeIndex {
                url: "https://nodejs.org/dist/index.json".to_string(),
                lts: true
            }
        );

        let mirror = NodeInstaller::new(Region::Mirror, "/nvm", "0.40.1");
        assert_eq!(
            mirror.latest_pointer(false).url(),
            "https://npmmirror.com/mirrors/node/index.json"
        );
        let artifact = mirror.artifact(&FakeSystem::new(), &target("20.11.0")).unwrap();
        assert_eq!(
            artifact.url,
            "https://gitee.com/mirrors/nvm/raw/v0.40.1/install.sh"
        );
    }

    #[test]
    fn fresh_install_bootstraps_nvm() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        let bashrc = temp.path().join(".bashrc");
        write_file(&bashrc, "");
        let transport = FakeTransport::new().with_file(SCRIPT_URL, b"#!/bin/bash\n".to_vec());
        let system = nvm_host(&nvm_dir);
        let installer = NodeInstaller::new(Region::Global, &nvm_dir, NVM_FALLBACK_VERSION);
        let orchestrator = Orchestrator::new(&system, &transport, vec![bashrc.clone()]);

        let report = orchestrator.install(&installer, &target("20.11.0"), false).unwrap();

        assert_eq!(report.outcome, Outcome::Installed);
        assert!(report.stages.contains(&Stage::Download));
        let verification = report.verification.as_ref().unwrap();
        assert_eq!(verification.reported_version, "20.11.0");
        assert!(verification.smoke_test_passed);
        assert!(system.ran("nvm install 20.11.0 && nvm alias default 20.11.0"));

        let profile = fs::read_to_string(&bashrc).unwrap();
        assert!(profile.contains(&format!("export NVM_DIR=\"{}\"", nvm_dir.display())));
        assert!(!profile.contains("NVM_NODEJS_ORG_MIRROR"));

        let again = orchestrator.install(&installer, &target("20.11.0"), false).unwrap();
        assert_eq!(
            again.outcome,
            Outcome::AlreadyInstalled {
                version: "20.11.0".to_string()
            }
        );
        assert_eq!(transport.download_count(), 1);
    }

    #[test]
    fn existing_nvm_skips_download() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        write_file(&nvm_dir.join("nvm.sh"), "");
        let transport = FakeTransport::new();
        let system = nvm_host(&nvm_dir);
        let installer = NodeInstaller::new(Region::Global, &nvm_dir, NVM_FALLBACK_VERSION);

        let report = Orchestrator::new(&system, &transport, Vec::new())
            .install(&installer, &target("18.19.0"), false)
            .unwrap();

        assert!(!report.stages.contains(&Stage::Download));
        assert_eq!(transport.network_calls(), 0);
        assert!(nvm_dir.join("versions/node/v18.19.0/bin/node").exists());
    }

    #[test]
    fn mirror_configures_npm_and_node_mirror() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        write_file(&nvm_dir.join("nvm.sh"), "");
        let npmrc = temp.path().join(".npmrc");
        let system = nvm_host(&nvm_dir);
        let installer = NodeInstaller::new(Region::Mirror, &nvm_dir, NVM_FALLBACK_VERSION)
            .with_npmrc(Some(npmrc.clone()));

        installer
            .install(&system, &target("20.11.0"), None, temp.path())
            .unwrap();
        assert!(installer.configure(&system, &target("20.11.0")).is_empty());

        assert_eq!(
            fs::read_to_string(&npmrc).unwrap(),
            "registry=https://registry.npmmirror.com\n"
        );
        let block = installer.profile_block(&target("20.11.0")).unwrap().render();
        assert!(block
            .contains("export NVM_NODEJS_ORG_MIRROR=\"https://npmmirror.com/mirrors/node\""));
    }

    #[test]
    fn existing_npmrc_and_opt_out_are_respected() {
        let temp = TempDir::new().unwrap();
        let npmrc = temp.path().join(".npmrc");
        write_file(&npmrc, "registry=https://npm.internal\n");

        let installer = NodeInstaller::new(Region::Mirror, temp.path().join(".nvm"), "0.40.1")
            .with_npmrc(Some(npmrc.clone()));
        installer.configure(&FakeSystem::new(), &target("20.11.0"));
        assert_eq!(
            fs::read_to_string(&npmrc).unwrap(),
            "registry=https://npm.internal\n"
        );

        fs::remove_file(&npmrc).unwrap();
        let opted_out = NodeInstaller::new(Region::Mirror, temp.path().join(".nvm"), "0.40.1")
            .with_npmrc(None);
        assert!(opted_out
            .configure(&FakeSystem::new(), &target("20.11.0"))
            .is_empty());
        assert!(!npmrc.exists());
    }

    #[test]
    fn failed_nvm_install_is_fatal() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        write_file(&nvm_dir.join("nvm.sh"), "");
        let system = FakeSystem::new().respond(
            "nvm install",
            CommandOutput::failed("Version '99.0.0' not found"),
        );
        let installer = NodeInstaller::new(Region::Global, &nvm_dir, "0.40.1");

        let err = Orchestrator::new(&system, &FakeTransport::new(), Vec::new())
            .install(&installer, &target("99.0.0"), false)
            .unwrap_err();

        assert!(matches!(err, InstallError::InstallFailed { .. }));
        assert!(err.to_string().contains("not found"));
    }
    #[test]
    fn major_minor_request_finds_concrete_release() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        write_file(&nvm_dir.join("nvm.sh"), "");
        let transport = FakeTransport::new();
        let system = nvm_host(&nvm_dir);
        let installer = NodeInstaller::new(Region::Global, &nvm_dir, NVM_FALLBACK_VERSION);
        let orchestrator = Orchestrator::new(&system, &transport, Vec::new());

        let report = orchestrator.install(&installer, &target("20.14"), false).unwrap();

        assert_eq!(report.outcome, Outcome::Installed);
        assert!(nvm_dir.join("versions/node/v20.14.0/bin/node").exists());
        let verification = report.verification.as_ref().unwrap();
        assert_eq!(verification.reported_version, "20.14.0");
        assert!(verification.warnings.is_empty(), "{:?}", verification.warnings);

        let again = orchestrator.install(&installer, &target("20.14"), false).unwrap();
        assert_eq!(
            again.outcome,
            Outcome::AlreadyInstalled {
                version: "20.14.0".to_string()
            }
        );
        assert_eq!(system.calls().iter().filter(|call| call.contains("nvm install")).count(), 1);
    }

    #[test]
    fn newest_matching_install_is_used() {
        let temp = TempDir::new().unwrap();
        let nvm_dir = temp.path().join(".nvm");
        for version in ["20.9.0", "20.14.0", "20.14.2", "20.140.1"] {
            fs::create_dir_all(nvm_dir.join(format!("versions/node/v{version}"))).unwrap();
        }
        let installer = NodeInstaller::new(Region::Global, &nvm_dir, NVM_FALLBACK_VERSION);

        assert_eq!(
            installer.installed_version(&FakeSystem::new(), &target("20.14")),
            Some("20.14.2".to_string())
        );
        assert_eq!(
            installer.replaceable_dir(&target("20.14")).unwrap(),
            Some(nvm_dir.join("versions/node/v20.14.2"))
        );
        assert_eq!(installer.installed_version(&FakeSystem::new(), &target("18.19")), None);
    }
}
