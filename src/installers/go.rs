use std::fs;
use std::path::{Path, PathBuf};

use crate::error::InstallError;
use crate::installers::{archive, join_url, run_quiet, Artifact, Tool, ToolInstaller};
use crate::orchestrator::{InstallTarget, VerificationResult};
use crate::profile::ProfileEditBlock;
use crate::region::{Region, RegionProfile};
use crate::system::{CommandSpec, System};
use crate::util::expand_path;
use crate::version::{self, parse_reported, LatestPointer};

pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/go";
pub const INSTALL_DIR_ENV: &str = "GO_INSTALL_DIR";

const HELLO_GO: &str = r#"package main

import "fmt"

func main() {
	fmt.Println("Hello, oneclick!")
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoEndpoints {
    pub download_base: String,
    pub version_url: String,
    pub goproxy: Option<String>,
}

impl GoEndpoints {
    pub fn global() -> Self {
        Self {
            download_base: "https://go.dev/dl".to_string(),
            version_url: "https://go.dev/VERSION?m=text".to_string(),
            goproxy: None,
        }
    }

    pub fn mirror() -> Self {
        Self {
            download_base: "https://golang.google.cn/dl".to_string(),
            version_url: "https://golang.google.cn/VERSION?m=text".to_string(),
            goproxy: Some("https://goproxy.cn,direct".to_string()),
        }
    }
}

/// `--dir` beats `$GO_INSTALL_DIR`, which beats the config file.
pub fn resolve_install_dir(
    flag: Option<&str>,
    env_value: Option<&str>,
    config: Option<&str>,
) -> PathBuf {
    [flag, env_value, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(expand_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_DIR))
}

pub struct GoInstaller {
    endpoints: RegionProfile<GoEndpoints>,
}

impl GoInstaller {
    pub fn new(region: Region) -> Self {
        Self {
            endpoints: RegionProfile::new(GoEndpoints::global(), GoEndpoints::mirror(), region),
        }
    }

    /// URL probed when the region is detected automatically.
    pub fn probe_url() -> String {
        GoEndpoints::global().download_base
    }

    pub fn latest_pointer(&self) -> LatestPointer {
        LatestPointer::PlainText {
            url: self.endpoints.selected().version_url.clone(),
            prefix: "go".to_string(),
        }
    }

    fn go_binary(dir: &Path) -> PathBuf {
        dir.join("bin").join("go")
    }

    fn is_go_tree(dir: &Path) -> bool {
        Self::go_binary(dir).is_file() || dir.join("VERSION").is_file()
    }

    fn install_dir(target: &InstallTarget) -> Result<&Path, InstallError> {
        target
            .install_dir
            .as_deref()
            .ok_or_else(|| InstallError::install("go", "no install directory chosen"))
    }

    fn go_command(dir: &Path) -> CommandSpec {
        CommandSpec::new(Self::go_binary(dir).to_string_lossy()).env("GOROOT", dir.to_string_lossy())
    }

    fn reported_version(system: &dyn System, dir: &Path) -> Option<String> {
        let binary = Self::go_binary(dir);
        if !binary.is_file() {
            return None;
        }
        let output = run_quiet(system, &Self::go_command(dir).arg("version"));
        if !output.success {
            return None;
        }
        parse_reported(output.text(), "go")
    }

    fn configure_proxy(&self, system: &dyn System, dir: &Path, proxy: &str) -> Option<String> {
        let goenv = run_quiet(system, &Self::go_command(dir).args(["env", "GOENV"]));
        let env_file = goenv
            .success
            .then(|| goenv.text().to_string())
            .filter(|path| !path.is_empty() && path != "off")
            .map(PathBuf::from);

        if let Some(file) = &env_file {
            let existing = fs::read_to_string(file).unwrap_or_default();
            if existing.lines().any(|line| line.trim_start().starts_with("GOPROXY=")) {
                tracing::debug!(file = %file.display(), "GOPROXY already configured");
                return None;
            }
        }

        let output = run_quiet(
            system,
            &Self::go_command(dir).args(["env", "-w", &format!("GOPROXY={proxy}")]),
        );
        if output.success {
            tracing::info!(proxy, "configured GOPROXY");
            None
        } else {
            Some(format!("Could not set GOPROXY={proxy}: {}", output.text()))
        }
    }

    fn smoke_test(system: &dyn System, dir: &Path) -> Result<(), String> {
        let workdir = tempfile::Builder::new()
            .prefix("oneclick-go-smoke-")
            .tempdir()
            .map_err(|err| format!("cannot create temp dir: {err}"))?;
        fs::write(workdir.path().join("hello.go"), HELLO_GO)
            .map_err(|err| format!("cannot write hello.go: {err}"))?;

        let output = run_quiet(
            system,
            &Self::go_command(dir)
                .args(["run", "hello.go"])
                .env("GOPATH", workdir.path().join("gopath").to_string_lossy())
                .env("GOCACHE", workdir.path().join("cache").to_string_lossy())
                .cwd(workdir.path()),
        );
        if output.success && output.stdout.contains("Hello, oneclick!") {
            Ok(())
        } else {
            Err(output.text().to_string())
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none())
}

impl ToolInstaller for GoInstaller {
    fn tool(&self) -> Tool {
        Tool::Go
    }

    fn installed_version(&self, system: &dyn System, target: &InstallTarget) -> Option<String> {
        Self::reported_version(system, target.install_dir.as_deref()?)
    }

    fn replaceable_dir(&self, target: &InstallTarget) -> Result<Option<PathBuf>, InstallError> {
        let Some(dir) = target.install_dir.as_deref() else {
            return Ok(None);
        };
        if !dir.exists() || Self::is_go_tree(dir) || is_empty_dir(dir) {
            return Ok(Some(dir.to_path_buf()));
        }
        Err(InstallError::install(
            "go",
            format!(
                "{} exists and is not a Go installation; choose another --dir",
                dir.display()
            ),
        ))
    }

    fn artifact(&self, _system: &dyn System, target: &InstallTarget) -> Option<Artifact> {
        let version = target.resolved_version.as_deref()?;
        let file_name = format!(
            "go{version}.{}-{}.tar.gz",
            target.platform.os.as_str(),
            target.platform.arch.as_str()
        );
        let url = join_url(&self.endpoints.selected().download_base, &file_name);
        Some(Artifact::new(url, file_name))
    }

    fn install(
        &self,
        system: &dyn System,
        target: &InstallTarget,
        artifact: Option<&Path>,
        scratch: &Path,
    ) -> Result<(), InstallError> {
        let dir = Self::install_dir(target)?;
        let archive_path =
            artifact.ok_or_else(|| InstallError::install("go", "no archive was downloaded"))?;

        archive::install_tree(system, archive_path, scratch, dir, "go")
            .map_err(|err| InstallError::install("go", format!("{err:#}")))
    }

    fn configure(&self, system: &dyn System, target: &InstallTarget) -> Vec<String> {
        let Some(proxy) = self.endpoints.selected().goproxy.as_deref() else {
            return Vec::new();
        };
        let Some(dir) = target.install_dir.as_deref() else {
            return Vec::new();
        };
        self.configure_proxy(system, dir, proxy).into_iter().collect()
    }

    fn profile_block(&self, target: &InstallTarget) -> Option<ProfileEditBlock> {
        let dir = target.install_dir.as_deref()?;
        Some(
            ProfileEditBlock::new("go")
                .export("GOROOT", dir.to_string_lossy())
                .export("GOPATH", "$HOME/go")
                .line("export PATH=\"$PATH:$GOROOT/bin:$GOPATH/bin\""),
        )
    }

    fn verify(&self, system: &dyn System, target: &InstallTarget) -> VerificationResult {
        let Some(dir) = target.install_dir.as_deref() else {
            return VerificationResult::missing("no install directory chosen");
        };
        let Some(version) = Self::reported_version(system, dir) else {
            return VerificationResult::missing(format!(
                "`{}` did not report a version",
                Self::go_binary(dir).display()
            ));
        };

        let mut result = VerificationResult::found(&version);
        if let Some(wanted) = target.resolved_version.as_deref() {
            if !version::satisfies(wanted, &version) {
                result = result.warn(format!("go reports {version}, expected {wanted}"));
            }
        }

        let smoke = Self::smoke_test(system, dir);
        result.smoke(smoke.is_ok(), || {
            format!(
                "Go hello-world smoke test failed: {}",
                smoke.err().unwrap_or_default()
            )
        })
    }
}
