use anyhow::{Context, Result};
use std::env;

use crate::cli::{Cli, Commands, InstallArgs};
use crate::config::Config;
use crate::error::InstallError;
use crate::http::HttpTransport;
use crate::installers::{Tool, ToolInstaller};
use crate::orchestrator::{InstallTarget, Orchestrator, Outcome};
use crate::profile;
use crate::receipts::{InstallReceipt, Receipts};
use crate::region::{HostSignals, Region, RegionPreference, RegionResolver, REGION_ENV};
use crate::system::HostSystem;
use crate::ui;
use crate::version::{self, LatestPointer, ResolvedVersion, VersionResolver};

mod docker;
mod go;
mod node;
mod region;
mod status;

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Go { install, dir } => go::execute(&Session::load()?, &install, dir.as_deref()),

        Commands::Docker { install } => docker::execute(&Session::load()?, &install),

        Commands::Node {
            install,
            lts,
            no_npm_config,
        } => node::execute(&Session::load()?, &install, lts, no_npm_config),

        Commands::Region { probe_url, region } => {
            region::execute(&Session::load()?, &probe_url, region)
        }

        Commands::Status => status::execute(),
    }
}

/// Host seams and settings shared by one invocation.
pub(crate) struct Session {
    pub config: Config,
    pub system: HostSystem,
    pub transport: HttpTransport,
    pub signals: HostSignals,
}

impl Session {
    pub fn load() -> Result<Self> {
        let config = Config::load(&Config::default_path()?)?;
        tracing::debug!(?config, "loaded configuration");
        Ok(Self {
            transport: HttpTransport::new(config.timeouts),
            config,
            system: HostSystem,
            signals: HostSignals::default(),
        })
    }

    pub fn preference(&self, flag: Option<RegionPreference>) -> RegionPreference {
        RegionPreference::pick(flag, env::var(REGION_ENV).ok().as_deref(), self.config.region)
    }

    pub fn resolver(&self, flag: Option<RegionPreference>, probe_url: &str) -> RegionResolver<'_> {
        RegionResolver::new(
            self.preference(flag),
            &self.signals,
            &self.transport,
            probe_url,
            self.config.timeouts.probe(),
        )
    }

    /// Decide the region for this run, probing `probe_url` only if needed.
    pub fn region(&self, flag: Option<RegionPreference>, probe_url: &str) -> Region {
        let resolver = self.resolver(flag, probe_url);
        let decision = resolver.decision();
        ui::status("Region", format!("{} ({})", decision.region, decision.reason));
        decision.region
    }

    pub fn resolve_version(
        &self,
        tool: Tool,
        requested: Option<&str>,
        latest: &LatestPointer,
    ) -> Result<ResolvedVersion, InstallError> {
        let resolved = VersionResolver::new(tool.as_str(), tool.version_prefix(), &self.transport)
            .resolve(requested, latest)?;
        if let Some(warning) = &resolved.warning {
            ui::warn(warning);
        }
        Ok(resolved)
    }

    /// Run the orchestrator, report the outcome and record a receipt.
    pub fn install(
        &self,
        installer: &dyn ToolInstaller,
        target: &InstallTarget,
        force: bool,
        region: Region,
    ) -> Result<()> {
        let tool = target.tool;
        let profiles = profile::default_targets()?;
        let orchestrator = Orchestrator::new(&self.system, &self.transport, profiles);

        let report = match orchestrator.install(installer, target, force) {
            Ok(report) => report,
            Err(err @ InstallError::DownloadFailed { .. }) if region == Region::Mirror => {
                return Err(err).context(
                    "The mirror may not carry this release yet; retry with `--region global`",
                );
            }
            Err(err) => return Err(err.into()),
        };

        for warning in report.all_warnings() {
            ui::warn(warning);
        }

        match &report.outcome {
            Outcome::AlreadyInstalled { version } => {
                ui::success(
                    "Installed",
                    format!("{tool} {version} is already installed (use --force to reinstall)"),
                );
            }
            Outcome::Installed => {
                let version = report
                    .verification
                    .as_ref()
                    .map(|verification| verification.reported_version.clone())
                    .or_else(|| target.resolved_version.clone())
                    .unwrap_or_default();
                ui::success("Installed", format!("{tool} {version}"));
                if report.profiles_updated > 0 {
                    ui::info("Open a new shell or source your profile to pick up the changes");
                }

                let receipt = InstallReceipt::new(tool, version, region)
                    .requested(target.requested_version.clone())
                    .install_dir(target.install_dir.clone())
                    .artifact(report.artifact.as_ref());
                if let Err(err) = record_receipt(receipt) {
                    ui::warn(format!("Could not record the install: {err:#}"));
                }
            }
        }

        Ok(())
    }
}

fn record_receipt(receipt: InstallReceipt) -> Result<()> {
    let path = Receipts::default_path()?;
    let mut receipts = Receipts::load(&path)?;
    receipts.record(receipt);
    receipts.save(&path)
}

/// Validate the requested version before anything touches the network or disk.
pub(crate) fn requested_version(tool: Tool, args: &InstallArgs) -> Result<Option<String>> {
    args.version
        .as_deref()
        .map(|raw| version::validate(raw, tool.version_prefix()))
        .transpose()
        .map_err(Into::into)
}
