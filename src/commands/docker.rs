use anyhow::Result;

use super::{requested_version, Session};
use crate::cli::InstallArgs;
use crate::installers::docker::DockerStrategy;
use crate::installers::{DockerInstaller, Tool};
use crate::orchestrator::InstallTarget;
use crate::platform::Platform;

pub(super) fn execute(session: &Session, args: &InstallArgs) -> Result<()> {
    let requested = requested_version(Tool::Docker, args)?;
    let platform = Platform::detect(&session.system)?;
    let strategy = DockerStrategy::select(&platform)?;
    tracing::debug!(%platform, ?strategy, "docker target");

    let region = session.region(args.region, &DockerInstaller::probe_url());
    let installer = DockerInstaller::new(region, &platform)?;

    // Without a version the upstream channel decides, so any install satisfies it.
    let target =
        InstallTarget::new(Tool::Docker, platform).with_version(requested.clone(), requested);
    session.install(&installer, &target, args.force, region)
}
