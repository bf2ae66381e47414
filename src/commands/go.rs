use anyhow::Result;
use std::env;

use super::{requested_version, Session};
use crate::cli::InstallArgs;
use crate::installers::go::{resolve_install_dir, INSTALL_DIR_ENV};
use crate::installers::{GoInstaller, Tool};
use crate::orchestrator::InstallTarget;
use crate::platform::Platform;

pub(super) fn execute(session: &Session, args: &InstallArgs, dir: Option<&str>) -> Result<()> {
    let requested = requested_version(Tool::Go, args)?;
    let platform = Platform::detect(&session.system)?;
    let install_dir = resolve_install_dir(
        dir,
        env::var(INSTALL_DIR_ENV).ok().as_deref(),
        session.config.go.install_dir.as_deref(),
    );
    tracing::debug!(%platform, dir = %install_dir.display(), "go target");

    let region = session.region(args.region, &GoInstaller::probe_url());
    let installer = GoInstaller::new(region);
    let resolved =
        session.resolve_version(Tool::Go, requested.as_deref(), &installer.latest_pointer())?;

    let target = InstallTarget::new(Tool::Go, platform)
        .with_version(requested, Some(resolved.version))
        .with_install_dir(install_dir);
    session.install(&installer, &target, args.force, region)
}
