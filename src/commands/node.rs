use anyhow::Result;
use std::env;

use super::{requested_version, Session};
use crate::cli::InstallArgs;
use crate::installers::node::{
    nvm_release_pointer, resolve_nvm_dir, NVM_DIR_ENV, NVM_FALLBACK_VERSION,
};
use crate::installers::{NodeInstaller, Tool};
use crate::orchestrator::InstallTarget;
use crate::platform::Platform;
use crate::ui;
use crate::util::xdg;
use crate::version::VersionResolver;

pub(super) fn execute(
    session: &Session,
    args: &InstallArgs,
    lts: bool,
    no_npm_config: bool,
) -> Result<()> {
    let requested = requested_version(Tool::Node, args)?;
    let platform = Platform::detect(&session.system)?;
    let home = xdg::home_dir()?;
    let nvm_dir = resolve_nvm_dir(
        env::var(NVM_DIR_ENV).ok().as_deref(),
        session.config.node.nvm_dir.as_deref(),
        &home,
    );

    let region = session.region(args.region, &NodeInstaller::probe_url());

    // NVM's own version only matters when it still has to be bootstrapped.
    let nvm_version = if nvm_dir.join("nvm.sh").is_file() {
        tracing::debug!(dir = %nvm_dir.display(), "nvm already installed");
        NVM_FALLBACK_VERSION.to_string()
    } else {
        let resolved = VersionResolver::new("nvm", "v", &session.transport)
            .with_fallback(NVM_FALLBACK_VERSION)
            .resolve(None, &nvm_release_pointer())?;
        if let Some(warning) = &resolved.warning {
            ui::warn(warning);
        }
        resolved.version
    };

    let npmrc = (!no_npm_config).then(|| home.join(".npmrc"));
    let installer = NodeInstaller::new(region, nvm_dir, nvm_version).with_npmrc(npmrc);
    let resolved = session.resolve_version(
        Tool::Node,
        requested.as_deref(),
        &installer.latest_pointer(lts),
    )?;

    let target = InstallTarget::new(Tool::Node, platform)
        .with_version(requested, Some(resolved.version));
    session.install(&installer, &target, args.force, region)
}
