use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::system::{CommandSpec, System};

pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {:?}", archive_path))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to unpack tar.gz archive {:?}", archive_path))
}

/// Unpack `archive_path` and move its `top_level` directory to `install_dir`.
///
/// Extraction happens in a staging directory so a failed unpack never leaves
/// a half-written `install_dir`. When the parent of `install_dir` is not
/// writable, the final move goes through the privileged-execution mechanism.
pub fn install_tree(
    system: &dyn System,
    archive_path: &Path,
    scratch: &Path,
    install_dir: &Path,
    top_level: &str,
) -> Result<()> {
    let parent = install_dir
        .parent()
        .context("Install directory has no parent")?;

    match prepare_staging(parent, install_dir) {
        Ok(staging) => {
            let result = unpack_and_move(archive_path, &staging, top_level, install_dir);
            let _ = fs::remove_dir_all(&staging);
            result
        }
        Err(err) if is_permission_denied(&err) => {
            tracing::info!(dir = %parent.display(), "install parent not writable, using privileged move");
            let staging = scratch.join("staging");
            fs::create_dir_all(&staging)
                .with_context(|| format!("Failed to create staging directory {:?}", staging))?;
            extract_tar_gz(archive_path, &staging)?;
            let source = staged_root(&staging, top_level)?;

            run_privileged(
                system,
                CommandSpec::new("mkdir").arg("-p").arg(path_arg(parent)),
            )?;
            run_privileged(
                system,
                CommandSpec::new("mv").arg(path_arg(&source)).arg(path_arg(install_dir)),
            )
        }
        Err(err) => Err(err),
    }
}

/// Delete an existing installation, escalating when the directory is not ours.
pub fn remove_tree(system: &dyn System, dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => run_privileged(
            system,
            CommandSpec::new("rm").arg("-rf").arg(path_arg(dir)),
        ),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {:?}", dir)),
    }
}

fn prepare_staging(parent: &Path, install_dir: &Path) -> Result<PathBuf> {
    let name = install_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "install".to_string());
    let staging = parent.join(format!(".{name}.oneclick-staging"));

    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {:?}", parent))?;
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to clear stale staging directory {:?}", staging))?;
    }
    fs::create_dir(&staging)
        .with_context(|| format!("Failed to create staging directory {:?}", staging))?;
    Ok(staging)
}

fn unpack_and_move(
    archive_path: &Path,
    staging: &Path,
    top_level: &str,
    install_dir: &Path,
) -> Result<()> {
    extract_tar_gz(archive_path, staging)?;
    let source = staged_root(staging, top_level)?;
    fs::rename(&source, install_dir).with_context(|| {
        format!("Failed to move {:?} into place at {:?}", source, install_dir)
    })
}

fn staged_root(staging: &Path, top_level: &str) -> Result<PathBuf> {
    let source = staging.join(top_level);
    if !source.is_dir() {
        bail!("Archive does not contain a top-level '{top_level}/' directory");
    }
    Ok(source)
}

pub(crate) fn run_privileged(system: &dyn System, spec: CommandSpec) -> Result<()> {
    if !system.is_root() && system.which("sudo").is_none() {
        bail!("`{spec}` needs root privileges and sudo is not available");
    }
    let spec = spec.privileged();
    let output = system.run(&spec)?;
    if !output.success {
        bail!("`{spec}` failed: {}", output.text());
    }
    Ok(())
}

fn is_permission_denied(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io| io.kind() == io::ErrorKind::PermissionDenied)
    })
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
