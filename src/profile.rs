//! Named environment blocks in shell profiles.
//!
//! A block lives between a begin and an end marker line. Re-applying a block
//! removes the previous copy and appends the new one at the end of the file.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::util::xdg;

/// Profiles considered for injection, in order.
pub const PROFILE_FILES: &[&str] = &[".bashrc", ".zshrc", ".profile"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEditBlock {
    marker: String,
    exports: Vec<String>,
}

impl ProfileEditBlock {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            exports: Vec::new(),
        }
    }

    pub fn line(mut self, statement: impl Into<String>) -> Self {
        self.exports.push(statement.into());
        self
    }

    pub fn export(self, key: &str, value: impl AsRef<str>) -> Self {
        self.line(format!("export {key}=\"{}\"", value.as_ref()))
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn begin_marker(&self) -> String {
        format!("# >>> oneclick {} >>>", self.marker)
    }

    pub fn end_marker(&self) -> String {
        format!("# <<< oneclick {} <<<", self.marker)
    }

    pub fn render(&self) -> String {
        let mut text = self.begin_marker();
        text.push('\n');
        for statement in &self.exports {
            text.push_str(statement);
            text.push('\n');
        }
        text.push_str(&self.end_marker());
        text.push('\n');
        text
    }
}

/// Default profile targets under the user's home directory.
pub fn default_targets() -> Result<Vec<PathBuf>> {
    let home = xdg::home_dir()?;
    Ok(PROFILE_FILES.iter().map(|name| home.join(name)).collect())
}

/// Result of applying a block across several profiles.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub updated: usize,
    /// One entry per file that was left untouched.
    pub refused: Vec<anyhow::Error>,
}

/// Replace `block` in every existing path. A file that cannot be edited is
/// reported and skipped; the remaining paths are still processed.
pub fn apply(profile_paths: &[PathBuf], block: &ProfileEditBlock) -> ProfileUpdate {
    let mut update = ProfileUpdate::default();

    for path in profile_paths {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "profile absent, skipping");
            continue;
        }

        match apply_one(path, block) {
            Ok(()) => update.updated += 1,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "profile left untouched");
                update.refused.push(err);
            }
        }
    }

    update
}

fn apply_one(path: &Path, block: &ProfileEditBlock) -> Result<()> {
    let existing =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let merged = merge(&existing, block).with_context(|| format!("Refusing to edit {:?}", path))?;

    if merged != existing {
        fs::write(path, merged).with_context(|| format!("Failed to write {:?}", path))?;
        tracing::info!(path = %path.display(), marker = block.marker(), "profile updated");
    }

    Ok(())
}

/// Remove every prior copy of `block` from `contents` and append the new one.
pub fn merge(contents: &str, block: &ProfileEditBlock) -> Result<String> {
    let begin = block.begin_marker();
    let end = block.end_marker();

    let mut kept: Vec<&str> = Vec::new();
    let mut inside = false;

    for line in contents.lines() {
        let trimmed = line.trim_end();
        if inside {
            if trimmed == end {
                inside = false;
            }
            continue;
        }
        if trimmed == begin {
            inside = true;
            continue;
        }
        if trimmed == end {
            bail!("found '{end}' without a matching '{begin}'");
        }
        kept.push(line);
    }

    if inside {
        bail!("found '{begin}' without a matching '{end}'");
    }

    // The blank separator written before the previous copy would otherwise pile up.
    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }

    let mut merged = kept.join("\n");
    if !merged.is_empty() {
        merged.push_str("\n\n");
    }
    merged.push_str(&block.render());
    Ok(merged)
}
