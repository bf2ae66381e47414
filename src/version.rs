use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::OnceLock;

use crate::error::InstallError;
use crate::http::Transport;

const VERSION_PATTERN: &str = r"^\d+\.\d+(\.\d+)?((rc|beta)\d+)?$";

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VERSION_PATTERN).expect("version pattern compiles"))
}

/// Validate a version string after removing `prefix` (`go`, `v`).
pub fn validate(raw: &str, prefix: &str) -> Result<String, InstallError> {
    let candidate = strip_prefix(raw.trim(), prefix);
    if version_regex().is_match(candidate) {
        Ok(candidate.to_string())
    } else {
        Err(InstallError::InvalidVersionFormat(raw.to_string()))
    }
}

fn strip_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        value
    } else {
        value.strip_prefix(prefix).unwrap_or(value)
    }
}

/// Where the "latest" version of a tool is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestPointer {
    /// Plain text whose first line is the version, e.g. `go1.22.3`.
    PlainText { url: String, prefix: String },
    /// Node's `index.json`; newest entry, or newest LTS entry.
    NodeIndex { url: String, lts: bool },
    /// A GitHub-style release object with a `tag_name`.
    GithubRelease { url: String, prefix: String },
}

impl LatestPointer {
    pub fn url(&self) -> &str {
        match self {
            Self::PlainText { url, .. }
            | Self::NodeIndex { url, .. }
            | Self::GithubRelease { url, .. } => url,
        }
    }

    fn extract(&self, body: &str) -> Result<String, String> {
        match self {
            Self::PlainText { prefix, .. } => {
                let line = body.lines().next().unwrap_or_default().trim();
                Ok(strip_prefix(line, prefix).to_string())
            }
            Self::NodeIndex { lts, .. } => {
                #[derive(Deserialize)]
                struct NodeRelease {
                    version: String,
                    #[serde(default)]
                    lts: serde_json::Value,
                }

                let releases: Vec<NodeRelease> =
                    serde_json::from_str(body).map_err(|err| format!("invalid index: {err}"))?;
                releases
                    .into_iter()
                    .find(|release| !*lts || is_lts(&release.lts))
                    .map(|release| strip_prefix(&release.version, "v").to_string())
                    .ok_or_else(|| "index lists no matching release".to_string())
            }
            Self::GithubRelease { prefix, .. } => {
                #[derive(Deserialize)]
                struct Release {
                    tag_name: String,
                }

                let release: Release =
                    serde_json::from_str(body).map_err(|err| format!("invalid release: {err}"))?;
                Ok(strip_prefix(release.tag_name.trim(), prefix).to_string())
            }
        }
    }
}

fn is_lts(value: &serde_json::Value) -> bool {
    !matches!(
        value,
        serde_json::Value::Bool(false) | serde_json::Value::Null
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Explicit,
    Latest,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    pub source: VersionSource,
    /// Set when the fallback constant replaced a failed fetch.
    pub warning: Option<String>,
}

impl fmt::Display for ResolvedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version)
    }
}

/// Turns a requested version (or its absence) into a concrete one.
pub struct VersionResolver<'a> {
    tool: &'a str,
    prefix: &'a str,
    transport: &'a dyn Transport,
    fallback: Option<&'a str>,
}

impl<'a> VersionResolver<'a> {
    pub fn new(tool: &'a str, prefix: &'a str, transport: &'a dyn Transport) -> Self {
        Self {
            tool,
            prefix,
            transport,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: &'a str) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn resolve(
        &self,
        explicit: Option<&str>,
        latest: &LatestPointer,
    ) -> Result<ResolvedVersion, InstallError> {
        if let Some(raw) = explicit {
            return Ok(ResolvedVersion {
                version: validate(raw, self.prefix)?,
                source: VersionSource::Explicit,
                warning: None,
            });
        }

        match self.fetch_latest(latest) {
            Ok(version) => {
                tracing::debug!(tool = self.tool, %version, url = latest.url(), "resolved latest version");
                Ok(ResolvedVersion {
                    version,
                    source: VersionSource::Latest,
                    warning: None,
                })
            }
            Err(reason) => match self.fallback {
                Some(fallback) => Ok(ResolvedVersion {
                    version: fallback.to_string(),
                    source: VersionSource::Fallback,
                    warning: Some(format!(
                        "Could not determine the latest {} version ({reason}); using {fallback}",
                        self.tool
                    )),
                }),
                None => Err(InstallError::version_fetch(self.tool, reason)),
            },
        }
    }

    fn fetch_latest(&self, latest: &LatestPointer) -> Result<String, String> {
        let body = self
            .transport
            .fetch_text(latest.url())
            .map_err(|err| format!("{err:#}"))?;
        let version = latest.extract(&body)?;
        if version.is_empty() {
            return Err(format!("{} returned no version", latest.url()));
        }
        validate(&version, "").map_err(|_| format!("{} returned '{version}'", latest.url()))
    }
}

/// Whether `installed` satisfies a request for `wanted`.
///
/// A shorter request matches on a component boundary: `20.14` accepts
/// `20.14.0` and `20.14.3` but not `20.140.0` or `20.14rc1`.
pub fn satisfies(wanted: &str, installed: &str) -> bool {
    installed == wanted
        || installed
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Numeric ordering key; a pre-release suffix sorts below its release.
fn ordering_key(version: &str) -> (Vec<u64>, bool) {
    let split = version
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(version.len());
    let (numbers, suffix) = version.split_at(split);
    let parts = numbers
        .split('.')
        .filter_map(|part| part.parse().ok())
        .collect();
    (parts, suffix.is_empty())
}

/// The newest of `candidates` that satisfies `wanted`.
pub fn newest_matching<'a>(
    wanted: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter(|candidate| satisfies(wanted, candidate))
        .max_by_key(|candidate| ordering_key(candidate))
}

/// Pull a version out of a tool's `--version` style output.
pub fn parse_reported(output: &str, prefix: &str) -> Option<String> {
    let pattern = format!(
        r"{}(\d+\.\d+(?:\.\d+)?(?:(?:rc|beta)\d+)?)",
        regex::escape(prefix)
    );
    Regex::new(&pattern)
        .ok()?
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
