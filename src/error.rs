use thiserror::Error;

/// Fatal failures of an install run.
///
/// Verification problems are not errors; they travel as warnings in the
/// [`VerificationResult`](crate::orchestrator::VerificationResult).
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid version format '{0}' (expected MAJOR.MINOR[.PATCH][rcN|betaN])")]
    InvalidVersionFormat(String),

    #[error("Unsupported environment: {0}")]
    EnvironmentUnsupported(String),

    #[error("Failed to determine the {tool} version to install: {reason}")]
    VersionFetchFailed { tool: String, reason: String },

    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Installation of {tool} failed: {reason}")]
    InstallFailed { tool: String, reason: String },
}

impl InstallError {
    pub(crate) fn version_fetch(tool: &str, reason: impl ToString) -> Self {
        Self::VersionFetchFailed {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        Self::DownloadFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn install(tool: &str, reason: impl ToString) -> Self {
        Self::InstallFailed {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }
}
