use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Timeouts;

/// Result of a reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    /// No HTTP client could be set up to probe with.
    Unavailable,
}

/// A file fetched to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: [u8; 32],
}

impl Download {
    pub fn digest(&self) -> String {
        hex::encode(self.sha256)
    }
}

/// Network access used by the resolvers and the orchestrator.
pub trait Transport {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;

    /// Fetch a small text document (version pointers).
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// Stream `url` into `dest`. Non-2xx responses and empty bodies are errors.
    fn download(&self, url: &str, dest: &Path) -> Result<Download>;
}

/// Blocking reqwest client with the configured timeouts.
pub struct HttpTransport {
    timeouts: Timeouts,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            user_agent: format!("oneclick/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn client(&self, connect: Duration, total: Duration) -> Result<Client> {
        Client::builder()
            .connect_timeout(connect)
            .timeout(total)
            .build()
            .context("Failed to build HTTP client")
    }
}

impl Transport for HttpTransport {
    fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let client = match self.client(timeout, timeout) {
            Ok(client) => client,
            Err(err) => {
                tracing::debug!(error = %err, "probe client unavailable");
                return ProbeOutcome::Unavailable;
            }
        };

        match client.head(url).header(USER_AGENT, &self.user_agent).send() {
            Ok(response) => {
                tracing::debug!(url, status = %response.status(), "probe answered");
                ProbeOutcome::Reachable
            }
            Err(err) => {
                tracing::debug!(url, error = %err, "probe failed");
                ProbeOutcome::Unreachable
            }
        }
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        let fetch = self.timeouts.fetch();
        let client = self.client(fetch, fetch)?;
        let response = client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("Failed to request {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned {status}");
        }

        response
            .text()
            .with_context(|| format!("Failed to read response body from {url}"))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<Download> {
        let client = self.client(self.timeouts.connect(), self.timeouts.transfer())?;
        let mut response = client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("Failed to download {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("server returned {status}");
        }

        write_stream(&mut response, dest)
    }
}

/// Copy `reader` into `dest`, hashing as it goes.
pub(crate) fn write_stream(reader: &mut impl Read, dest: &Path) -> Result<Download> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create download directory {:?}", parent))?;
    }

    let mut file =
        File::create(dest).with_context(|| format!("Failed to create file at {:?}", dest))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .context("Failed while reading download stream")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .with_context(|| format!("Failed while writing to {:?}", dest))?;
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    file.flush()
        .with_context(|| format!("Failed to flush download to {:?}", dest))?;

    if total == 0 {
        bail!("received an empty file");
    }

    Ok(Download {
        path: dest.to_path_buf(),
        bytes: total,
        sha256: hasher.finalize().into(),
    })
}
