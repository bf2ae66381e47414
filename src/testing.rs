//! Test doubles for the host seams.

use anyhow::{anyhow, bail, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::{write_stream, Download, ProbeOutcome, Transport};
use crate::region::SignalSource;
use crate::system::{CommandOutput, CommandSpec, System};

pub struct FakeSignals {
    timezone: Option<String>,
    locale: Option<String>,
}

impl FakeSignals {
    pub fn new(timezone: Option<&str>, locale: Option<&str>) -> Self {
        Self {
            timezone: timezone.map(str::to_string),
            locale: locale.map(str::to_string),
        }
    }
}

impl SignalSource for FakeSignals {
    fn timezone(&self) -> Option<String> {
        self.timezone.clone()
    }

    fn locale(&self) -> Option<String> {
        self.locale.clone()
    }
}

/// Serves canned bodies; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeTransport {
    probe: Option<ProbeOutcome>,
    texts: BTreeMap<String, String>,
    files: BTreeMap<String, Vec<u8>>,
    probes: Cell<usize>,
    fetched: RefCell<Vec<String>>,
    downloaded: RefCell<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(mut self, outcome: ProbeOutcome) -> Self {
        self.probe = Some(outcome);
        self
    }

    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.texts.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_file(mut self, url: &str, body: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), body);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.get()
    }

    pub fn download_count(&self) -> usize {
        self.downloaded.borrow().len()
    }

    /// Every URL touched: fetches and downloads.
    pub fn network_calls(&self) -> usize {
        self.fetched.borrow().len() + self.download_count() + self.probe_count()
    }
}

impl Transport for FakeTransport {
    fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        self.probes.set(self.probes.get() + 1);
        self.probe.unwrap_or(ProbeOutcome::Reachable)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetched.borrow_mut().push(url.to_string());
        self.texts
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("{url} returned 404 Not Found"))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<Download> {
        self.downloaded.borrow_mut().push(url.to_string());
        match self.files.get(url) {
            Some(body) => write_stream(&mut body.as_slice(), dest),
            None => bail!("server returned 404 Not Found"),
        }
    }
}

type Responder = Box<dyn Fn(&CommandSpec) -> Option<CommandOutput>>;

/// Scripted [`System`]. The first responder that answers wins; commands no
/// responder knows fail to spawn.
#[derive(Default)]
pub struct FakeSystem {
    responders: Vec<Responder>,
    programs: BTreeSet<String>,
    root: bool,
    calls: RefCell<Vec<CommandSpec>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Make `program` visible to `which`.
    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.insert(program.to_string());
        self
    }

    /// Answer any command whose rendered form contains `needle`.
    pub fn respond(self, needle: &str, output: CommandOutput) -> Self {
        let needle = needle.to_string();
        self.respond_with(move |spec| {
            spec.to_string()
                .contains(&needle)
                .then(|| output.clone())
        })
    }

    pub fn respond_with(
        mut self,
        responder: impl Fn(&CommandSpec) -> Option<CommandOutput> + 'static,
    ) -> Self {
        self.responders.push(Box::new(responder));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.calls().iter().any(|call| call.contains(needle))
    }
}

impl System for FakeSystem {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        self.responders
            .iter()
            .find_map(|responder| responder(spec))
            .ok_or_else(|| anyhow!("{}: command not found", spec.program))
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        self.programs
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }

    fn is_root(&self) -> bool {
        self.root
    }
}

/// Build a `.tar.gz` whose entries are `(path, contents, mode)`.
pub fn tar_gz(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .expect("finish archive")
}

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}
