//! Global-versus-mirror endpoint selection.
//!
//! The decision is split into pure classification over collected signals
//! ([`classify_signals`], [`classify_probe`]) and the collection itself
//! ([`SignalSource`], [`Transport::probe`]), so it can be exercised without a
//! network or a particular host configuration.

use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::{ProbeOutcome, Transport};

/// Timezones that indicate a network where the primary endpoints are slow or blocked.
pub const RESTRICTED_TIMEZONES: &[&str] = &[
    "Asia/Shanghai",
    "Asia/Chongqing",
    "Asia/Harbin",
    "Asia/Urumqi",
    "PRC",
];

/// Locale marker with the same meaning.
pub const RESTRICTED_LOCALE_MARKER: &str = "zh_CN";

pub const REGION_ENV: &str = "ONECLICK_REGION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Global,
    Mirror,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Global => write!(f, "global"),
            Region::Mirror => write!(f, "mirror"),
        }
    }
}

/// How the region should be chosen.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RegionPreference {
    #[default]
    Auto,
    Global,
    Mirror,
}

impl RegionPreference {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "global" => Some(Self::Global),
            "mirror" => Some(Self::Mirror),
            _ => None,
        }
    }

    /// Flag wins over `$ONECLICK_REGION`, which wins over the config file.
    pub fn pick(flag: Option<Self>, env_value: Option<&str>, config: Self) -> Self {
        if let Some(flag) = flag {
            return flag;
        }
        if let Some(value) = env_value {
            match Self::from_name(value) {
                Some(preference) => return preference,
                None => tracing::warn!(value, "ignoring unrecognised {REGION_ENV}"),
            }
        }
        config
    }

    fn forced(self) -> Option<Region> {
        match self {
            Self::Auto => None,
            Self::Global => Some(Region::Global),
            Self::Mirror => Some(Region::Mirror),
        }
    }
}

impl fmt::Display for RegionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Global => write!(f, "global"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

/// Why a region was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Preference,
    Timezone(String),
    Locale(String),
    Probe(ProbeOutcome),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Preference => write!(f, "explicit preference"),
            Reason::Timezone(tz) => write!(f, "timezone {tz}"),
            Reason::Locale(locale) => write!(f, "locale {locale}"),
            Reason::Probe(ProbeOutcome::Reachable) => write!(f, "primary endpoint reachable"),
            Reason::Probe(ProbeOutcome::Unreachable) => {
                write!(f, "primary endpoint unreachable")
            }
            Reason::Probe(ProbeOutcome::Unavailable) => write!(f, "no probe available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDecision {
    pub region: Region,
    pub reason: Reason,
}

/// Host facts consulted before any network probe.
pub trait SignalSource {
    fn timezone(&self) -> Option<String>;
    fn locale(&self) -> Option<String>;
}

/// Reads `$TZ`, `/etc/timezone`, `/etc/localtime` and the locale variables.
#[derive(Debug, Clone)]
pub struct HostSignals {
    etc_dir: PathBuf,
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::with_etc_dir("/etc")
    }
}

impl HostSignals {
    pub fn with_etc_dir(etc_dir: impl Into<PathBuf>) -> Self {
        Self {
            etc_dir: etc_dir.into(),
        }
    }
}

impl SignalSource for HostSignals {
    fn timezone(&self) -> Option<String> {
        if let Some(tz) = non_empty(env::var("TZ").ok()) {
            return Some(tz.trim_start_matches(':').to_string());
        }

        if let Some(tz) = non_empty(fs::read_to_string(self.etc_dir.join("timezone")).ok()) {
            return Some(tz);
        }

        fs::read_link(self.etc_dir.join("localtime"))
            .ok()
            .and_then(|target| zone_from_localtime_target(&target))
    }

    fn locale(&self) -> Option<String> {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .find_map(|key| non_empty(env::var(key).ok()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `/usr/share/zoneinfo/Asia/Shanghai` -> `Asia/Shanghai`
pub fn zone_from_localtime_target(target: &Path) -> Option<String> {
    let text = target.to_string_lossy();
    text.split_once("zoneinfo/")
        .map(|(_, zone)| zone.to_string())
        .filter(|zone| !zone.is_empty())
}

/// Classify from timezone and locale alone. `None` means inconclusive.
pub fn classify_signals(timezone: Option<&str>, locale: Option<&str>) -> Option<RegionDecision> {
    if let Some(tz) = timezone {
        if RESTRICTED_TIMEZONES.contains(&tz) {
            return Some(RegionDecision {
                region: Region::Mirror,
                reason: Reason::Timezone(tz.to_string()),
            });
        }
    }

    if let Some(locale) = locale {
        if locale.contains(RESTRICTED_LOCALE_MARKER) {
            return Some(RegionDecision {
                region: Region::Mirror,
                reason: Reason::Locale(locale.to_string()),
            });
        }
    }

    None
}

/// Classify from a reachability probe of the primary endpoint.
pub fn classify_probe(outcome: ProbeOutcome) -> RegionDecision {
    let region = match outcome {
        ProbeOutcome::Unreachable => Region::Mirror,
        ProbeOutcome::Reachable | ProbeOutcome::Unavailable => Region::Global,
    };
    RegionDecision {
        region,
        reason: Reason::Probe(outcome),
    }
}

/// Decides the region once and caches it for the resolver's lifetime.
pub struct RegionResolver<'a> {
    preference: RegionPreference,
    signals: &'a dyn SignalSource,
    transport: &'a dyn Transport,
    probe_url: String,
    probe_timeout: Duration,
    decision: OnceCell<RegionDecision>,
}

impl<'a> RegionResolver<'a> {
    pub fn new(
        preference: RegionPreference,
        signals: &'a dyn SignalSource,
        transport: &'a dyn Transport,
        probe_url: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            preference,
            signals,
            transport,
            probe_url: probe_url.into(),
            probe_timeout,
            decision: OnceCell::new(),
        }
    }

    pub fn resolve(&self) -> Region {
        self.decision().region
    }

    pub fn decision(&self) -> &RegionDecision {
        self.decision.get_or_init(|| {
            let decision = self.decide();
            tracing::info!(region = %decision.region, reason = %decision.reason, "region selected");
            decision
        })
    }

    fn decide(&self) -> RegionDecision {
        if let Some(region) = self.preference.forced() {
            return RegionDecision {
                region,
                reason: Reason::Preference,
            };
        }

        let timezone = self.signals.timezone();
        let locale = self.signals.locale();
        tracing::debug!(?timezone, ?locale, "region signals");

        classify_signals(timezone.as_deref(), locale.as_deref()).unwrap_or_else(|| {
            classify_probe(self.transport.probe(&self.probe_url, self.probe_timeout))
        })
    }
}

/// A tool's endpoint sets with the selected one fixed for the run.
#[derive(Debug, Clone)]
pub struct RegionProfile<E> {
    primary: E,
    mirror: E,
    selected: Region,
}

impl<E> RegionProfile<E> {
    pub fn new(primary: E, mirror: E, selected: Region) -> Self {
        Self {
            primary,
            mirror,
            selected,
        }
    }

    pub fn region(&self) -> Region {
        self.selected
    }

    pub fn selected(&self) -> &E {
        match self.selected {
            Region::Global => &self.primary,
            Region::Mirror => &self.mirror,
        }
    }
}
