//! Snapshot models and version labels

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::build::ArtifactRef;

const LABEL_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";

/// Timestamp-derived version label. Fixed width, so string order is time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionLabel(String);

impl VersionLabel {
    /// Label for an instant, truncated to microseconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(format!("{}Z", at.format(LABEL_FORMAT)))
    }

    /// Parse a raw label, rejecting anything `from_datetime` would not produce
    pub fn parse(raw: &str) -> Option<Self> {
        let naive = raw.strip_suffix('Z')?;
        NaiveDateTime::parse_from_str(naive, LABEL_FORMAT).ok()?;
        if raw.len() != "20000101T000000.000000Z".len() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    /// Instant the label was minted at
    pub fn timestamp(&self) -> DateTime<Utc> {
        let naive = self.0.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(naive, LABEL_FORMAT)
            .map(|dt| dt.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out strictly increasing labels, even if the wall clock stalls or steps back
#[derive(Debug, Default)]
pub struct LabelClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl LabelClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next label, strictly later than both `floor` and every label issued before
    pub fn next_after(&self, floor: DateTime<Utc>) -> VersionLabel {
        let tick = Duration::microseconds(1);
        let floor = floor.trunc_subsecs(6);

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidate = Utc::now().trunc_subsecs(6);
        if candidate <= floor {
            candidate = floor + tick;
        }
        if let Some(prev) = *last {
            if candidate <= prev {
                candidate = prev + tick;
            }
        }
        *last = Some(candidate);
        VersionLabel::from_datetime(candidate)
    }
}

/// A retained, restorable copy of a good deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project_id: String,

    pub version: VersionLabel,

    /// Where the snapshot manifest lives
    pub location: PathBuf,

    /// Artifact that was serving when the snapshot was taken
    pub artifact: ArtifactRef,

    pub port: u16,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
