//! Host data model
//!
//! `HostRecord` is the live, per-run view of one host; `HostSnapshot` is the
//! subset that survives between runs. Transient fields (running state, engine
//! object references, sort hint) are rediscovered from the scanner every run
//! and never reach the snapshot.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Text format used for persisted timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted value standing for an unset severity
pub const UNSET_SEVERITY: f64 = -1.0;

/// Sentinel timestamp meaning "never"
pub fn never() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Uppercased, trimmed hardware id used for every comparison
pub fn canonical_hardware_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Parse a persisted timestamp, ignoring anything after the seconds field
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let head = raw.get(..19).unwrap_or(raw);
    let naive = NaiveDateTime::parse_from_str(head, TIMESTAMP_FORMAT)?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub fn format_timestamp(stamp: &DateTime<Utc>) -> String {
    stamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Accumulated risk score of a host
///
/// `Unset` is distinct from a score of zero: a host with no qualifying
/// results since its last report has no score at all.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Severity {
    #[default]
    Unset,
    Score(f64),
}

impl Severity {
    /// Add one finding's severity; an unset score starts from zero
    pub fn accumulate(&mut self, value: f64) {
        let base = self.value().unwrap_or(0.0);
        *self = Severity::Score(base + value);
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Severity::Unset => None,
            Severity::Score(v) => Some(*v),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Severity::Unset)
    }

    fn persisted(&self) -> f64 {
        self.value().unwrap_or(UNSET_SEVERITY)
    }
}

/// Live record of one host for the duration of a run
#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    address: String,
    pub hardware_id: Option<String>,
    /// Hardware id reported by discovery that disagrees with `hardware_id`
    pub pending_hardware_id: Option<String>,
    pub comment: String,
    pub severity: Severity,
    pub result_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub last_report_at: DateTime<Utc>,
    pub pinned: bool,
    pub skip: bool,
    pub running: bool,
    pub target_ref: Option<String>,
    pub task_ref: Option<String>,
    pub report_ref: Option<String>,
    /// 0 when an attempt is newer than the last report and nothing runs
    pub sort_priority: u8,
}

impl HostRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hardware_id: None,
            pending_hardware_id: None,
            comment: String::new(),
            severity: Severity::Unset,
            result_link: None,
            created_at: never(),
            last_attempt_at: never(),
            last_report_at: never(),
            pinned: false,
            skip: false,
            running: false,
            target_ref: None,
            task_ref: None,
            report_ref: None,
            sort_priority: 1,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Pinned and not skipped: provisioned and eligible for scheduling
    pub fn is_candidate(&self) -> bool {
        self.pinned && !self.skip
    }

    /// Hardware id for log lines, `-` while unknown
    pub fn label(&self) -> &str {
        self.hardware_id.as_deref().unwrap_or("-")
    }

    /// Store a hardware id unless one is already known. Returns true if stored.
    pub fn learn_hardware_id(&mut self, raw: &str) -> bool {
        if self.hardware_id.is_some() {
            return false;
        }
        self.hardware_id = Some(canonical_hardware_id(raw));
        true
    }

    pub fn link_if_unset(&mut self, link: String) {
        if self.result_link.is_none() {
            self.result_link = Some(link);
        }
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            ip: self.address.clone(),
            mac: self.hardware_id.clone(),
            comment: self.comment.clone(),
            severity: self.severity.persisted(),
            link: self.result_link.clone(),
            created: Some(format_timestamp(&self.created_at)),
            last_attempt: Some(format_timestamp(&self.last_attempt_at)),
            last_report: Some(format_timestamp(&self.last_report_at)),
            skip: self.skip,
        }
    }
}

/// Persisted subset of a host record
///
/// Timestamps stay textual here; they are parsed during history import so a
/// single bad value only drops its own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "unset_severity")]
    pub severity: f64,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_attempt: Option<String>,
    #[serde(default)]
    pub last_report: Option<String>,
    #[serde(default)]
    pub skip: bool,
}

fn unset_severity() -> f64 {
    UNSET_SEVERITY
}

impl HostSnapshot {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            mac: None,
            comment: String::new(),
            severity: UNSET_SEVERITY,
            link: None,
            created: None,
            last_attempt: None,
            last_report: None,
            skip: false,
        }
    }
}
