//! Record builders and a fixed clock

use chrono::{DateTime, Duration, TimeZone, Utc};
use scanward_core::model::format_timestamp;
use scanward_core::{HostSnapshot, JobDefinition};

/// The "now" every harness run uses
pub fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    clock() - Duration::days(days)
}

/// `days_ago` in persisted text form
pub fn stamp_days_ago(days: i64) -> String {
    format_timestamp(&days_ago(days))
}

pub fn snapshot(ip: &str, mac: &str) -> HostSnapshot {
    let mut snapshot = HostSnapshot::new(ip);
    snapshot.mac = Some(mac.into());
    snapshot
}

pub fn job(ip: &str, mac: &str) -> JobDefinition {
    JobDefinition {
        ip: Some(ip.into()),
        mac: Some(mac.into()),
        ..Default::default()
    }
}

pub fn job_with_comment(ip: &str, mac: &str, comment: &str) -> JobDefinition {
    JobDefinition {
        comment: Some(comment.into()),
        ..job(ip, mac)
    }
}
