//! Folding history, job definitions, discovery and scanner state into the
//! registry
//!
//! Passes run in a fixed order: history, jobs, discovery, then the four
//! scanner streams (reports, tasks, targets, results), then sort priority.
//! History goes first so persisted hardware ids win over fresh observations.
//! Re-applying the scanner passes with the same input leaves the registry
//! unchanged.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::gateway::{
    DiscoveredHost, ReportEntry, ResultEntry, ScannerError, ScannerGateway, TargetEntry,
    TaskEntry,
};
use crate::jobs::JobDefinition;
use crate::links::ResultLinks;
use crate::model::{canonical_hardware_id, parse_timestamp, HostRecord, HostSnapshot, Severity};
use crate::registry::HostRegistry;

pub struct StateMerger<'a> {
    registry: &'a mut HostRegistry,
    links: &'a ResultLinks,
    now: DateTime<Utc>,
}

impl<'a> StateMerger<'a> {
    pub fn new(registry: &'a mut HostRegistry, links: &'a ResultLinks, now: DateTime<Utc>) -> Self {
        Self {
            registry,
            links,
            now,
        }
    }

    fn register(&mut self, address: &str) -> &mut HostRecord {
        let now = self.now;
        let (record, created) = self.registry.get_or_create(address);
        if created {
            record.created_at = now;
        }
        record
    }

    /// Overlay persisted snapshots. Returns how many were imported.
    pub fn import_history(&mut self, snapshots: &[HostSnapshot]) -> usize {
        let mut imported = 0;
        for snapshot in snapshots {
            if snapshot.ip.trim().is_empty() {
                warn!("skipping saved host without an address");
                continue;
            }
            let stamps = match parse_saved_stamps(snapshot) {
                Ok(stamps) => stamps,
                Err(e) => {
                    warn!(address = %snapshot.ip, "skipping saved host: {}", e);
                    continue;
                }
            };

            let record = self.register(&snapshot.ip);
            if let Some(mac) = snapshot.mac.as_deref().filter(|m| !m.trim().is_empty()) {
                record.hardware_id = Some(canonical_hardware_id(mac));
            }
            record.comment = snapshot.comment.clone();
            record.skip = snapshot.skip;
            let [created, attempt, report] = stamps;
            if let Some(created) = created {
                record.created_at = created;
            }
            if let Some(attempt) = attempt {
                record.last_attempt_at = attempt;
            }
            if let Some(report) = report {
                record.last_report_at = report;
            }
            imported += 1;
        }
        debug!(imported, "history imported");
        imported
    }

    /// Apply static job definitions. Jobs lacking an address or hardware id
    /// are rejected without touching the registry. Returns how many applied.
    pub fn import_jobs(&mut self, jobs: &[JobDefinition]) -> usize {
        let mut applied = 0;
        for job in jobs {
            let (Some(ip), Some(mac)) = (non_empty(&job.ip), non_empty(&job.mac)) else {
                warn!(source = %job.source.display(), "rejected job without ip and mac");
                continue;
            };

            let record = self.register(ip);
            record.pinned = true;
            record.learn_hardware_id(mac);
            record.skip = job.skip.unwrap_or(false);
            record.comment = job.comment.clone().unwrap_or_default();
            applied += 1;
        }
        debug!(applied, "jobs imported");
        applied
    }

    /// Apply a discovery sweep. Hardware-id disagreements are recorded as
    /// `pending_hardware_id` and left for an operator.
    pub fn import_discovery(&mut self, hosts: &[DiscoveredHost]) {
        for host in hosts {
            let record = self.register(&host.address);
            record.pinned = true;
            if record.comment.is_empty() {
                record.comment = host.label.clone();
            }
            if record.learn_hardware_id(&host.hardware_id) {
                continue;
            }
            let seen = canonical_hardware_id(&host.hardware_id);
            if record.hardware_id.as_deref() != Some(seen.as_str()) {
                warn!(
                    address = %host.address,
                    known = record.label(),
                    seen = %seen,
                    "hardware id conflict, not updating"
                );
                record.pending_hardware_id = Some(seen);
            }
        }
        info!(count = hosts.len(), "discovery imported");
    }

    /// Pull the four scanner streams and fold them in, then derive sort
    /// priority. Any list failure aborts the reconciliation.
    pub async fn reconcile<S: ScannerGateway>(&mut self, scanner: &S) -> Result<(), ScannerError> {
        self.clear_scanner_state();

        let reports = scanner.list_reports().await?;
        self.apply_reports(&reports);

        let tasks = scanner.list_tasks().await?;
        self.apply_tasks(&tasks);

        let targets = scanner.list_targets().await?;
        self.apply_targets(&targets);

        let results = scanner.list_results().await?;
        self.apply_results(&results);

        self.derive_sort_priority();
        info!(
            reports = reports.len(),
            tasks = tasks.len(),
            targets = targets.len(),
            results = results.len(),
            "scanner state reconciled"
        );
        Ok(())
    }

    /// Forget everything the scanner streams derive, so they start from the
    /// same state on every pass
    fn clear_scanner_state(&mut self) {
        for record in self.registry.all_mut() {
            record.report_ref = None;
            record.task_ref = None;
            record.target_ref = None;
            record.running = false;
            record.result_link = None;
        }
    }

    /// Keep the oldest timestamp of a stable report, the newest when the
    /// report changes.
    pub fn apply_reports(&mut self, reports: &[ReportEntry]) {
        for entry in reports {
            let link = self.links.report(&entry.report);
            let record = self.register(&entry.address);
            let accept = match record.report_ref.as_deref() {
                None => true,
                Some(current) if current == entry.report => entry.timestamp < record.last_report_at,
                Some(_) => entry.timestamp > record.last_report_at,
            };
            if accept {
                record.report_ref = Some(entry.report.clone());
                record.last_report_at = entry.timestamp;
                record.link_if_unset(link);
            }
        }
    }

    pub fn apply_tasks(&mut self, tasks: &[TaskEntry]) {
        for entry in tasks {
            let link = self.links.task(&entry.task);
            let record = self.register(&entry.address);
            record.hardware_id = Some(canonical_hardware_id(&entry.hardware_id));
            record.task_ref = Some(entry.task.clone());
            record.running = entry.running;
            if entry.running {
                record.pinned = true;
            }
            record.link_if_unset(link);
        }
    }

    pub fn apply_targets(&mut self, targets: &[TargetEntry]) {
        for entry in targets {
            let link = self.links.target(&entry.target);
            let record = self.register(&entry.address);
            record.target_ref = Some(entry.target.clone());
            record.link_if_unset(link);
        }
    }

    /// Severity is recomputed from scratch: every score is reset, then
    /// results at or after the host's last report are summed.
    pub fn apply_results(&mut self, results: &[ResultEntry]) {
        for record in self.registry.all_mut() {
            record.severity = Severity::Unset;
        }
        for entry in results {
            let record = self.register(&entry.address);
            if entry.timestamp >= record.last_report_at {
                record.severity.accumulate(entry.severity);
            }
        }
    }

    pub fn derive_sort_priority(&mut self) {
        for record in self.registry.all_mut() {
            record.sort_priority =
                if !record.running && record.last_attempt_at > record.last_report_at {
                    0
                } else {
                    1
                };
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

type SavedStamps = [Option<DateTime<Utc>>; 3];

fn parse_saved_stamps(snapshot: &HostSnapshot) -> Result<SavedStamps, String> {
    let parse = |name: &str, raw: &Option<String>| -> Result<Option<DateTime<Utc>>, String> {
        match raw.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            None => Ok(None),
            Some(raw) => parse_timestamp(raw)
                .map(Some)
                .map_err(|e| format!("bad {} timestamp {:?}: {}", name, raw, e)),
        }
    };
    Ok([
        parse("created", &snapshot.created)?,
        parse("last_attempt", &snapshot.last_attempt)?,
        parse("last_report", &snapshot.last_report)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::never;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn job(ip: Option<&str>, mac: Option<&str>, comment: Option<&str>) -> JobDefinition {
        JobDefinition {
            ip: ip.map(String::from),
            mac: mac.map(String::from),
            comment: comment.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_history_overlay_and_bad_timestamp() {
        let mut registry = HostRegistry::new();
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());

        let mut good = HostSnapshot::new("10.0.0.5");
        good.mac = Some("aa:bb:cc:dd:ee:ff".into());
        good.last_report = Some("2024-05-01 08:00:00".into());
        good.severity = 9.0;
        good.link = Some("https://old".into());
        let mut bad = HostSnapshot::new("10.0.0.6");
        bad.last_attempt = Some("not a date".into());

        assert_eq!(merger.import_history(&[good, bad]), 1);
        let record = registry.get("10.0.0.5").unwrap();
        assert_eq!(record.hardware_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(record.last_report_at, Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        assert_eq!(record.last_attempt_at, never());
        assert!(record.severity.is_unset());
        assert!(record.result_link.is_none());
        assert!(registry.get("10.0.0.6").is_none());
    }

    #[test]
    fn test_new_records_are_stamped_with_run_clock() {
        let mut registry = HostRegistry::new();
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        merger.import_jobs(&[job(Some("10.0.0.9"), Some("aa:aa:aa:aa:aa:aa"), None)]);
        assert_eq!(registry.get("10.0.0.9").unwrap().created_at, now());
    }

    #[test]
    fn test_job_rules() {
        let mut registry = HostRegistry::new();
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        let mut skipped = job(Some("10.0.0.5"), Some("11:22:33:44:55:66"), Some("second"));
        skipped.skip = Some(true);

        let applied = merger.import_jobs(&[
            job(Some("10.0.0.5"), Some("aa:bb:cc:dd:ee:ff"), Some("first")),
            job(None, Some("aa:bb:cc:dd:ee:ff"), None),
            job(Some("10.0.0.7"), None, None),
            skipped,
        ]);

        assert_eq!(applied, 2);
        assert_eq!(registry.len(), 1);
        let record = registry.get("10.0.0.5").unwrap();
        assert!(record.pinned);
        assert!(record.skip);
        assert_eq!(record.comment, "second");
        assert_eq!(record.hardware_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_discovery_keeps_comment_and_flags_conflict() {
        let mut registry = HostRegistry::new();
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        merger.import_jobs(&[job(Some("10.0.0.5"), Some("AA:BB:CC:DD:EE:FF"), Some("nas"))]);
        merger.import_discovery(&[
            DiscoveredHost {
                address: "10.0.0.5".into(),
                hardware_id: "11:22:33:44:55:66".into(),
                label: "Vendor".into(),
            },
            DiscoveredHost {
                address: "10.0.0.8".into(),
                hardware_id: "aa:aa:aa:aa:aa:aa".into(),
                label: "Printer Co".into(),
            },
        ]);

        let known = registry.get("10.0.0.5").unwrap();
        assert_eq!(known.comment, "nas");
        assert_eq!(known.hardware_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(known.pending_hardware_id.as_deref(), Some("11:22:33:44:55:66"));

        let fresh = registry.get("10.0.0.8").unwrap();
        assert!(fresh.pinned);
        assert_eq!(fresh.comment, "Printer Co");
        assert!(fresh.pending_hardware_id.is_none());
    }

    #[test]
    fn test_report_tie_break() {
        let t1 = now() - Duration::days(10);
        let entry = |report: &str, timestamp| ReportEntry {
            address: "10.0.0.5".into(),
            report: report.into(),
            timestamp,
        };
        let mut registry = HostRegistry::new();
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        merger.apply_reports(&[entry("r1", t1)]);

        merger.apply_reports(&[entry("r1", t1 + Duration::days(1))]);
        assert_eq!(merger.registry.get("10.0.0.5").unwrap().last_report_at, t1);

        merger.apply_reports(&[entry("r2", t1 - Duration::days(1))]);
        assert_eq!(merger.registry.get("10.0.0.5").unwrap().report_ref.as_deref(), Some("r1"));

        merger.apply_reports(&[entry("r1", t1 - Duration::days(2))]);
        assert_eq!(merger.registry.get("10.0.0.5").unwrap().last_report_at, t1 - Duration::days(2));

        merger.apply_reports(&[entry("r2", t1 + Duration::days(3))]);
        let record = registry.get("10.0.0.5").unwrap();
        assert_eq!(record.report_ref.as_deref(), Some("r2"));
        assert_eq!(record.last_report_at, t1 + Duration::days(3));
        assert!(record.result_link.as_deref().unwrap().ends_with("report_id=r1"));
    }

    #[test]
    fn test_results_only_count_after_last_report() {
        let report_at = now() - Duration::days(5);
        let mut registry = HostRegistry::new();
        registry.get_or_create("10.0.0.5").0.last_report_at = report_at;
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        let result = |severity, timestamp| ResultEntry {
            address: "10.0.0.5".into(),
            severity,
            timestamp,
        };

        merger.apply_results(&[
            result(5.0, report_at),
            result(2.5, report_at + Duration::hours(1)),
            result(9.0, report_at - Duration::seconds(1)),
        ]);
        assert_eq!(registry.get("10.0.0.5").unwrap().severity.value(), Some(7.5));
    }

    #[test]
    fn test_running_task_pins_host_and_sort_priority() {
        let mut registry = HostRegistry::new();
        {
            let (stalled, _) = registry.get_or_create("10.0.0.2");
            stalled.last_attempt_at = now() - Duration::days(1);
            stalled.last_report_at = now() - Duration::days(3);
        }
        let links = ResultLinks::default();
        let mut merger = StateMerger::new(&mut registry, &links, now());
        merger.apply_tasks(&[TaskEntry {
            address: "10.0.0.1".into(),
            hardware_id: "aa:bb:cc:dd:ee:ff".into(),
            task: "task-1".into(),
            running: true,
        }]);
        merger.derive_sort_priority();

        let running = registry.get("10.0.0.1").unwrap();
        assert!(running.pinned && running.running);
        assert_eq!(running.hardware_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(running.sort_priority, 1);
        assert_eq!(registry.get("10.0.0.2").unwrap().sort_priority, 0);
    }
}
