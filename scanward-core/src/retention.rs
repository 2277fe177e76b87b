//! Removal of stale hosts
//!
//! A host is given up on when it has produced no report for longer than the
//! threshold although it was attempted within the threshold. Running and
//! pinned hosts are never removed.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::gateway::{ObjectKind, ScannerError, ScannerGateway};
use crate::model::HostRecord;
use crate::registry::HostRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub threshold_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { threshold_days: 31 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub removed: Vec<String>,
    /// Engine objects that could not be deleted and need manual cleanup
    pub deletion_failures: usize,
}

impl RetentionPolicy {
    pub fn new(threshold_days: i64) -> Self {
        Self { threshold_days }
    }

    pub fn qualifies(&self, record: &HostRecord, now: DateTime<Utc>) -> bool {
        if record.running || record.pinned {
            return false;
        }
        let since_report = (now - record.last_report_at).num_days();
        let since_attempt = (now - record.last_attempt_at).num_days();
        since_report > self.threshold_days && since_attempt < self.threshold_days
    }

    /// Remove every qualifying host, deleting its task and target first.
    /// Rejected deletions are logged and the host is removed anyway.
    pub async fn apply<S: ScannerGateway>(
        &self,
        registry: &mut HostRegistry,
        scanner: &S,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, ScannerError> {
        let mut report = RetentionReport::default();
        let stale: Vec<HostRecord> = registry
            .all()
            .filter(|r| self.qualifies(r, now))
            .cloned()
            .collect();

        for record in stale {
            let address = record.address();
            let objects = [
                (ObjectKind::Task, record.task_ref.as_deref()),
                (ObjectKind::Target, record.target_ref.as_deref()),
            ];
            for (kind, id) in objects {
                let Some(id) = id else { continue };
                match scanner.delete(kind, id).await {
                    Ok(()) => info!(address, kind = %kind, id, "deleted scanner object"),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!(address, kind = %kind, id, "deletion failed, clean up manually: {}", e);
                        report.deletion_failures += 1;
                    }
                }
            }
            registry.remove(address);
            info!(address, "removed stale host");
            report.removed.push(address.to_string());
        }
        Ok(report)
    }
}
