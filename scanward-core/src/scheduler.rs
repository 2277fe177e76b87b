//! Provisioning of scanner objects and launching of the next scan
//!
//! Per host and run: `Idle -> AttemptStamped -> (VerifiedRunning | Aborted |
//! ConflictSkipped | StartRejected)`. At most one task is started per run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::gateway::{DiscoveryGateway, ScannerError, ScannerGateway};
use crate::links::ResultLinks;
use crate::model::canonical_hardware_id;
use crate::registry::HostRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Scheduling stops once more than this many tasks are running
    pub run_limit: usize,
    pub port_list_id: String,
    pub scan_config_id: String,
    pub verify_hardware: bool,
    /// Wait between a start request and the confirmation query
    pub settle_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            run_limit: 3,
            port_list_id: String::new(),
            scan_config_id: String::new(),
            verify_hardware: false,
            settle_interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub targets_created: usize,
    pub tasks_created: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started { address: String },
    RunLimitReached { running: usize },
    NoneStarted { attempted: usize },
}

/// Result of one start attempt for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    AlreadyRunning,
    ConflictSkipped,
    StartRejected,
    Aborted,
    VerifiedRunning,
}

pub struct ScanScheduler<'a, S, D> {
    scanner: &'a S,
    discovery: &'a D,
    links: &'a ResultLinks,
    settings: &'a SchedulerSettings,
}

impl<'a, S: ScannerGateway, D: DiscoveryGateway> ScanScheduler<'a, S, D> {
    pub fn new(
        scanner: &'a S,
        discovery: &'a D,
        links: &'a ResultLinks,
        settings: &'a SchedulerSettings,
    ) -> Self {
        Self {
            scanner,
            discovery,
            links,
            settings,
        }
    }

    /// Create missing targets, then missing tasks, for every candidate.
    /// Rejections leave the host incomplete for the next run.
    pub async fn provision(&self, registry: &mut HostRegistry) -> Result<ProvisionReport, ScannerError> {
        let mut report = ProvisionReport::default();
        if self.settings.port_list_id.is_empty() || self.settings.scan_config_id.is_empty() {
            warn!("port list or scan config not configured, skipping provisioning");
            return Ok(report);
        }

        for address in registry.addresses() {
            let Some(record) = registry.get(&address) else {
                continue;
            };
            if !record.is_candidate() {
                continue;
            }
            let Some(hardware_id) = record.hardware_id.clone() else {
                warn!(address = %address, "no hardware id known, cannot provision");
                continue;
            };
            let comment = record.comment.clone();

            if record.target_ref.is_none() {
                match self
                    .scanner
                    .create_target(&address, &hardware_id, &self.settings.port_list_id, &comment)
                    .await
                {
                    Ok(target) => {
                        info!(address = %address, target = %target, "created target");
                        if let Some(record) = registry.get_mut(&address) {
                            record.link_if_unset(self.links.target(&target));
                            record.target_ref = Some(target);
                        }
                        report.targets_created += 1;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(address = %address, "target creation failed: {}", e);
                        report.failures += 1;
                        continue;
                    }
                }
            }

            let Some(record) = registry.get(&address) else {
                continue;
            };
            let (Some(target), None) = (record.target_ref.clone(), record.task_ref.as_ref()) else {
                continue;
            };
            match self
                .scanner
                .create_task(
                    &address,
                    &hardware_id,
                    &target,
                    &self.settings.scan_config_id,
                    &comment,
                )
                .await
            {
                Ok(task) => {
                    info!(address = %address, task = %task, "created task");
                    if let Some(record) = registry.get_mut(&address) {
                        record.link_if_unset(self.links.task(&task));
                        record.task_ref = Some(task);
                    }
                    report.tasks_created += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(address = %address, "task creation failed: {}", e);
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Start one task, trying candidates from the least recently attempted
    pub async fn run_next(
        &self,
        registry: &mut HostRegistry,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, ScannerError> {
        let running = registry.running_count();
        if running > self.settings.run_limit {
            info!(running, limit = self.settings.run_limit, "run limit reached, not starting a task");
            return Ok(RunOutcome::RunLimitReached { running });
        }

        let mut candidates: Vec<_> = registry
            .all()
            .filter(|r| r.is_candidate())
            .map(|r| (r.last_attempt_at, r.sort_priority, r.address().to_string()))
            .collect();
        candidates.sort_by_key(|(attempt, priority, _)| (*attempt, *priority));

        let mut attempted = 0;
        for (_, _, address) in candidates {
            match self.attempt(registry, &address, now).await? {
                AttemptState::AlreadyRunning => continue,
                AttemptState::VerifiedRunning => {
                    info!(address = %address, "task started");
                    return Ok(RunOutcome::Started { address });
                }
                _ => attempted += 1,
            }
        }

        error!(attempted, "could not start any task this run");
        Ok(RunOutcome::NoneStarted { attempted })
    }

    /// Stamp, verify, start and confirm one host
    pub async fn attempt(
        &self,
        registry: &mut HostRegistry,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptState, ScannerError> {
        let Some(record) = registry.get_mut(address) else {
            return Ok(AttemptState::StartRejected);
        };
        if record.running {
            return Ok(AttemptState::AlreadyRunning);
        }
        record.last_attempt_at = now;
        let recorded = record.hardware_id.clone();
        let task = record.task_ref.clone();
        debug!(address, hardware_id = record.label(), "attempting scan");

        if self.settings.verify_hardware {
            if let (Some(live), Some(recorded)) =
                (self.discovery.resolve_hardware_id(address).await, recorded)
            {
                let live = canonical_hardware_id(&live);
                if live != recorded {
                    warn!(address, recorded = %recorded, live = %live, "hardware id conflict, skipping host");
                    return Ok(AttemptState::ConflictSkipped);
                }
            }
        }

        let Some(task) = task else {
            warn!(address, "no task provisioned, cannot start");
            return Ok(AttemptState::StartRejected);
        };
        match self.scanner.start_task(&task).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(address, task = %task, "start request failed: {}", e);
                return Ok(AttemptState::StartRejected);
            }
        }

        if !self.settings.settle_interval.is_zero() {
            debug!(address, wait = ?self.settings.settle_interval, "waiting before confirming start");
            tokio::time::sleep(self.settings.settle_interval).await;
        }

        let confirmed = self
            .scanner
            .list_tasks()
            .await?
            .iter()
            .any(|t| t.address == address && t.running);
        if !confirmed {
            warn!(address, task = %task, "task aborted right after start");
            return Ok(AttemptState::Aborted);
        }

        if let Some(record) = registry.get_mut(address) {
            record.running = true;
            record.pinned = true;
        }
        Ok(AttemptState::VerifiedRunning)
    }
}
