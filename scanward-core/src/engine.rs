//! One complete run
//!
//! load history -> jobs -> discovery -> reconcile -> provision -> (start one
//! scan) -> retention -> save. Only fatal scanner errors and an unreadable
//! snapshot end the run early; a failed save is logged and reported.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::EngineError;
use crate::gateway::{DiscoveryGateway, ScannerGateway};
use crate::jobs::JobDefinition;
use crate::links::ResultLinks;
use crate::merge::StateMerger;
use crate::registry::HostRegistry;
use crate::retention::{RetentionPolicy, RetentionReport};
use crate::scheduler::{ProvisionReport, RunOutcome, ScanScheduler, SchedulerSettings};
use crate::store::{SnapshotSortKey, SnapshotStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Subnet to sweep before reconciling
    pub subnet: Option<String>,
    /// Try to start one scan
    pub run_scan: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub history_loaded: usize,
    pub jobs_applied: usize,
    pub discovered: usize,
    pub provision: ProvisionReport,
    pub outcome: Option<RunOutcome>,
    pub retention: RetentionReport,
    pub running: usize,
    pub saved: bool,
    pub registry: HostRegistry,
}

impl CycleReport {
    pub fn started(&self) -> Option<&str> {
        match &self.outcome {
            Some(RunOutcome::Started { address }) => Some(address),
            _ => None,
        }
    }
}

pub struct Engine<'a, S, D, P> {
    scanner: &'a S,
    discovery: &'a D,
    store: &'a P,
    links: ResultLinks,
    settings: SchedulerSettings,
    retention: RetentionPolicy,
    sort_key: SnapshotSortKey,
}

impl<'a, S, D, P> Engine<'a, S, D, P>
where
    S: ScannerGateway,
    D: DiscoveryGateway,
    P: SnapshotStore,
{
    pub fn new(scanner: &'a S, discovery: &'a D, store: &'a P) -> Self {
        Self {
            scanner,
            discovery,
            store,
            links: ResultLinks::default(),
            settings: SchedulerSettings::default(),
            retention: RetentionPolicy::default(),
            sort_key: SnapshotSortKey::default(),
        }
    }

    pub fn with_links(mut self, links: ResultLinks) -> Self {
        self.links = links;
        self
    }

    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sort_key(mut self, sort_key: SnapshotSortKey) -> Self {
        self.sort_key = sort_key;
        self
    }

    /// Execute one run with a single clock reading `now`
    pub async fn run_cycle(
        &self,
        jobs: &[JobDefinition],
        options: &CycleOptions,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, EngineError> {
        let mut registry = HostRegistry::new();
        let history = self.store.load()?.unwrap_or_default();

        let discovered = match options.subnet.as_deref() {
            Some(subnet) => {
                info!(subnet, "sweeping subnet");
                self.discovery.sweep(subnet).await
            }
            None => Vec::new(),
        };

        let mut merger = StateMerger::new(&mut registry, &self.links, now);
        let history_loaded = merger.import_history(&history);
        let jobs_applied = merger.import_jobs(jobs);
        if options.subnet.is_some() {
            merger.import_discovery(&discovered);
        }
        merger.reconcile(self.scanner).await?;

        let scheduler = ScanScheduler::new(self.scanner, self.discovery, &self.links, &self.settings);
        let provision = scheduler.provision(&mut registry).await?;
        info!(
            targets = provision.targets_created,
            tasks = provision.tasks_created,
            failures = provision.failures,
            "provisioning done"
        );

        let outcome = if options.run_scan {
            Some(scheduler.run_next(&mut registry, now).await?)
        } else {
            None
        };

        let retention = self.retention.apply(&mut registry, self.scanner, now).await?;

        let saved = match self.store.save(registry.snapshots(), self.sort_key) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to save hosts: {}", e);
                false
            }
        };

        let running = registry.running_count();
        info!(running, hosts = registry.len(), "run complete");

        Ok(CycleReport {
            history_loaded,
            jobs_applied,
            discovered: discovered.len(),
            provision,
            outcome,
            retention,
            running,
            saved,
            registry,
        })
    }
}
