/*!
Test harness for full runs

Wires the fakes into an `Engine` with provisioning profiles set, a zero
settling interval and the fixed clock from `fixtures`.
*/

use std::time::Duration;

use scanward_core::{
    CycleOptions, CycleReport, Engine, EngineError, JobDefinition, ResultLinks, RetentionPolicy,
    SchedulerSettings,
};

use crate::fakes::{FakeDiscovery, FakeScanner, MemoryStore};
use crate::fixtures::clock;

pub const PORT_LIST: &str = "port-list-all-tcp";
pub const SCAN_CONFIG: &str = "scan-config-full";

/// Install a test-writer subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct CycleHarness {
    pub scanner: FakeScanner,
    pub discovery: FakeDiscovery,
    pub store: MemoryStore,
    pub settings: SchedulerSettings,
    pub retention: RetentionPolicy,
    pub links: ResultLinks,
}

impl CycleHarness {
    pub fn new(scanner: FakeScanner, discovery: FakeDiscovery, store: MemoryStore) -> Self {
        init_tracing();
        Self {
            scanner,
            discovery,
            store,
            settings: default_settings(),
            retention: RetentionPolicy::default(),
            links: ResultLinks::new("scanner.test", 9392),
        }
    }

    pub fn with_settings(mut self, update: impl FnOnce(&mut SchedulerSettings)) -> Self {
        update(&mut self.settings);
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = RetentionPolicy::new(days);
        self
    }

    pub async fn run(
        &self,
        jobs: &[JobDefinition],
        options: &CycleOptions,
    ) -> Result<CycleReport, EngineError> {
        Engine::new(&self.scanner, &self.discovery, &self.store)
            .with_links(self.links.clone())
            .with_settings(self.settings.clone())
            .with_retention(self.retention)
            .run_cycle(jobs, options, clock())
            .await
    }

    /// Run with scanning requested and no discovery
    pub async fn run_scan(&self, jobs: &[JobDefinition]) -> Result<CycleReport, EngineError> {
        let options = CycleOptions {
            subnet: None,
            run_scan: true,
        };
        self.run(jobs, &options).await
    }
}

pub fn default_settings() -> SchedulerSettings {
    SchedulerSettings {
        run_limit: 3,
        port_list_id: PORT_LIST.into(),
        scan_config_id: SCAN_CONFIG.into(),
        verify_hardware: false,
        settle_interval: Duration::ZERO,
    }
}
