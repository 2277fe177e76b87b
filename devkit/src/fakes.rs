/*!
In-memory gateways

`FakeScanner` behaves like a small scanning engine: created targets and
tasks show up in later list calls, started tasks report as running unless
told to abort. Every call is recorded for assertions.
*/

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scanward_core::{
    DiscoveredHost, DiscoveryGateway, HostSnapshot, ObjectKind, ReportEntry, ResultEntry,
    ScannerError, ScannerGateway, SnapshotSortKey, SnapshotStore, StoreError, TargetEntry,
    TaskEntry,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerCall {
    ListReports,
    ListTasks,
    ListTargets,
    ListResults,
    CreateTarget { address: String, port_list: String },
    CreateTask { address: String, target: String, scan_config: String },
    StartTask { task: String },
    Delete { kind: ObjectKind, id: String },
}

#[derive(Debug, Default)]
struct ScannerState {
    reports: Vec<ReportEntry>,
    tasks: Vec<TaskEntry>,
    targets: Vec<TargetEntry>,
    results: Vec<ResultEntry>,
    calls: Vec<ScannerCall>,
    next_id: usize,
    reject_create: HashSet<String>,
    reject_start: HashSet<String>,
    abort_on_start: HashSet<String>,
    reject_delete: HashSet<String>,
    unavailable: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeScanner {
    state: Mutex<ScannerState>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(self, address: &str, report: &str, timestamp: DateTime<Utc>) -> Self {
        self.state.lock().reports.push(ReportEntry {
            address: address.into(),
            report: report.into(),
            timestamp,
        });
        self
    }

    pub fn with_task(self, address: &str, hardware_id: &str, task: &str, running: bool) -> Self {
        self.state.lock().tasks.push(TaskEntry {
            address: address.into(),
            hardware_id: hardware_id.into(),
            task: task.into(),
            running,
        });
        self
    }

    pub fn with_target(self, address: &str, target: &str) -> Self {
        self.state.lock().targets.push(TargetEntry {
            address: address.into(),
            target: target.into(),
        });
        self
    }

    pub fn with_result(self, address: &str, severity: f64, timestamp: DateTime<Utc>) -> Self {
        self.state.lock().results.push(ResultEntry {
            address: address.into(),
            severity,
            timestamp,
        });
        self
    }

    /// Target and task creation for `address` is rejected
    pub fn reject_create(&self, address: &str) {
        self.state.lock().reject_create.insert(address.into());
    }

    pub fn reject_start(&self, task: &str) {
        self.state.lock().reject_start.insert(task.into());
    }

    /// Start is accepted but the task never reports as running
    pub fn abort_on_start(&self, task: &str) {
        self.state.lock().abort_on_start.insert(task.into());
    }

    pub fn reject_delete(&self, id: &str) {
        self.state.lock().reject_delete.insert(id.into());
    }

    /// Every following call fails with `TransportUnavailable`
    pub fn go_offline(&self, reason: &str) {
        self.state.lock().unavailable = Some(reason.into());
    }

    pub fn calls(&self) -> Vec<ScannerCall> {
        self.state.lock().calls.clone()
    }

    pub fn started_tasks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ScannerCall::StartTask { task } => Some(task),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<(ObjectKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ScannerCall::Delete { kind, id } => Some((kind, id)),
                _ => None,
            })
            .collect()
    }

    pub fn created_targets(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ScannerCall::CreateTarget { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    pub fn created_tasks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ScannerCall::CreateTask { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ScannerCall) -> Result<(), ScannerError> {
        debug!(?call, "fake scanner call");
        let mut state = self.state.lock();
        state.calls.push(call);
        match &state.unavailable {
            Some(reason) => Err(ScannerError::TransportUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

impl ScannerGateway for FakeScanner {
    async fn list_reports(&self) -> Result<Vec<ReportEntry>, ScannerError> {
        self.record(ScannerCall::ListReports)?;
        Ok(self.state.lock().reports.clone())
    }

    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, ScannerError> {
        self.record(ScannerCall::ListTasks)?;
        Ok(self.state.lock().tasks.clone())
    }

    async fn list_targets(&self) -> Result<Vec<TargetEntry>, ScannerError> {
        self.record(ScannerCall::ListTargets)?;
        Ok(self.state.lock().targets.clone())
    }

    async fn list_results(&self) -> Result<Vec<ResultEntry>, ScannerError> {
        self.record(ScannerCall::ListResults)?;
        Ok(self
            .state
            .lock()
            .results
            .iter()
            .filter(|r| r.severity > 0.0)
            .cloned()
            .collect())
    }

    async fn create_target(
        &self,
        address: &str,
        _hardware_id: &str,
        port_list: &str,
        _comment: &str,
    ) -> Result<String, ScannerError> {
        self.record(ScannerCall::CreateTarget {
            address: address.into(),
            port_list: port_list.into(),
        })?;
        if self.state.lock().reject_create.contains(address) {
            return Err(ScannerError::rejected("create_target", "target exists already"));
        }
        let target = self.next_id("target");
        self.state.lock().targets.push(TargetEntry {
            address: address.into(),
            target: target.clone(),
        });
        Ok(target)
    }

    async fn create_task(
        &self,
        address: &str,
        hardware_id: &str,
        target: &str,
        scan_config: &str,
        _comment: &str,
    ) -> Result<String, ScannerError> {
        self.record(ScannerCall::CreateTask {
            address: address.into(),
            target: target.into(),
            scan_config: scan_config.into(),
        })?;
        if self.state.lock().reject_create.contains(address) {
            return Err(ScannerError::rejected("create_task", "task exists already"));
        }
        let task = self.next_id("task");
        self.state.lock().tasks.push(TaskEntry {
            address: address.into(),
            hardware_id: hardware_id.into(),
            task: task.clone(),
            running: false,
        });
        Ok(task)
    }

    async fn start_task(&self, task: &str) -> Result<(), ScannerError> {
        self.record(ScannerCall::StartTask { task: task.into() })?;
        let mut state = self.state.lock();
        if state.reject_start.contains(task) {
            return Err(ScannerError::rejected("start_task", "task is busy"));
        }
        if !state.abort_on_start.contains(task) {
            for entry in state.tasks.iter_mut().filter(|t| t.task == task) {
                entry.running = true;
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, id: &str) -> Result<(), ScannerError> {
        self.record(ScannerCall::Delete {
            kind,
            id: id.into(),
        })?;
        let mut state = self.state.lock();
        if state.reject_delete.contains(id) {
            return Err(ScannerError::rejected("delete", "object in use"));
        }
        match kind {
            ObjectKind::Task => state.tasks.retain(|t| t.task != id),
            ObjectKind::Target => state.targets.retain(|t| t.target != id),
        }
        Ok(())
    }
}

/// Discovery with a fixed sweep result and a table of live hardware ids
#[derive(Debug, Default)]
pub struct FakeDiscovery {
    hosts: Vec<DiscoveredHost>,
    live: HashMap<String, String>,
    sweeps: Mutex<Vec<String>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, address: &str, hardware_id: &str, label: &str) -> Self {
        self.hosts.push(DiscoveredHost {
            address: address.into(),
            hardware_id: hardware_id.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_live_hardware_id(mut self, address: &str, hardware_id: &str) -> Self {
        self.live.insert(address.into(), hardware_id.into());
        self
    }

    pub fn sweeps(&self) -> Vec<String> {
        self.sweeps.lock().clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

impl DiscoveryGateway for FakeDiscovery {
    async fn sweep(&self, subnet: &str) -> Vec<DiscoveredHost> {
        self.sweeps.lock().push(subnet.into());
        self.hosts.clone()
    }

    async fn resolve_hardware_id(&self, address: &str) -> Option<String> {
        self.lookups.lock().push(address.into());
        self.live.get(address).cloned()
    }
}

/// Snapshot store kept in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    initial: Option<Vec<HostSnapshot>>,
    saved: Mutex<Option<Vec<HostSnapshot>>>,
    fail_save: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(snapshots: Vec<HostSnapshot>) -> Self {
        Self {
            initial: Some(snapshots),
            ..Self::default()
        }
    }

    pub fn failing_saves(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn saved(&self) -> Option<Vec<HostSnapshot>> {
        self.saved.lock().clone()
    }

    pub fn saved_addresses(&self) -> Vec<String> {
        self.saved()
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.ip)
            .collect()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<HostSnapshot>>, StoreError> {
        Ok(self.initial.clone())
    }

    fn save(&self, mut snapshots: Vec<HostSnapshot>, sort_key: SnapshotSortKey) -> Result<(), StoreError> {
        if self.fail_save {
            return Err(StoreError::Io {
                path: PathBuf::from("memory"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only store"),
            });
        }
        scanward_core::store::sort_snapshots(&mut snapshots, sort_key);
        *self.saved.lock() = Some(snapshots);
        Ok(())
    }
}
