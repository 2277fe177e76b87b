//! scanward-core - host state reconciliation and scan scheduling
//!
//! Keeps a registry of hosts across runs, folds persisted history, static job
//! definitions, network discovery and the scanning engine's own state into it,
//! then provisions scanner objects, starts at most one scan under a run
//! limit, and retires stale hosts.
//!
//! All I/O goes through the traits in [`gateway`] and [`store`]; the agent
//! binary supplies the command-line implementations.

pub mod engine;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod links;
pub mod merge;
pub mod model;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod store;

pub use engine::{CycleOptions, CycleReport, Engine};
pub use error::EngineError;
pub use gateway::{
    DiscoveredHost, DiscoveryGateway, ObjectKind, ReportEntry, ResultEntry, ScannerError,
    ScannerGateway, TargetEntry, TaskEntry,
};
pub use jobs::{load_jobs, JobDefinition, JobError};
pub use links::ResultLinks;
pub use merge::StateMerger;
pub use model::{HostRecord, HostSnapshot, Severity};
pub use registry::HostRegistry;
pub use retention::{RetentionPolicy, RetentionReport};
pub use scheduler::{AttemptState, ProvisionReport, RunOutcome, ScanScheduler, SchedulerSettings};
pub use store::{JsonSnapshotStore, SnapshotSortKey, SnapshotStore, StoreError};
