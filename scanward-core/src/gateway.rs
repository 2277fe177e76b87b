//! Interfaces to the scanning engine and to network discovery
//!
//! The engine core only ever talks to these traits. The command-line
//! transport lives in the agent binary; tests use the in-memory fakes from
//! the devkit crate.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// One finding of a completed report, as listed by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub address: String,
    pub report: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskEntry {
    pub address: String,
    pub hardware_id: String,
    pub task: String,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    pub address: String,
    pub target: String,
}

/// A scan result with positive severity
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub address: String,
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredHost {
    pub address: String,
    pub hardware_id: String,
    pub label: String,
}

/// Kind of scanner object that can be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Task,
    Target,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Task => "task",
            ObjectKind::Target => "target",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a scanner gateway
///
/// `Rejected` is local to one request and never aborts a run. Every other
/// variant means the control channel itself is unusable.
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("scanner rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("malformed scanner response to {operation}: {reason}")]
    Malformed {
        operation: &'static str,
        reason: String,
    },
    #[error("scanner transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("failed to acquire scanner socket")]
    SocketUnavailable,
    #[error("authentication failed {attempts} times, giving up")]
    AuthenticationExhausted { attempts: u32 },
    #[error("scanner call timed out after {0:?}")]
    Timeout(Duration),
}

impl ScannerError {
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        ScannerError::Rejected {
            operation,
            reason: reason.into(),
        }
    }

    pub fn malformed(operation: &'static str, reason: impl Into<String>) -> Self {
        ScannerError::Malformed {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScannerError::Rejected { .. })
    }

    /// Process exit code when this error terminates a run
    pub fn exit_code(&self) -> u8 {
        match self {
            ScannerError::Rejected { .. } => 1,
            ScannerError::AuthenticationExhausted { .. } => 4,
            ScannerError::SocketUnavailable => 6,
            ScannerError::Malformed { .. } => 65,
            ScannerError::TransportUnavailable(_) => 66,
            ScannerError::Timeout(_) => 70,
        }
    }
}

/// Operations of the scanning engine
///
/// Every call may block for a long time; implementations enforce their own
/// per-call timeout and report it as `ScannerError::Timeout`.
#[allow(async_fn_in_trait)]
pub trait ScannerGateway {
    async fn list_reports(&self) -> Result<Vec<ReportEntry>, ScannerError>;

    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, ScannerError>;

    async fn list_targets(&self) -> Result<Vec<TargetEntry>, ScannerError>;

    /// Results with severity `<= 0` are excluded by the implementation
    async fn list_results(&self) -> Result<Vec<ResultEntry>, ScannerError>;

    /// Returns the new target's reference
    async fn create_target(
        &self,
        address: &str,
        hardware_id: &str,
        port_list: &str,
        comment: &str,
    ) -> Result<String, ScannerError>;

    /// Returns the new task's reference
    async fn create_task(
        &self,
        address: &str,
        hardware_id: &str,
        target: &str,
        scan_config: &str,
        comment: &str,
    ) -> Result<String, ScannerError>;

    async fn start_task(&self, task: &str) -> Result<(), ScannerError>;

    async fn delete(&self, kind: ObjectKind, id: &str) -> Result<(), ScannerError>;
}

/// Network discovery. Failures are logged by the implementation and show up
/// as empty or absent results.
#[allow(async_fn_in_trait)]
pub trait DiscoveryGateway {
    async fn sweep(&self, subnet: &str) -> Vec<DiscoveredHost>;

    async fn resolve_hardware_id(&self, address: &str) -> Option<String>;
}
