//! Snapshot persistence
//!
//! The snapshot is a JSON array of host objects, written to a sibling
//! temporary file and renamed over the previous one.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{HostSnapshot, UNSET_SEVERITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotSortKey {
    #[default]
    LastReport,
    LastAttempt,
    Address,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot {0} is not a JSON array")]
    Format(PathBuf),
}

/// Load/save of the persisted host snapshot
pub trait SnapshotStore {
    /// `None` when nothing was saved yet
    fn load(&self) -> Result<Option<Vec<HostSnapshot>>, StoreError>;

    fn save(&self, snapshots: Vec<HostSnapshot>, sort_key: SnapshotSortKey) -> Result<(), StoreError>;
}

/// Order snapshots for writing. Timestamps share one fixed-width format, so
/// text order is time order; missing stamps sort first.
pub fn sort_snapshots(snapshots: &mut [HostSnapshot], sort_key: SnapshotSortKey) {
    match sort_key {
        SnapshotSortKey::LastReport => snapshots.sort_by(|a, b| {
            a.last_report.cmp(&b.last_report).then_with(|| a.ip.cmp(&b.ip))
        }),
        SnapshotSortKey::LastAttempt => snapshots.sort_by(|a, b| {
            a.last_attempt.cmp(&b.last_attempt).then_with(|| a.ip.cmp(&b.ip))
        }),
        SnapshotSortKey::Address => snapshots.sort_by(|a, b| a.ip.cmp(&b.ip)),
    }
}

#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<Option<Vec<HostSnapshot>>, StoreError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no saved snapshot");
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let Value::Array(items) = serde_json::from_str::<Value>(&content)? else {
            return Err(StoreError::Format(self.path.clone()));
        };

        let mut snapshots = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<HostSnapshot>(item) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(index, "skipping malformed saved host: {}", e),
            }
        }
        debug!(path = %self.path.display(), count = snapshots.len(), "loaded snapshot");
        Ok(Some(snapshots))
    }

    fn save(&self, mut snapshots: Vec<HostSnapshot>, sort_key: SnapshotSortKey) -> Result<(), StoreError> {
        sort_snapshots(&mut snapshots, sort_key);
        for snapshot in &mut snapshots {
            if !snapshot.severity.is_finite() {
                snapshot.severity = UNSET_SEVERITY;
            }
        }
        let json = serde_json::to_string_pretty(&snapshots)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = fs::File::create(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(json.as_bytes()).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = snapshots.len(), "saved snapshot");
        Ok(())
    }
}
