//! Static job definitions
//!
//! A job source is either a single JSON file or a directory walked
//! recursively. Each file holds one job object or an ordered list of them.
//! Files are read in path order so "last writer wins" on comments is
//! deterministic.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobDefinition {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub skip: Option<bool>,
    /// File the job was read from, for log lines
    #[serde(skip)]
    pub source: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobFile {
    Many(Vec<JobDefinition>),
    One(JobDefinition),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job source {0} does not exist")]
    InvalidPath(PathBuf),
    #[error("failed to read job directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load every job under `path`. Unreadable or malformed files and nested
/// directories are logged and skipped; only a missing or unreadable source
/// is an error.
pub fn load_jobs(path: &Path) -> Result<Vec<JobDefinition>, JobError> {
    if !path.exists() {
        return Err(JobError::InvalidPath(path.to_path_buf()));
    }

    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    } else {
        let entries = fs::read_dir(path).map_err(|source| JobError::ReadDir {
            path: path.to_path_buf(),
            source,
        })?;
        let mut visited = HashSet::new();
        if let Ok(root) = fs::canonicalize(path) {
            visited.insert(root);
        }
        for entry in entries.flatten() {
            collect_files(&entry.path(), &mut files, &mut visited);
        }
    }
    files.sort();

    let mut jobs = Vec::new();
    for file in files {
        match read_job_file(&file) {
            Ok(parsed) => {
                debug!(file = %file.display(), count = parsed.len(), "loaded job file");
                jobs.extend(parsed);
            }
            Err(e) => warn!(file = %file.display(), "skipping job file: {}", e),
        }
    }
    Ok(jobs)
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) {
    if path.is_file() {
        files.push(path.to_path_buf());
        return;
    }
    if !path.is_dir() {
        return;
    }

    // Symlinked directories can point back up the tree
    match fs::canonicalize(path) {
        Ok(real) if !visited.insert(real.clone()) => {
            debug!(dir = %path.display(), "job directory already visited");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(dir = %path.display(), "skipping job directory: {}", e);
            return;
        }
    }

    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                collect_files(&entry.path(), files, visited);
            }
        }
        Err(e) => warn!(dir = %path.display(), "skipping job directory: {}", e),
    }
}

fn read_job_file(file: &Path) -> Result<Vec<JobDefinition>, String> {
    let content = fs::read_to_string(file).map_err(|e| e.to_string())?;
    let parsed: JobFile = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    let mut jobs = match parsed {
        JobFile::Many(jobs) => jobs,
        JobFile::One(job) => vec![job],
    };
    for job in &mut jobs {
        job.source = file.to_path_buf();
    }
    Ok(jobs)
}
