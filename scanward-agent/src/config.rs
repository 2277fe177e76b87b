//! Configuration management
//!
//! Handles:
//! - Scanner endpoint, credentials and per-call timeouts
//! - Scheduling limits and provisioning profiles
//! - Retention threshold
//! - Data file, job source and discovery tools
//!
//! Every section has defaults, so a missing or partial file is valid. The
//! scanner password may come from `SCANWARD_SCANNER_PASSWORD` instead of the
//! file and is never written back or logged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use scanward_core::{ResultLinks, RetentionPolicy, SchedulerSettings};

use crate::omp::OmpSettings;

pub const CONFIG_ENV: &str = "SCANWARD_CONFIG";
pub const PASSWORD_ENV: &str = "SCANWARD_SCANNER_PASSWORD";
pub const DEFAULT_CONFIG_FILE: &str = "scanward.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub scanner: ScannerConfig,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub paths: PathsConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub omp_binary: String,
    pub host: String,
    pub omp_port: u16,
    pub web_port: u16,
    pub username: String,
    #[serde(skip_serializing)] // Never write passwords back
    pub password: String,
    pub list_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub start_timeout_secs: u64,
    pub auth_retries: u32,
    pub auth_retry_delay_secs: u64,
}

impl std::fmt::Debug for ScannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerConfig")
            .field("omp_binary", &self.omp_binary)
            .field("host", &self.host)
            .field("omp_port", &self.omp_port)
            .field("web_port", &self.web_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            omp_binary: "omp".to_string(),
            host: "127.0.0.1".to_string(),
            omp_port: 9390,
            web_port: 9392,
            username: "admin".to_string(),
            password: String::new(),
            list_timeout_secs: 300,
            command_timeout_secs: 30,
            start_timeout_secs: 90,
            auth_retries: 3,
            auth_retry_delay_secs: 43,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub run_limit: usize,
    pub settle_secs: u64,
    pub port_list_id: String,
    pub scan_config_id: String,
    pub verify_hardware: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_limit: 3,
            settle_secs: 120,
            port_list_id: String::new(),
            scan_config_id: String::new(),
            verify_hardware: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub threshold_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { threshold_days: 31 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_file: PathBuf,
    pub job_source: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("hosts.json"),
            job_source: PathBuf::from("jobs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub nmap_binary: String,
    pub arping_binary: String,
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            nmap_binary: "nmap".to_string(),
            arping_binary: "/usr/sbin/arping".to_string(),
            timeout_secs: 300,
        }
    }
}

impl AgentConfig {
    /// Load config from `path`, or defaults when the file does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<AgentConfig>(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?
        } else {
            AgentConfig::default()
        };

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.scanner.password = password;
        }
        Ok(config)
    }

    /// Resolve the config path: CLI flag, then environment, then default
    pub fn resolve_path(cli: Option<&Path>) -> PathBuf {
        cli.map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn omp_settings(&self) -> OmpSettings {
        let s = &self.scanner;
        OmpSettings {
            binary: s.omp_binary.clone(),
            host: s.host.clone(),
            port: s.omp_port,
            username: s.username.clone(),
            password: s.password.clone(),
            list_timeout: Duration::from_secs(s.list_timeout_secs),
            command_timeout: Duration::from_secs(s.command_timeout_secs),
            start_timeout: Duration::from_secs(s.start_timeout_secs),
            auth_retries: s.auth_retries,
            auth_retry_delay: Duration::from_secs(s.auth_retry_delay_secs),
        }
    }

    pub fn scheduler_settings(&self, verify_flag: bool) -> SchedulerSettings {
        SchedulerSettings {
            run_limit: self.schedule.run_limit,
            port_list_id: self.schedule.port_list_id.clone(),
            scan_config_id: self.schedule.scan_config_id.clone(),
            verify_hardware: self.schedule.verify_hardware || verify_flag,
            settle_interval: Duration::from_secs(self.schedule.settle_secs),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention.threshold_days)
    }

    pub fn result_links(&self) -> ResultLinks {
        ResultLinks::new(&self.scanner.host, self.scanner.web_port)
    }
}
