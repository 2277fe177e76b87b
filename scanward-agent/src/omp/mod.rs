//! Scanner transport over the `omp` command-line client
//!
//! Each gateway call is one `omp` invocation. Output is screened for the
//! client's error strings before parsing:
//! - empty output: the scanner is unreachable (fatal)
//! - "Failed to authenticate.": retried a bounded number of times, then fatal
//! - "Failed to acquire socket.": fatal

pub mod parse;

use std::time::Duration;

use quick_xml::escape::escape;
use tracing::{debug, error, info};

use scanward_core::{
    ObjectKind, ReportEntry, ResultEntry, ScannerError, ScannerGateway, TargetEntry, TaskEntry,
};

use crate::execution::{CommandExecutor, ExecError};
use parse::{object_name, parse_status, Status};

const AUTH_FAILED: &str = "Failed to authenticate.";
const SOCKET_FAILED: &str = "Failed to acquire socket.";
const START_FAILED: &str = "Failed to start task.";

#[derive(Clone)]
pub struct OmpSettings {
    pub binary: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub list_timeout: Duration,
    pub command_timeout: Duration,
    pub start_timeout: Duration,
    pub auth_retries: u32,
    pub auth_retry_delay: Duration,
}

impl std::fmt::Debug for OmpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OmpSettings")
            .field("binary", &self.binary)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct OmpScanner {
    settings: OmpSettings,
}

impl OmpScanner {
    pub fn new(settings: OmpSettings) -> Self {
        Self { settings }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            format!("--username={}", self.settings.username),
            format!("--password={}", self.settings.password),
            format!("--host={}", self.settings.host),
            format!("--port={}", self.settings.port),
        ]
    }

    /// Run one omp invocation and screen its output
    async fn omp(&self, args: &[String], timeout: Duration) -> Result<String, ScannerError> {
        let mut full_args = self.base_args();
        full_args.extend(args.iter().cloned());
        let label = format!("omp {}", args.join(" "));
        let retries = self.settings.auth_retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = CommandExecutor::run(&self.settings.binary, &full_args, timeout, &label)
                .await
                .map_err(|e| match e {
                    ExecError::Timeout { timeout, .. } => ScannerError::Timeout(timeout),
                    ExecError::Spawn { .. } => ScannerError::TransportUnavailable(e.to_string()),
                })?;

            let stdout = result.stdout.replace('\n', " ");
            if stdout.trim().is_empty() {
                error!(command = %label, stderr = %result.stderr.trim(), "scanner returned nothing");
                return Err(ScannerError::TransportUnavailable(format!(
                    "no output from {}",
                    label
                )));
            }
            if stdout.contains(AUTH_FAILED) {
                error!(attempt, retries, "wrong password or scanner busy");
                if attempt >= retries {
                    error!(
                        host = %self.settings.host,
                        "giving up, check the credentials or restart the scanner"
                    );
                    return Err(ScannerError::AuthenticationExhausted { attempts: attempt });
                }
                tokio::time::sleep(self.settings.auth_retry_delay).await;
                continue;
            }
            if stdout.contains(SOCKET_FAILED) {
                error!(port = self.settings.port, "{}", SOCKET_FAILED);
                return Err(ScannerError::SocketUnavailable);
            }
            return Ok(stdout);
        }
    }

    async fn xml(&self, command: &str, timeout: Duration) -> Result<String, ScannerError> {
        self.omp(&["--xml".to_string(), command.to_string()], timeout)
            .await
    }

    /// Send a single-object command and return its status. A response
    /// without a readable status fails that object only.
    async fn command(&self, operation: &'static str, command: &str) -> Result<Status, ScannerError> {
        let raw = self.xml(command, self.settings.command_timeout).await?;
        let status = parse_status(&raw).map_err(|e| {
            debug!(operation, response = %raw.trim(), "unreadable status: {}", e);
            ScannerError::rejected(operation, raw.trim().to_string())
        })?;
        if !status.is_ok() {
            return Err(ScannerError::rejected(
                operation,
                format!("{} {}", status.code, status.text),
            ));
        }
        Ok(status)
    }

    /// Send a create command and return the new object's id
    async fn create(&self, operation: &'static str, command: &str) -> Result<String, ScannerError> {
        self.command(operation, command)
            .await?
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ScannerError::rejected(operation, "created object without id"))
    }
}

impl ScannerGateway for OmpScanner {
    async fn list_reports(&self) -> Result<Vec<ReportEntry>, ScannerError> {
        let raw = self.xml("<get_reports/>", self.settings.list_timeout).await?;
        parse::parse_reports(&raw).map_err(|e| ScannerError::malformed("get_reports", e.to_string()))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, ScannerError> {
        let raw = self.xml("<get_tasks/>", self.settings.list_timeout).await?;
        parse::parse_tasks(&raw).map_err(|e| ScannerError::malformed("get_tasks", e.to_string()))
    }

    async fn list_targets(&self) -> Result<Vec<TargetEntry>, ScannerError> {
        let raw = self.xml("<get_targets/>", self.settings.list_timeout).await?;
        parse::parse_targets(&raw).map_err(|e| ScannerError::malformed("get_targets", e.to_string()))
    }

    async fn list_results(&self) -> Result<Vec<ResultEntry>, ScannerError> {
        let raw = self.xml("<get_results/>", self.settings.list_timeout).await?;
        parse::parse_results(&raw).map_err(|e| ScannerError::malformed("get_results", e.to_string()))
    }

    async fn create_target(
        &self,
        address: &str,
        hardware_id: &str,
        port_list: &str,
        comment: &str,
    ) -> Result<String, ScannerError> {
        let command = format!(
            "<create_target><name>{}</name><comment>{}</comment><hosts>{}</hosts><port_list id=\"{}\"/></create_target>",
            escape(&object_name(hardware_id, address)),
            escape(comment),
            escape(address),
            escape(port_list),
        );
        let target = self.create("create_target", &command).await?;
        info!(address, hardware_id, target = %target, "created target");
        Ok(target)
    }

    async fn create_task(
        &self,
        address: &str,
        hardware_id: &str,
        target: &str,
        scan_config: &str,
        comment: &str,
    ) -> Result<String, ScannerError> {
        let command = format!(
            "<create_task><name>{}</name><comment>{}</comment><config id=\"{}\"/><target id=\"{}\"/></create_task>",
            escape(&object_name(hardware_id, address)),
            escape(comment),
            escape(scan_config),
            escape(target),
        );
        let task = self.create("create_task", &command).await?;
        info!(address, hardware_id, task = %task, "created task");
        Ok(task)
    }

    async fn start_task(&self, task: &str) -> Result<(), ScannerError> {
        let raw = self
            .omp(&["-S".to_string(), task.to_string()], self.settings.start_timeout)
            .await?;
        if raw.contains(START_FAILED) {
            return Err(ScannerError::rejected("start_task", START_FAILED));
        }
        debug!(task, "start accepted");
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, id: &str) -> Result<(), ScannerError> {
        let command = format!("<delete_{0} {0}_id=\"{1}\"/>", kind.as_str(), escape(id));
        self.command("delete", &command).await?;
        debug!(object = kind.as_str(), id, "deleted");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// A stand-in `omp` that logs each call and prints `output`
    fn fake_omp(dir: &Path, output: &str) -> String {
        let path = dir.join("omp");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\ncat <<'EOF'\n{}\nEOF\n",
            dir.join("calls").display(),
            output
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn scanner(binary: String) -> OmpScanner {
        OmpScanner::new(OmpSettings {
            binary,
            host: "127.0.0.1".into(),
            port: 9390,
            username: "admin".into(),
            password: "secret".into(),
            list_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            auth_retries: 3,
            auth_retry_delay: Duration::ZERO,
        })
    }

    fn call_count(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("calls"))
            .map(|c| c.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_authentication_retries_then_gives_up() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), "Failed to authenticate."));

        let err = omp.list_tasks().await.unwrap_err();

        assert!(matches!(err, ScannerError::AuthenticationExhausted { attempts: 3 }));
        assert_eq!(call_count(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_socket_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), "Failed to acquire socket."));
        let err = omp.list_reports().await.unwrap_err();
        assert!(matches!(err, ScannerError::SocketUnavailable));
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_empty_output_means_unavailable() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), ""));
        let err = omp.list_targets().await.unwrap_err();
        assert!(matches!(err, ScannerError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_target_returns_id_and_passes_credentials() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(
            dir.path(),
            r#"<create_target_response status="201" status_text="OK, resource created" id="g-42"/>"#,
        ));

        let target = omp
            .create_target("10.0.0.5", "AA:BB:CC:DD:EE:FF", "pl-1", "lab & test")
            .await
            .unwrap();

        assert_eq!(target, "g-42");
        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert!(calls.contains("--username=admin"));
        assert!(calls.contains("--port=9390"));
        assert!(calls.contains("<name>AA:BB:CC:DD:EE:FF (10.0.0.5)</name>"));
        assert!(calls.contains("lab &amp; test"));
    }

    #[tokio::test]
    async fn test_rejected_creation_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(
            dir.path(),
            r#"<create_task_response status="400" status_text="Target exists already"/>"#,
        ));
        let err = omp
            .create_task("10.0.0.5", "AA:BB:CC:DD:EE:FF", "g-1", "sc-1", "")
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreadable_create_response_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), "Failed to create target."));
        let err = omp
            .create_target("10.0.0.5", "AA:BB:CC:DD:EE:FF", "pl-1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Rejected { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_created_object_without_id_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(
            dir.path(),
            r#"<create_task_response status="201" status_text="OK"/>"#,
        ));
        let err = omp
            .create_task("10.0.0.5", "AA:BB:CC:DD:EE:FF", "g-1", "sc-1", "")
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreadable_delete_response_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), "Failed to find task 't-1'."));
        let err = omp.delete(ObjectKind::Task, "t-1").await.unwrap_err();
        assert!(matches!(err, ScannerError::Rejected { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_delete_accepted() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(
            dir.path(),
            r#"<delete_target_response status="200" status_text="OK"/>"#,
        ));
        omp.delete(ObjectKind::Target, "g-1").await.unwrap();
        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert!(calls.contains(r#"<delete_target target_id="g-1"/>"#));
    }

    #[tokio::test]
    async fn test_start_failure_is_rejection() {
        let dir = TempDir::new().unwrap();
        let omp = scanner(fake_omp(dir.path(), "Failed to start task."));
        let err = omp.start_task("t-1").await.unwrap_err();
        assert!(matches!(err, ScannerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let omp = scanner("/nonexistent/omp".into());
        let err = omp.delete(ObjectKind::Task, "t-1").await.unwrap_err();
        assert_eq!(err.exit_code(), 66);
    }
}
