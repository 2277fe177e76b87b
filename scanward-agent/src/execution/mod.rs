//! External command execution
//!
//! Every tool the agent drives (omp, nmap, arping) is run through
//! `CommandExecutor::run`: arguments passed directly, no shell, output
//! captured, wall-clock timeout enforced.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command as AsyncCommand;
use tracing::{debug, trace};

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Run `program` with `args`. `label` is what gets logged in place of
    /// the full command line, which may carry credentials.
    pub async fn run(
        program: &str,
        args: &[String],
        timeout: Duration,
        label: &str,
    ) -> Result<ExecutionResult, ExecError> {
        let start_time = Instant::now();
        debug!(command = label, ?timeout, "executing");

        let output = tokio::time::timeout(
            timeout,
            AsyncCommand::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExecError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            execution_time_ms: start_time.elapsed().as_millis(),
        };
        trace!(
            "{} finished: exit {:?}, {} bytes in {}ms",
            label,
            result.exit_code,
            result.stdout.len(),
            result.execution_time_ms
        );
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = CommandExecutor::run("echo", &["hello".to_string()], Duration::from_secs(5), "echo")
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = CommandExecutor::run("sleep", &["5".to_string()], Duration::from_millis(50), "sleep")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = CommandExecutor::run("scanward-no-such-tool", &[], Duration::from_secs(1), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
