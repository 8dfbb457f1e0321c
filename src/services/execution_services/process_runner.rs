use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::models::{
    error_models::RunError,
    execution_models::{ExecContext, RunOutput},
};

/// Runs one shell command under a context and classifies how it ended.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, ctx: &ExecContext) -> Result<RunOutput, RunError>;
}

/// `sh -c <command>` on the host.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, ctx: &ExecContext) -> Result<RunOutput, RunError> {
        if ctx.is_done() {
            return Err(RunError::Cancelled);
        }

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunError::Internal(format!("failed to spawn {}: {e}", self.shell)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunError::Internal("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunError::Internal("stderr not captured".to_string()))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        });

        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = ctx.done() => None,
        };
        let status = match finished {
            Some(status) => status
                .map_err(|e| RunError::Internal(format!("failed to wait for command: {e}")))?,
            None => {
                debug!(command, "context done, killing command");
                let _ = child.kill().await;
                stdout_abort.abort();
                stderr_abort.abort();
                return Err(RunError::Cancelled);
            }
        };

        // a grandchild can keep the pipes open after the shell exits
        let outputs = tokio::select! {
            outputs = async { (join_output(stdout_task).await, join_output(stderr_task).await) } => Some(outputs),
            _ = ctx.done() => None,
        };
        let (stdout, stderr) = match outputs {
            Some((stdout, stderr)) => (stdout?, stderr?),
            None => {
                stdout_abort.abort();
                stderr_abort.abort();
                return Err(RunError::Cancelled);
            }
        };
        classify(status, stdout, stderr)
    }
}

async fn join_output(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, RunError> {
    task.await
        .map_err(|e| RunError::Internal(format!("output reader failed: {e}")))?
        .map_err(|e| RunError::Internal(format!("failed to read output: {e}")))
}

/// Exit-status policy. See `RunError` for what each class means.
pub fn classify(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Result<RunOutput, RunError> {
    match status.code() {
        Some(0) => Ok(RunOutput { stdout, stderr }),
        Some(1 | 136 | 139) => Err(RunError::WrongCode {
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }),
        Some(137) => Err(RunError::OomKilled),
        Some(code) => Err(RunError::Internal(format!(
            "exit status {code}: {}",
            String::from_utf8_lossy(&stderr).trim()
        ))),
        None => classify_signal(status),
    }
}

#[cfg(unix)]
fn classify_signal(status: ExitStatus) -> Result<RunOutput, RunError> {
    use std::os::unix::process::ExitStatusExt;

    const SIGKILL: i32 = 9;
    match status.signal() {
        Some(SIGKILL) => Err(RunError::Cancelled),
        Some(signal) => Err(RunError::Internal(format!("terminated by signal {signal}"))),
        None => Err(RunError::Internal(format!("unknown exit status {status}"))),
    }
}

#[cfg(not(unix))]
fn classify_signal(status: ExitStatus) -> Result<RunOutput, RunError> {
    Err(RunError::Internal(format!("unknown exit status {status}")))
}
