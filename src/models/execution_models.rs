use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::docker::docker_models::SandboxLanguage;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: SandboxLanguage,
    pub source_code: String,
}

impl ExecutionRequest {
    pub fn new(language: SandboxLanguage, source_code: impl Into<String>) -> Self {
        ExecutionRequest {
            language,
            source_code: source_code.into(),
        }
    }
}

/// `output` is stdout when `succeeded`, the diagnostic text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub output: String,
}

impl ExecutionResult {
    pub fn success(stdout: String) -> Self {
        ExecutionResult {
            succeeded: true,
            output: stdout,
        }
    }

    pub fn wrong_code(stderr: String) -> Self {
        ExecutionResult {
            succeeded: false,
            output: stderr,
        }
    }
}

/// Captured output of a command that exited 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Cancellation token plus an optional deadline. Every external call in the crate runs under one.
#[derive(Debug, Clone)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    pub fn new(token: CancellationToken) -> Self {
        ExecContext {
            token,
            deadline: None,
        }
    }

    /// A fresh context that is not tied to any caller, bounded by `timeout`.
    pub fn detached(timeout: Duration) -> Self {
        ExecContext::new(CancellationToken::new()).with_timeout(timeout)
    }

    /// Tightens the deadline; an earlier existing deadline wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
