use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    models::{
        error_models::{RunError, TeardownError},
        execution_models::ExecContext,
    },
    services::execution_services::process_runner::CommandRunner,
};

pub const TEARDOWN_ATTEMPTS: usize = 5;
pub const TEARDOWN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(8);
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Seconds docker waits after SIGTERM before it sends SIGKILL.
pub const STOP_GRACE_SECS: u32 = 3;

const NO_SUCH_CONTAINER: &str = "No such container";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyGone,
}

#[derive(Debug, PartialEq, Eq)]
enum AttemptVerdict {
    Done(StopOutcome),
    Retry(RunError),
    Abort(RunError),
}

fn judge_attempt(result: Result<(), RunError>) -> AttemptVerdict {
    match result {
        Ok(()) => AttemptVerdict::Done(StopOutcome::Stopped),
        Err(RunError::WrongCode { stderr }) if stderr.contains(NO_SUCH_CONTAINER) => {
            AttemptVerdict::Done(StopOutcome::AlreadyGone)
        }
        Err(err @ (RunError::WrongCode { .. } | RunError::Cancelled)) => AttemptVerdict::Retry(err),
        Err(err) => AttemptVerdict::Abort(err),
    }
}

/// Best-effort teardown of sandbox containers whose caller went away.
///
/// Stops run as detached tasks on the shared tracker, each with its own deadline, so the
/// request that triggered them never waits.
#[derive(Clone)]
pub struct CleanupService {
    runner: Arc<dyn CommandRunner>,
    docker_bin: String,
    tracker: TaskTracker,
}

impl CleanupService {
    pub fn new(runner: Arc<dyn CommandRunner>, docker_bin: String, tracker: TaskTracker) -> Self {
        CleanupService {
            runner,
            docker_bin,
            tracker,
        }
    }

    /// Fire-and-forget. The outcome is only visible in the logs.
    pub fn schedule_stop(&self, container: String) {
        let service = self.clone();
        self.tracker.spawn(async move {
            match service.stop_container(&container).await {
                Ok(StopOutcome::Stopped) => info!(container = %container, "sandbox container stopped"),
                Ok(StopOutcome::AlreadyGone) => debug!(container = %container, "sandbox container already gone"),
                Err(err) => warn!(container = %container, error = %err, "giving up on sandbox container teardown"),
            }
        });
    }

    /// Stops `container`, retrying transient failures, bounded by `TEARDOWN_TIMEOUT`.
    pub async fn stop_container(&self, container: &str) -> Result<StopOutcome, TeardownError> {
        tokio::time::timeout(TEARDOWN_TIMEOUT, self.stop_with_retry(container))
            .await
            .map_err(|_| TeardownError::TimedOut)?
    }

    async fn stop_with_retry(&self, container: &str) -> Result<StopOutcome, TeardownError> {
        let command = format!("{} stop -t {STOP_GRACE_SECS} {container}", self.docker_bin);
        let mut last = RunError::Cancelled;
        for attempt in 1..=TEARDOWN_ATTEMPTS {
            let ctx = ExecContext::detached(TEARDOWN_ATTEMPT_TIMEOUT);
            let result = self.runner.run(&command, &ctx).await.map(|_| ());
            match judge_attempt(result) {
                AttemptVerdict::Done(outcome) => return Ok(outcome),
                AttemptVerdict::Retry(err) => {
                    debug!(container, attempt, error = %err, "docker stop failed, retrying");
                    last = err;
                }
                AttemptVerdict::Abort(err) => return Err(TeardownError::Unexpected(err)),
            }
        }
        Err(TeardownError::Exhausted {
            attempts: TEARDOWN_ATTEMPTS,
            last,
        })
    }
}
