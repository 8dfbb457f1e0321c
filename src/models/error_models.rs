use thiserror::Error;
use tonic::Status;

/// Classified outcome of a shell command that did not succeed.
///
/// This is the contract callers branch on; raw exit codes never leave the process runner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// The submitted program failed to compile or crashed (exit 1, 136 or 139).
    #[error("program failed with a code-level error")]
    WrongCode { stderr: String },
    /// Exit 137, the container hit its memory cap.
    #[error("container was killed for exceeding its memory limit")]
    OomKilled,
    /// The caller's token fired or the deadline passed before the command exited.
    #[error("command was cancelled before it finished")]
    Cancelled,
    #[error("command failed: {0}")]
    Internal(String),
}

/// Failures of an exec request that cannot be expressed as `{success: false}`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("unsupported language value {0}")]
    UnsupportedLanguage(i32),
    #[error("out of memory")]
    OomKilled,
    #[error("execution cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExecError> for Status {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::UnsupportedLanguage(value) => {
                Status::invalid_argument(format!("unsupported language: {value}"))
            }
            ExecError::OomKilled => Status::out_of_range("OOM"),
            ExecError::Cancelled => Status::cancelled("execution cancelled"),
            // details stay in the logs
            ExecError::Internal(_) => Status::internal("internal error"),
        }
    }
}

/// Why a detached container stop gave up. Only ever logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownError {
    #[error("container still running after {attempts} stop attempts, last error: {last}")]
    Exhausted { attempts: usize, last: RunError },
    #[error("unexpected stop failure: {0}")]
    Unexpected(RunError),
    #[error("teardown exceeded its overall timeout")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("heartbeat store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatKeyError {
    #[error("unknown heartbeat key prefix in {0:?}")]
    UnknownPrefix(String),
    #[error("heartbeat key {0:?} has the wrong number of fields")]
    FieldCount(String),
    #[error("heartbeat key {key:?} has a non-numeric id {field:?}")]
    InvalidId { key: String, field: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionNameError {
    #[error("container {0:?} is not a session container")]
    WrongPrefix(String),
    #[error("container {0:?} has the wrong number of id fields")]
    FieldCount(String),
    #[error("container {name:?} has a non-numeric id {field:?}")]
    InvalidId { name: String, field: String },
}

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("no heartbeat record for {0}")]
    NotFound(String),
    #[error("heartbeat record under {key} is not decodable: {reason}")]
    Corrupt { key: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored value out of range: {0}")]
    OutOfRange(String),
}

/// Reasons a sweep cycle was abandoned. Every variant means "retry next period".
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("listing session containers failed: {0}")]
    List(#[source] RuntimeError),
    #[error("reading heartbeats failed: {0}")]
    Heartbeats(#[source] StoreError),
    #[error("reading lab deadlines failed: {0}")]
    Deadlines(#[source] DbError),
    #[error("persisting coding time failed: {0}")]
    Persist(#[source] DbError),
    #[error("removing containers failed: {0}")]
    Remove(#[source] RuntimeError),
    #[error("deleting heartbeat keys failed: {0}")]
    DeleteKeys(#[source] StoreError),
    #[error("{0} timed out")]
    TimedOut(&'static str),
    #[error("sweep cycle panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Anything that stops the service from coming up or serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("heartbeat store: {0}")]
    Store(#[from] StoreError),
    #[error("database: {0}")]
    Database(#[from] DbError),
    #[error("container runtime: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("grpc transport: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("grpc reflection: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn exec_errors_map_to_distinct_status_codes() {
        assert_eq!(Status::from(ExecError::OomKilled).code(), Code::OutOfRange);
        assert_eq!(Status::from(ExecError::Cancelled).code(), Code::Cancelled);
        assert_eq!(
            Status::from(ExecError::UnsupportedLanguage(9)).code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn internal_status_hides_details() {
        let status = Status::from(ExecError::Internal("docker: permission denied".into()));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "internal error");
    }
}
