use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::{
    docker::docker_manager::DockerSessionRuntime,
    models::{
        config_models::{Config, Heartbeat, HeartbeatBackend},
        error_models::{ConfigError, StartupError},
    },
    proto::sandbox::{self, code_executor_server::CodeExecutorServer},
    services::{
        all_session_services::{
            coding_time_service::reporting_offset,
            heartbeat_service::HeartbeatService,
            heartbeat_store::{HeartbeatStore, MemoryHeartbeatStore},
            redis_heartbeat_store::RedisHeartbeatStore,
            session_sweeper::SessionSweeper,
        },
        cleanup_service::CleanupService,
        execution_services::{
            container_executor::ContainerExecutor,
            executor_service::ExecutorService,
            process_runner::{CommandRunner, ShellRunner},
        },
        storage_services::sqlite_store::SqliteStore,
    },
};

/// Upper bound for each shutdown stage that waits on background work.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Owns every long-lived handle and tears them down in order.
pub struct Lifecycle {
    config: Config,
    executor: ContainerExecutor,
    heartbeats: HeartbeatService,
    sweeper: Option<SessionSweeper>,
    database: SqliteStore,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

async fn open_heartbeat_store(config: &Heartbeat) -> Result<Arc<dyn HeartbeatStore>, StartupError> {
    match config.backend {
        HeartbeatBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                ConfigError::Invalid("heartbeat.redis_url is required for the redis backend".into())
            })?;
            Ok(Arc::new(RedisHeartbeatStore::connect(url).await?))
        }
        HeartbeatBackend::Memory => {
            warn!("using the in-process heartbeat store; heartbeats are lost on restart");
            Ok(Arc::new(MemoryHeartbeatStore::new()))
        }
    }
}

impl Lifecycle {
    pub async fn build(config: Config) -> Result<Self, StartupError> {
        let tracker = TaskTracker::new();
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        let cleanup = CleanupService::new(
            runner.clone(),
            config.sandbox.docker_bin.clone(),
            tracker.clone(),
        );
        let executor = ContainerExecutor::new(&config, runner, cleanup);

        let store = open_heartbeat_store(&config.heartbeat).await?;
        let database = SqliteStore::connect(&config.database.url).await?;

        let sweeper = if config.sweeper.enabled {
            let runtime = Arc::new(DockerSessionRuntime::connect()?);
            let relational = Arc::new(database.clone());
            Some(SessionSweeper::new(
                runtime,
                store.clone(),
                relational.clone(),
                relational,
                reporting_offset(),
            ))
        } else {
            info!("session sweeper disabled");
            None
        };

        Ok(Lifecycle {
            config,
            executor,
            heartbeats: HeartbeatService::new(store),
            sweeper,
            database,
            tracker,
            shutdown: CancellationToken::new(),
        })
    }

    /// Writer for the client-facing IDE endpoints, sharing the sweeper's store.
    pub fn heartbeats(&self) -> &HeartbeatService {
        &self.heartbeats
    }

    pub fn database(&self) -> &SqliteStore {
        &self.database
    }

    /// Cancelling this token starts the ordered shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves until SIGINT/SIGTERM or the shutdown token, then stops the server, the sweeper,
    /// pending teardowns and the database, in that order.
    pub async fn run(mut self) -> Result<(), StartupError> {
        let addr = self.config.grpc_address()?;
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(sandbox::FILE_DESCRIPTOR_SET)
            .build()?;

        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => signal_token.cancel(),
                _ = signal_token.cancelled() => {}
            }
        });

        let sweeper_stop = CancellationToken::new();
        let mut sweeper = self
            .sweeper
            .take()
            .map(|sweeper| tokio::spawn(sweeper.run(sweeper_stop.clone())));

        info!(%addr, "sandbox executor listening");
        let server_token = self.shutdown.clone();
        let served = Server::builder()
            .add_service(CodeExecutorServer::new(ExecutorService::new(
                self.executor.clone(),
            )))
            .add_service(reflection)
            .serve_with_shutdown(addr, async move { server_token.cancelled().await })
            .await;
        match &served {
            Ok(()) => info!("grpc server stopped"),
            Err(err) => error!(error = %err, "grpc server failed"),
        }
        self.shutdown.cancel();

        sweeper_stop.cancel();
        if let Some(handle) = sweeper.as_mut() {
            if timeout(SHUTDOWN_GRACE, &mut *handle).await.is_err() {
                warn!("sweeper did not stop in time, aborting the running cycle");
                handle.abort();
            }
        }

        self.tracker.close();
        if timeout(SHUTDOWN_GRACE, self.tracker.wait()).await.is_err() {
            warn!(
                pending = self.tracker.len(),
                "gave up waiting for container teardowns"
            );
        }

        self.database.close().await;
        info!("shutdown complete");
        served.map_err(StartupError::from)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
