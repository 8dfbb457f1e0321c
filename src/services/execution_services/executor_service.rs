use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use crate::{
    docker::docker_models::SandboxLanguage,
    models::{
        error_models::ExecError,
        execution_models::{ExecContext, ExecutionRequest},
    },
    proto::sandbox::{ExecCodeRequest, ExecCodeResponse, code_executor_server::CodeExecutor},
    services::execution_services::container_executor::ContainerExecutor,
};

/// gRPC front of the container executor.
#[derive(Clone)]
pub struct ExecutorService {
    executor: ContainerExecutor,
}

impl ExecutorService {
    pub fn new(executor: ContainerExecutor) -> Self {
        ExecutorService { executor }
    }
}

#[tonic::async_trait]
impl CodeExecutor for ExecutorService {
    async fn exec_code(
        &self,
        request: Request<ExecCodeRequest>,
    ) -> Result<Response<ExecCodeResponse>, Status> {
        let ExecCodeRequest { language, code } = request.into_inner();
        let language =
            SandboxLanguage::from_wire(language).ok_or(ExecError::UnsupportedLanguage(language))?;
        let request = ExecutionRequest::new(language, code);

        // tonic drops this future when the client goes away; the guard turns that into a
        // cancellation the spawned run can observe.
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        let ctx = ExecContext::new(token);

        let executor = self.executor.clone();
        let run = tokio::spawn(async move { executor.execute(&ctx, &request).await });
        let result = run.await.map_err(|e| {
            error!(error = %e, "exec task failed");
            ExecError::Internal(e.to_string())
        })??;

        debug!(success = result.succeeded, "exec finished");
        Ok(Response::new(ExecCodeResponse {
            tip: result.output,
            success: result.succeeded,
        }))
    }
}
