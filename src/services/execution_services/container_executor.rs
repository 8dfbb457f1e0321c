use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::{
    docker::docker_models::{ContainerHandle, SandboxLanguage},
    language_executor::generate_shell_command,
    models::{
        config_models::Config,
        error_models::{ExecError, RunError},
        execution_models::{ExecContext, ExecutionRequest, ExecutionResult},
    },
    services::{
        cleanup_service::CleanupService, execution_services::process_runner::CommandRunner,
    },
    utils::helper_utils::{random_suffix, shell_quote},
};

pub const SANDBOX_CONTAINER_PREFIX: &str = "mymonaco";
const NAME_SUFFIX_LEN: usize = 6;

/// Fraction of one core a sandbox may use.
pub const CPU_QUOTA: &str = "0.35";
pub const MEMORY_LIMIT: &str = "100m";
/// Memory plus swap; the gap to `MEMORY_LIMIT` is the soft buffer before the hard kill.
pub const MEMORY_SWAP_LIMIT: &str = "300m";
/// Upper bound for one run, applied under the caller's own cancellation.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(20);

/// `mymonaco-<language>-<unix nanos>-<6 random chars>`.
pub fn sandbox_container_name(language: SandboxLanguage) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{SANDBOX_CONTAINER_PREFIX}-{language}-{nanos}-{}",
        random_suffix(NAME_SUFFIX_LEN)
    )
}

/// Runs submitted code in a fresh, resource-capped container per request.
#[derive(Clone)]
pub struct ContainerExecutor {
    runner: Arc<dyn CommandRunner>,
    cleanup: CleanupService,
    docker_bin: String,
    images: [String; 3],
}

impl ContainerExecutor {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>, cleanup: CleanupService) -> Self {
        ContainerExecutor {
            runner,
            cleanup,
            docker_bin: config.sandbox.docker_bin.clone(),
            images: SandboxLanguage::ALL.map(|language| config.image_for(language).to_string()),
        }
    }

    fn image_for(&self, language: SandboxLanguage) -> &str {
        let index = match language {
            SandboxLanguage::Python3 => 0,
            SandboxLanguage::Cpp => 1,
            SandboxLanguage::Java => 2,
        };
        &self.images[index]
    }

    pub fn prepare(&self, language: SandboxLanguage) -> ContainerHandle {
        ContainerHandle {
            name: sandbox_container_name(language),
            image_ref: self.image_for(language).to_string(),
        }
    }

    pub fn host_command(&self, handle: &ContainerHandle, request: &ExecutionRequest) -> String {
        let inner = generate_shell_command(request.language, &request.source_code);
        format!(
            "{} run --rm=true --cpus={CPU_QUOTA} --memory={MEMORY_LIMIT} --memory-swap={MEMORY_SWAP_LIMIT} --name={} {} sh -c {}",
            self.docker_bin,
            handle.name,
            handle.image_ref,
            shell_quote(&inner)
        )
    }

    /// Runs `request` to completion or until `ctx` is done.
    ///
    /// A program that fails to compile or crashes is a normal `{succeeded: false}` result.
    /// On cancellation the container may outlive the host-side process, so a stop is
    /// scheduled in the background before returning.
    pub async fn execute(
        &self,
        ctx: &ExecContext,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecError> {
        let handle = self.prepare(request.language);
        let command = self.host_command(&handle, request);
        let ctx = ctx.clone().with_timeout(EXEC_TIMEOUT);

        debug!(container = %handle.name, image = %handle.image_ref, "starting sandbox run");
        match self.runner.run(&command, &ctx).await {
            Ok(output) => Ok(ExecutionResult::success(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            )),
            Err(RunError::WrongCode { stderr }) => {
                debug!(container = %handle.name, language = %request.language, "submitted code failed");
                Ok(ExecutionResult::wrong_code(stderr))
            }
            Err(RunError::OomKilled) => {
                info!(container = %handle.name, "sandbox run hit the memory cap");
                Err(ExecError::OomKilled)
            }
            Err(RunError::Cancelled) => {
                debug!(container = %handle.name, "sandbox run cancelled, scheduling teardown");
                self.cleanup.schedule_stop(handle.name);
                Err(ExecError::Cancelled)
            }
            Err(RunError::Internal(reason)) => {
                error!(
                    container = %handle.name,
                    language = %request.language,
                    code = %request.source_code,
                    %reason,
                    "sandbox run failed"
                );
                Err(ExecError::Internal(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    use super::*;
    use crate::models::execution_models::RunOutput;
    use crate::services::cleanup_service::tests::ScriptedRunner;
    use crate::services::execution_services::process_runner::ShellRunner;

    fn config() -> Config {
        Config::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 50051
            [sandbox.images]
            python3 = "python:3.12-slim"
            cpp = "gcc:13"
            java = "eclipse-temurin:21"
            [heartbeat]
            backend = "memory"
            [database]
            url = "sqlite::memory:"
            [sweeper]
            "#,
        )
        .unwrap()
    }

    /// Returns one fixed result for `docker run`.
    struct FixedRunner {
        result: Result<RunOutput, RunError>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, command: &str, _ctx: &ExecContext) -> Result<RunOutput, RunError> {
            self.commands.lock().unwrap().push(command.to_string());
            self.result.clone()
        }
    }

    fn executor_with(runner: Arc<dyn CommandRunner>, tracker: TaskTracker) -> ContainerExecutor {
        let cleanup = CleanupService::new(runner.clone(), "docker".to_string(), tracker);
        ContainerExecutor::new(&config(), runner, cleanup)
    }

    fn fixed(result: Result<RunOutput, RunError>) -> Arc<FixedRunner> {
        Arc::new(FixedRunner {
            result,
            commands: Mutex::default(),
        })
    }

    fn request(language: SandboxLanguage, code: &str) -> ExecutionRequest {
        ExecutionRequest::new(language, code)
    }

    #[test]
    fn names_are_distinct_under_concurrency() {
        let threads: Vec<_> = (0..16)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..640)
                        .map(|_| sandbox_container_name(SandboxLanguage::Python3))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut names = HashSet::new();
        for thread in threads {
            for name in thread.join().unwrap() {
                assert!(name.starts_with("mymonaco-python3-"));
                assert!(names.insert(name), "duplicate container name");
            }
        }
        assert_eq!(names.len(), 16 * 640);
    }

    #[test]
    fn host_command_carries_fixed_caps() {
        let executor = executor_with(fixed(Ok(RunOutput::default())), TaskTracker::new());
        let handle = executor.prepare(SandboxLanguage::Cpp);
        assert_eq!(handle.image_ref, "gcc:13");
        let command = executor.host_command(&handle, &request(SandboxLanguage::Cpp, "int main(){}"));
        assert!(command.starts_with(&format!(
            "docker run --rm=true --cpus=0.35 --memory=100m --memory-swap=300m --name={} gcc:13 sh -c '",
            handle.name
        )));
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let runner = fixed(Ok(RunOutput {
            stdout: b"hello world\n".to_vec(),
            stderr: vec![],
        }));
        let result = executor_with(runner, TaskTracker::new())
            .execute(
                &ExecContext::new(CancellationToken::new()),
                &request(SandboxLanguage::Python3, "print('hello world')"),
            )
            .await;
        assert_eq!(result, Ok(ExecutionResult::success("hello world\n".into())));
    }

    #[tokio::test]
    async fn wrong_code_is_a_normal_result() {
        let runner = fixed(Err(RunError::WrongCode {
            stderr: "Solution.java:1: error: ';' expected".into(),
        }));
        let result = executor_with(runner, TaskTracker::new())
            .execute(
                &ExecContext::new(CancellationToken::new()),
                &request(SandboxLanguage::Java, "class Solution {"),
            )
            .await;
        assert_eq!(
            result,
            Ok(ExecutionResult::wrong_code(
                "Solution.java:1: error: ';' expected".into()
            ))
        );
    }

    #[tokio::test]
    async fn infrastructure_failures_propagate() {
        for (run, expected) in [
            (RunError::OomKilled, ExecError::OomKilled),
            (
                RunError::Internal("exit status 125".into()),
                ExecError::Internal("exit status 125".into()),
            ),
        ] {
            let runner = fixed(Err(run));
            let tracker = TaskTracker::new();
            let result = executor_with(runner.clone(), tracker.clone())
                .execute(
                    &ExecContext::new(CancellationToken::new()),
                    &request(SandboxLanguage::Python3, "x"),
                )
                .await;
            assert_eq!(result, Err(expected));
            // no teardown for anything but cancellation
            assert_eq!(runner.commands.lock().unwrap().len(), 1);
            assert!(tracker.is_empty());
        }
    }

    #[tokio::test]
    async fn cancellation_returns_before_teardown_finishes() {
        let runner = Arc::new(ScriptedRunner::with_stops(vec![Ok(())]));
        let tracker = TaskTracker::new();
        let executor = executor_with(runner.clone(), tracker.clone());

        let token = CancellationToken::new();
        let ctx = ExecContext::new(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = Instant::now();
        let result = executor
            .execute(&ctx, &request(SandboxLanguage::Python3, "while True: pass"))
            .await;
        assert_eq!(result, Err(ExecError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.await.unwrap();

        tracker.close();
        tracker.wait().await;
        let commands = runner.commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        let name = commands[0]
            .split_whitespace()
            .find_map(|part| part.strip_prefix("--name="))
            .unwrap()
            .to_string();
        assert_eq!(commands[1], format!("docker stop -t 3 {name}"));
    }

    #[tokio::test]
    #[ignore = "needs a docker daemon and the python3 sandbox image"]
    async fn runs_python_in_docker() {
        let tracker = TaskTracker::new();
        let executor = executor_with(Arc::new(ShellRunner::new()), tracker);
        let result = executor
            .execute(
                &ExecContext::new(CancellationToken::new()),
                &request(SandboxLanguage::Python3, "print('hello world')"),
            )
            .await;
        assert_eq!(result, Ok(ExecutionResult::success("hello world\n".into())));
    }

    #[tokio::test]
    #[ignore = "needs a docker daemon and the java sandbox image"]
    async fn java_syntax_error_is_wrong_code() {
        let executor = executor_with(Arc::new(ShellRunner::new()), TaskTracker::new());
        let result = executor
            .execute(
                &ExecContext::new(CancellationToken::new()),
                &request(SandboxLanguage::Java, "public class Solution { void main( }"),
            )
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(result.output.contains("error"));
    }
}
