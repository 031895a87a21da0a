//! Job orchestration: admission, compile, run, verdict, cleanup.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use metrics::{counter, histogram};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::JudgeError;
use crate::languages::{LanguageProfile, LanguageRegistry};
use crate::registry::ActiveJobRegistry;
use crate::sandbox::{RunError, RunSpec, Sandbox};
use crate::types::{ExecuteRequest, ExecuteResponse, ExecutionResult, JobStatus, TerminationSignal};
use crate::workspace::Workspace;

pub const TIMEOUT_MESSAGE: &str = "Execution timed out";
pub const OUTPUT_LIMIT_MESSAGE: &str = "Output limit exceeded";
pub const MEMORY_LIMIT_MESSAGE: &str = "Memory limit exceeded";
const INTERNAL_MESSAGE: &str = "Internal error while executing code";

#[derive(Debug, Clone)]
pub struct JudgeLimits {
    pub max_code_bytes: usize,
    pub max_input_bytes: usize,
    pub max_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl From<&AppConfig> for JudgeLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_code_bytes: config.max_code_bytes,
            max_input_bytes: config.max_input_bytes,
            max_timeout_ms: config.max_timeout_ms,
            compile_timeout_ms: config.compile_timeout_ms,
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Lifecycle of a job. Every path ends in `Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Compiling,
    Running,
    Finished(JobStatus),
    Cleaned,
}

impl JobState {
    pub fn can_transition(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, Compiling) | (Created, Running) => true,
            (Compiling, Running) => true,
            (Compiling, Finished(status)) => matches!(
                status,
                JobStatus::CompileFailed | JobStatus::SpawnFailed | JobStatus::InternalError
            ),
            (Running, Finished(status)) => status != JobStatus::CompileFailed,
            (Created, Finished(JobStatus::InternalError)) => true,
            (Finished(_), Cleaned) => true,
            _ => false,
        }
    }
}

/// An admitted submission. Only built after validation succeeds.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub profile: LanguageProfile,
    pub source: String,
    pub stdin: String,
    pub timeout: Duration,
    pub memory_limit_mb: u64,
    pub created_at: Instant,
    state: JobState,
}

impl Job {
    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        if !self.state.can_transition(next) {
            tracing::warn!(job_id = %self.id, from = ?self.state, to = ?next, "unexpected job transition");
        }
        tracing::debug!(job_id = %self.id, from = ?self.state, to = ?next, "job transition");
        self.state = next;
    }
}

/// What a finished job reports back, before shaping into a response.
#[derive(Debug, Clone)]
struct JobOutcome {
    status: JobStatus,
    output: String,
    error: Option<String>,
    exit_code: Option<i32>,
    signal: TerminationSignal,
    elapsed_ms: u64,
}

impl JobOutcome {
    fn internal(elapsed_ms: u64) -> Self {
        Self {
            status: JobStatus::InternalError,
            output: String::new(),
            error: Some(INTERNAL_MESSAGE.to_string()),
            exit_code: None,
            signal: TerminationSignal::None,
            elapsed_ms,
        }
    }

    fn spawn_failed(err: &RunError, elapsed_ms: u64) -> Self {
        if !err.is_spawn_failure() {
            return Self::internal(elapsed_ms);
        }
        Self {
            status: JobStatus::SpawnFailed,
            output: String::new(),
            error: Some(format!("Unable to start program: {}", err)),
            exit_code: None,
            signal: TerminationSignal::None,
            elapsed_ms,
        }
    }

    fn compile_failed(result: ExecutionResult, elapsed_ms: u64) -> Self {
        let error = if result.signal == TerminationSignal::Timeout {
            "Compilation timed out".to_string()
        } else if !result.stderr.trim().is_empty() {
            result.stderr
        } else if !result.stdout.trim().is_empty() {
            result.stdout
        } else {
            exit_message("Compiler", result.exit_code, result.os_signal)
        };
        Self {
            status: JobStatus::CompileFailed,
            output: String::new(),
            error: Some(error),
            exit_code: result.exit_code,
            signal: result.signal,
            elapsed_ms,
        }
    }

    fn from_run(result: ExecutionResult, elapsed_ms: u64) -> Self {
        let (status, error) = match result.signal {
            TerminationSignal::Timeout => (JobStatus::TimedOut, Some(TIMEOUT_MESSAGE.to_string())),
            TerminationSignal::OutputLimit => {
                (JobStatus::OutputExceeded, Some(OUTPUT_LIMIT_MESSAGE.to_string()))
            }
            TerminationSignal::Memory => {
                (JobStatus::MemoryExceeded, Some(MEMORY_LIMIT_MESSAGE.to_string()))
            }
            TerminationSignal::None if result.success => (JobStatus::Completed, None),
            TerminationSignal::None => {
                let error = if result.stderr.trim().is_empty() {
                    exit_message("Process", result.exit_code, result.os_signal)
                } else {
                    result.stderr
                };
                (JobStatus::RuntimeFailed, Some(error))
            }
        };
        Self {
            status,
            output: result.stdout,
            error,
            exit_code: result.exit_code,
            signal: result.signal,
            elapsed_ms,
        }
    }

    fn into_response(self) -> ExecuteResponse {
        ExecuteResponse {
            success: self.status == JobStatus::Completed,
            output: self.output,
            error: self.error,
            execution_time: self.elapsed_ms,
            status: self.status,
            exit_code: self.exit_code,
            signal: self.signal,
        }
    }
}

fn exit_message(subject: &str, exit_code: Option<i32>, os_signal: Option<i32>) -> String {
    match (exit_code, os_signal) {
        (Some(code), _) => format!("{} exited with code {}", subject, code),
        (None, Some(signal)) => format!("{} terminated by signal {}", subject, signal),
        (None, None) => format!("{} terminated abnormally", subject),
    }
}

pub struct Judge {
    languages: LanguageRegistry,
    sandbox: Sandbox,
    registry: ActiveJobRegistry,
    workspace_root: PathBuf,
    limits: JudgeLimits,
}

impl Judge {
    pub fn new(config: &AppConfig) -> Result<Self, JudgeError> {
        let languages = LanguageRegistry::with_overrides(config.default_timeout_ms, &config.languages)?;
        Ok(Self::with_parts(
            languages,
            Sandbox::from_kind(config.sandbox),
            config.workspace_root.clone(),
            JudgeLimits::from(config),
        ))
    }

    pub fn with_parts(
        languages: LanguageRegistry,
        sandbox: Sandbox,
        workspace_root: PathBuf,
        limits: JudgeLimits,
    ) -> Self {
        Self {
            languages,
            sandbox,
            registry: ActiveJobRegistry::new(),
            workspace_root,
            limits,
        }
    }

    pub fn registry(&self) -> &ActiveJobRegistry {
        &self.registry
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Validates a request without touching the filesystem.
    pub fn admit(&self, request: ExecuteRequest) -> Result<Job, JudgeError> {
        let language = request
            .language
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| JudgeError::BadRequest("Language is required".to_string()))?;
        let source = request
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| JudgeError::BadRequest("Code is required".to_string()))?;

        if source.len() > self.limits.max_code_bytes {
            return Err(JudgeError::BadRequest(format!(
                "Code exceeds maximum size of {} bytes",
                self.limits.max_code_bytes
            )));
        }

        let stdin = request.input.unwrap_or_default();
        if stdin.len() > self.limits.max_input_bytes {
            return Err(JudgeError::BadRequest(format!(
                "Input exceeds maximum size of {} bytes",
                self.limits.max_input_bytes
            )));
        }

        let profile = self.languages.resolve(&language)?;

        let timeout_ms = match request.timeout {
            Some(0) => {
                return Err(JudgeError::BadRequest(
                    "Timeout must be a positive number of milliseconds".to_string(),
                ));
            }
            Some(ms) => ms.min(self.limits.max_timeout_ms),
            None => profile.default_timeout_ms.min(self.limits.max_timeout_ms),
        };

        Ok(Job {
            id: Uuid::new_v4(),
            profile: profile.clone(),
            source,
            stdin,
            timeout: Duration::from_millis(timeout_ms),
            memory_limit_mb: profile.default_memory_mb,
            created_at: Instant::now(),
            state: JobState::Created,
        })
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, JudgeError> {
        let job = self.admit(request)?;
        Ok(self.run_job(job).await)
    }

    /// Runs an admitted job to completion. Never fails: every problem past
    /// admission is reported through the response.
    pub async fn run_job(&self, mut job: Job) -> ExecuteResponse {
        let guard = self.registry.register(job.id, job.profile.language);
        let language = job.profile.language;
        tracing::info!(job_id = %job.id, language = %language, "job started");

        let outcome = match Workspace::create(&self.workspace_root, job.id) {
            Ok(workspace) => {
                guard.attach_workspace(workspace.path().to_path_buf());

                let (job_id, created_at) = (job.id, job.created_at);
                let outcome = AssertUnwindSafe(self.compile_and_run(&mut job, &workspace))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(job_id = %job_id, "job panicked during execution");
                        JobOutcome::internal(created_at.elapsed().as_millis() as u64)
                    });

                workspace.destroy().await;
                outcome
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "failed to create workspace: {}", e);
                JobOutcome::internal(0)
            }
        };

        job.transition(JobState::Finished(outcome.status));
        drop(guard);
        job.transition(JobState::Cleaned);

        counter!("executions_total", "outcome" => outcome.status.as_str()).increment(1);
        histogram!("execution_time_ms").record(outcome.elapsed_ms as f64);
        tracing::info!(
            job_id = %job.id,
            language = %language,
            status = outcome.status.as_str(),
            elapsed_ms = outcome.elapsed_ms,
            "job finished"
        );

        outcome.into_response()
    }

    async fn compile_and_run(&self, job: &mut Job, workspace: &Workspace) -> JobOutcome {
        let plan = job.profile.plan(&job.source, job.memory_limit_mb);

        let written = workspace
            .write_source(&plan.source_file, &job.source)
            .and_then(|_| workspace.write_stdin(&job.stdin));
        if let Err(e) = written {
            tracing::error!(job_id = %job.id, "failed to prepare workspace: {}", e);
            return JobOutcome::internal(0);
        }

        let mut elapsed_ms = 0;

        if let Some(compile) = plan.compile {
            job.transition(JobState::Compiling);
            let spec = RunSpec {
                argv: compile,
                cwd: workspace.path().to_path_buf(),
                stdin: String::new(),
                timeout: Duration::from_millis(self.limits.compile_timeout_ms),
                memory_limit_mb: None,
                address_space_limit: false,
                output_limit: self.limits.max_output_bytes,
            };

            match self.sandbox.run(&spec).await {
                Ok(result) => {
                    elapsed_ms += result.elapsed_ms;
                    if !result.success {
                        tracing::debug!(job_id = %job.id, "compilation failed");
                        return JobOutcome::compile_failed(result, elapsed_ms);
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, "compiler could not be started: {}", e);
                    return JobOutcome::spawn_failed(&e, elapsed_ms);
                }
            }
        }

        job.transition(JobState::Running);
        let spec = RunSpec {
            argv: plan.run,
            cwd: workspace.path().to_path_buf(),
            stdin: job.stdin.clone(),
            timeout: job.timeout,
            memory_limit_mb: Some(job.memory_limit_mb),
            address_space_limit: job.profile.address_space_limit,
            output_limit: self.limits.max_output_bytes,
        };

        match self.sandbox.run(&spec).await {
            Ok(result) => {
                elapsed_ms += result.elapsed_ms;
                JobOutcome::from_run(result, elapsed_ms)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "program could not be started: {}", e);
                JobOutcome::spawn_failed(&e, elapsed_ms)
            }
        }
    }

    /// Best-effort cleanup of jobs still registered at shutdown.
    pub fn shutdown(&self) -> usize {
        self.registry.sweep()
    }
}
