use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::BatchRunner;
use crate::judge::Judge;

/// Why a run did not finish on its own.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TerminationSignal {
    #[default]
    None,
    Timeout,
    Memory,
    OutputLimit,
}

/// Outcome of a single compile or run step.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub signal: TerminationSignal,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_signal: Option<i32>,
    pub elapsed_ms: u64, // wall clock, milliseconds
}

/// Terminal state of a job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    CompileFailed,
    RuntimeFailed,
    TimedOut,
    OutputExceeded,
    MemoryExceeded,
    SpawnFailed,
    InternalError,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::CompileFailed => "compile_failed",
            JobStatus::RuntimeFailed => "runtime_failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::OutputExceeded => "output_exceeded",
            JobStatus::MemoryExceeded => "memory_exceeded",
            JobStatus::SpawnFailed => "spawn_failed",
            JobStatus::InternalError => "internal_error",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub language: Option<String>,
    pub code: Option<String>,
    pub input: Option<String>,
    pub timeout: Option<u64>, // milliseconds
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time: u64, // milliseconds
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub signal: TerminationSignal,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub language: Option<String>,
    pub code: Option<String>,
    pub test_cases: Option<Vec<TestCase>>,
    pub timeout_per_case: Option<u64>, // milliseconds
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub test_case_index: usize,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub passed: usize,
    pub total: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchResponse {
    pub results: Vec<Verdict>,
    pub summary: BatchSummary,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_jobs: usize,
    pub uptime: u64, // seconds
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub language: String,
    pub duration: u64, // milliseconds since start
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub active_jobs: usize,
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Clone)]
pub struct AppState {
    pub judge: Arc<Judge>,
    pub batch: Arc<BatchRunner>,
    pub api_key: Option<String>,
    pub started_at: Instant,
    pub prometheus_handle: Option<PrometheusHandle>,
}
