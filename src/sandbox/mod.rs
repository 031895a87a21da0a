//! Launching untrusted programs under time, memory and output limits.

mod container;
pub mod output;
mod process;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::SandboxKind;
use crate::types::{ExecutionResult, TerminationSignal};

pub use container::ContainerSandbox;
pub use output::{CappedBuffer, TRUNCATION_MARKER, TerminationCause};
pub use process::ProcessSandbox;

/// One compile or run invocation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: String,
    pub timeout: Duration,
    pub memory_limit_mb: Option<u64>,
    pub address_space_limit: bool,
    pub output_limit: usize,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    /// The program never started (missing toolchain, bad sandbox setup).
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    /// The program started but the judge lost track of it.
    #[error("i/o failure while supervising process: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, RunError::EmptyCommand | RunError::Spawn { .. })
    }
}

pub enum Sandbox {
    Process(ProcessSandbox),
    Container(ContainerSandbox),
}

impl Sandbox {
    pub fn from_kind(kind: SandboxKind) -> Self {
        match kind {
            SandboxKind::Process => Sandbox::Process(ProcessSandbox::default()),
            SandboxKind::Container => Sandbox::Container(ContainerSandbox::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sandbox::Process(_) => "process",
            Sandbox::Container(_) => "container",
        }
    }

    pub async fn run(&self, spec: &RunSpec) -> Result<ExecutionResult, RunError> {
        match self {
            Sandbox::Process(sandbox) => sandbox.run(spec).await,
            Sandbox::Container(sandbox) => sandbox.run(spec).await,
        }
    }
}

/// Shared mapping from raw process facts to an [`ExecutionResult`].
pub(crate) fn finish(
    exit_code: Option<i32>,
    os_signal: Option<i32>,
    stdout: CappedBuffer,
    stderr: CappedBuffer,
    cause: TerminationSignal,
    elapsed: Duration,
) -> ExecutionResult {
    let stdout_overflowed = stdout.overflowed();
    let stdout = stdout.into_string();
    let stderr = stderr.into_string();

    let signal = match cause {
        TerminationSignal::None if stdout_overflowed => TerminationSignal::OutputLimit,
        TerminationSignal::None
            if exit_code != Some(0) && output::looks_out_of_memory(&stderr) =>
        {
            TerminationSignal::Memory
        }
        other => other,
    };

    ExecutionResult {
        success: signal == TerminationSignal::None && exit_code == Some(0),
        stdout,
        stderr,
        signal,
        exit_code,
        os_signal,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}
