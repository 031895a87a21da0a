use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use hakoniwa::seccomp::{Action, Arch, Filter};
use hakoniwa::{Child, Container, ExitStatus, Namespace, Rlimit, Runctl, Stdio};

use super::{CappedBuffer, RunError, RunSpec, TerminationCause, finish};
use crate::types::{ExecutionResult, TerminationSignal};

const SANDBOX_WORKDIR: &str = "/box";
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const READ_CHUNK: usize = 8192;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Exit code hakoniwa reports when the container itself failed, e.g. the
/// program could not be exec'd.
const CONTAINER_FAILURE: i32 = 125;

const BANNED_SYSCALLS: &[&str] = &[
    "mount", "umount2", "reboot", "socket", "bind", "connect", "listen", "sendto", "recvfrom",
    "ptrace", "kexec_load",
];

/// Runs programs inside a hakoniwa container: fresh namespaces, a seccomp
/// filter and the job workspace bind-mounted read-write at `/box`.
///
/// hakoniwa's own wall clock only has second granularity and stays as a
/// backstop; the millisecond deadline and the output cap are enforced here
/// by killing the container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSandbox;

impl ContainerSandbox {
    pub async fn run(&self, spec: &RunSpec) -> Result<ExecutionResult, RunError> {
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || run_blocking(&spec))
            .await
            .map_err(|e| RunError::Io(std::io::Error::other(e)))?
    }
}

fn build_container(workspace: &Path, spec: &RunSpec) -> Result<Container, RunError> {
    let mut container = Container::new();

    let mut filter = Filter::new(Action::Allow);

    #[cfg(target_arch = "x86_64")]
    {
        filter.add_arch(Arch::X8664);
        filter.add_arch(Arch::X86);
        filter.add_arch(Arch::X32);
    }

    container
        .unshare(Namespace::Cgroup)
        .unshare(Namespace::Ipc)
        .unshare(Namespace::Uts)
        .unshare(Namespace::Network);

    BANNED_SYSCALLS.iter().for_each(|syscall| {
        filter.add_rule(Action::Errno(libc::EPERM), syscall);
    });

    container.rootfs("/").map_err(|e| RunError::Spawn {
        program: spec.argv.first().cloned().unwrap_or_default(),
        reason: format!("unable to mount root fs: {}", e),
    })?;
    container.seccomp_filter(filter);

    let workspace = workspace.to_string_lossy().to_string();
    container.bindmount_rw(&workspace, SANDBOX_WORKDIR);
    container.runctl(Runctl::GetProcPidStatus);

    let cpu_seconds = spec.timeout.as_secs() + 1;
    container.setrlimit(Rlimit::Cpu, cpu_seconds, cpu_seconds);

    if let Some(mb) = spec.memory_limit_mb.filter(|_| spec.address_space_limit) {
        let bytes = mb * 1024 * 1024;
        container.setrlimit(Rlimit::As, bytes, bytes);
    }

    Ok(container)
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// hakoniwa execs the program path as given, with no PATH lookup, so bare
/// names are resolved here. The container's root is the host's `/`, which
/// makes a host-side lookup valid inside the container.
fn resolve_program(program: &str) -> Result<String, RunError> {
    if let Some(rest) = program.strip_prefix("./") {
        return Ok(format!("{}/{}", SANDBOX_WORKDIR, rest));
    }
    if program.contains('/') {
        return Ok(program.to_string());
    }
    SANDBOX_PATH
        .split(':')
        .map(|dir| PathBuf::from(dir).join(program))
        .find(|candidate| is_executable(candidate))
        .map(|path| path.to_string_lossy().to_string())
        .ok_or_else(|| RunError::Spawn {
            program: program.to_string(),
            reason: format!("not found in {}", SANDBOX_PATH),
        })
}

fn drain<R: Read>(mut reader: R, limit: usize, cause: Option<&TerminationCause>) -> CappedBuffer {
    let mut buffer = CappedBuffer::new(limit);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if buffer.push(&chunk[..n]) {
            if let Some(cause) = cause {
                // the supervising thread sees this and kills the container
                cause.set(TerminationSignal::OutputLimit);
                break;
            }
        }
    }
    buffer
}

fn join_buffer(handle: Option<thread::ScopedJoinHandle<'_, CappedBuffer>>, limit: usize) -> CappedBuffer {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_else(|| CappedBuffer::new(limit))
}

fn hakoniwa_io(e: hakoniwa::Error) -> RunError {
    RunError::Io(std::io::Error::other(e.to_string()))
}

/// Polls the container until it exits, the deadline passes or a drain thread
/// reports an output overflow. The last two kill it.
fn supervise(
    proc: &mut Child,
    deadline: Instant,
    cause: &TerminationCause,
) -> Result<ExitStatus, RunError> {
    loop {
        if let Some(status) = proc.try_wait().map_err(hakoniwa_io)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            cause.set(TerminationSignal::Timeout);
        }
        if cause.get() != TerminationSignal::None {
            tracing::debug!(pid = proc.id(), cause = ?cause.get(), "killing container");
            proc.kill().map_err(hakoniwa_io)?;
            return proc.wait().map_err(hakoniwa_io);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn run_blocking(spec: &RunSpec) -> Result<ExecutionResult, RunError> {
    let (program, args) = spec.argv.split_first().ok_or(RunError::EmptyCommand)?;
    let resolved = resolve_program(program)?;
    let container = build_container(&spec.cwd, spec)?;

    let mut cmd = container.command(&resolved);
    cmd.current_dir(SANDBOX_WORKDIR)
        .args(args)
        .env("PATH", SANDBOX_PATH)
        .env("HOME", SANDBOX_WORKDIR)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Backstop only; `supervise` enforces the precise deadline.
    let wall_seconds = spec.timeout.as_secs() + 2;
    cmd.wait_timeout(wall_seconds);

    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut proc = cmd.spawn().map_err(|e| RunError::Spawn {
        program: program.clone(),
        reason: e.to_string(),
    })?;

    let stdin = proc.stdin.take();
    let stdout = proc.stdout.take();
    let stderr = proc.stderr.take();
    let cause = TerminationCause::default();
    let limit = spec.output_limit;
    let input = spec.stdin.as_bytes();

    let (stdout_buf, stderr_buf, status) = thread::scope(|scope| {
        if let Some(mut stdin) = stdin {
            scope.spawn(move || {
                if stdin.write_all(input).is_err() {
                    tracing::debug!("stdin closed early by sandboxed process");
                }
            });
        }
        let out = stdout.map(|out| scope.spawn(|| drain(out, limit, Some(&cause))));
        let err = stderr.map(|err| scope.spawn(move || drain(err, limit, None)));

        let status = supervise(&mut proc, deadline, &cause);
        (join_buffer(out, limit), join_buffer(err, limit), status)
    });
    let elapsed = started.elapsed();
    let status = status?;

    if elapsed >= spec.timeout {
        cause.set(TerminationSignal::Timeout);
    }

    tracing::debug!(
        code = status.code,
        reason = %status.reason,
        elapsed_ms = elapsed.as_millis() as u64,
        "container process finished"
    );

    let (exit_code, os_signal) = match status.exit_code {
        Some(code) => (Some(code), None),
        // killed by us: hakoniwa reports the container failure code
        None if cause.get() != TerminationSignal::None => (None, Some(libc::SIGKILL)),
        None if status.code == CONTAINER_FAILURE => {
            return Err(RunError::Spawn {
                program: program.clone(),
                reason: status.reason,
            });
        }
        None => (None, Some(status.code - 128)),
    };

    Ok(finish(
        exit_code,
        os_signal,
        stdout_buf,
        stderr_buf,
        cause.get(),
        elapsed,
    ))
}
