use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};

use super::{CappedBuffer, RunError, RunSpec, TerminationCause, finish};
use crate::types::{ExecutionResult, TerminationSignal};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const READ_CHUNK: usize = 8192;
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Runs programs as ordinary children, each in its own process group so the
/// whole tree can be killed at once.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    /// Time between SIGTERM and SIGKILL.
    kill_grace: Duration,
    /// How long to keep draining pipes after the child is gone.
    drain_grace: Duration,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_millis(100),
            drain_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rlimits {
    address_space: Option<u64>,
    cpu_seconds: u64,
}

impl Rlimits {
    // Runs between fork and exec: only async-signal-safe calls.
    fn apply(&self) -> io::Result<()> {
        if let Some(bytes) = self.address_space {
            set_rlimit(libc::RLIMIT_AS, bytes)?;
        }
        set_rlimit(libc::RLIMIT_CPU, self.cpu_seconds)?;
        set_rlimit(libc::RLIMIT_FSIZE, MAX_FILE_SIZE)?;
        set_rlimit(libc::RLIMIT_CORE, 0)?;
        Ok(())
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type RlimitResource = libc::c_int;

fn set_rlimit(resource: RlimitResource, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn kill_group(pgid: i32, signal: i32) {
    if pgid <= 0 {
        return;
    }
    // SAFETY: plain syscall; ESRCH once the group is gone is expected.
    unsafe {
        libc::killpg(pgid, signal);
    }
}

async fn read_capped<R>(
    mut reader: R,
    buffer: Arc<Mutex<CappedBuffer>>,
    mut trip: Option<oneshot::Sender<()>>,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let overflowed = buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(&chunk[..n]);

        if overflowed {
            if let Some(tx) = trip.take() {
                let _ = tx.send(());
                break;
            }
        }
    }
}

fn take_buffer(buffer: &Arc<Mutex<CappedBuffer>>) -> CappedBuffer {
    let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::replace(&mut *guard, CappedBuffer::new(0))
}

impl ProcessSandbox {
    fn resolve_program(program: &str, cwd: &std::path::Path) -> PathBuf {
        match program.strip_prefix("./") {
            Some(rest) => cwd.join(rest),
            None => PathBuf::from(program),
        }
    }

    pub async fn run(&self, spec: &RunSpec) -> Result<ExecutionResult, RunError> {
        let (program, args) = spec.argv.split_first().ok_or(RunError::EmptyCommand)?;

        let limits = Rlimits {
            address_space: spec
                .memory_limit_mb
                .filter(|_| spec.address_space_limit)
                .map(|mb| mb * 1024 * 1024),
            cpu_seconds: spec.timeout.as_secs() + 1,
        };

        let mut cmd = Command::new(Self::resolve_program(program, &spec.cwd));
        cmd.args(args)
            .current_dir(&spec.cwd)
            .env_clear()
            .env(
                "PATH",
                std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
            )
            .env("HOME", &spec.cwd)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| RunError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let pgid = child.id().map(|pid| pid as i32).unwrap_or(0);

        tracing::debug!(pid = pgid, program = %program, "process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            let input = spec.stdin.clone().into_bytes();
            tokio::spawn(async move {
                // a program that never reads stdin closes the pipe early; not an error
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_buf = Arc::new(Mutex::new(CappedBuffer::new(spec.output_limit)));
        let stderr_buf = Arc::new(Mutex::new(CappedBuffer::new(spec.output_limit)));
        let (trip_tx, mut trip_rx) = oneshot::channel::<()>();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, stdout_buf.clone(), Some(trip_tx))));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, stderr_buf.clone(), None)));

        let cause = TerminationCause::default();

        let exited = tokio::select! {
            status = child.wait() => Some(status?),
            _ = sleep(spec.timeout) => {
                cause.set(TerminationSignal::Timeout);
                None
            }
            Ok(()) = &mut trip_rx => {
                cause.set(TerminationSignal::OutputLimit);
                None
            }
        };

        let status = match exited {
            Some(status) => status,
            None => {
                tracing::debug!(pid = pgid, cause = ?cause.get(), "terminating process group");
                kill_group(pgid, libc::SIGTERM);
                match timeout(self.kill_grace, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        kill_group(pgid, libc::SIGKILL);
                        child.wait().await?
                    }
                }
            }
        };
        let elapsed = started.elapsed();

        // Reap anything the program left running in its group.
        kill_group(pgid, libc::SIGKILL);

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let abort = task.abort_handle();
            if timeout(self.drain_grace, task).await.is_err() {
                abort.abort();
            }
        }

        Ok(finish(
            status.code(),
            status.signal(),
            take_buffer(&stdout_buf),
            take_buffer(&stderr_buf),
            cause.get(),
            elapsed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(argv: &[&str], stdin: &str, timeout_ms: u64, output_limit: usize) -> (tempfile::TempDir, RunSpec) {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: dir.path().to_path_buf(),
            stdin: stdin.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            memory_limit_mb: None,
            address_space_limit: false,
            output_limit,
        };
        (dir, spec)
    }

    #[tokio::test]
    async fn echoes_stdin() {
        let (_dir, spec) = spec(&["cat"], "hello world", 2_000, 1024);
        let result = ProcessSandbox::default().run(&spec).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stdout, "hello world");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.signal, TerminationSignal::None);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_stderr() {
        let (_dir, spec) = spec(&["sh", "-c", "echo oops >&2; exit 3"], "", 2_000, 1024);
        let result = ProcessSandbox::default().run(&spec).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn timeout_kills_silent_loop() {
        let (_dir, spec) = spec(&["sh", "-c", "while :; do :; done"], "", 500, 1024);
        let started = std::time::Instant::now();
        let result = ProcessSandbox::default().run(&spec).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(2_000));
        assert!(!result.success);
        assert_eq!(result.signal, TerminationSignal::Timeout);
    }

    #[tokio::test]
    async fn timeout_kills_grandchildren() {
        let (dir, spec) = spec(
            &["sh", "-c", "(sleep 1; touch late) & wait"],
            "",
            200,
            1024,
        );
        let result = ProcessSandbox::default().run(&spec).await.unwrap();
        assert_eq!(result.signal, TerminationSignal::Timeout);

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert!(!dir.path().join("late").exists());
    }

    #[tokio::test]
    async fn output_limit_stops_runaway_printer() {
        let (_dir, spec) = spec(&["yes"], "", 10_000, 4096);
        let started = std::time::Instant::now();
        let result = ProcessSandbox::default().run(&spec).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.signal, TerminationSignal::OutputLimit);
        assert!(!result.success);
        assert!(result.stdout.ends_with(crate::sandbox::TRUNCATION_MARKER));
        assert!(result.stdout.len() <= 4096 + crate::sandbox::TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn large_output_under_limit_is_complete() {
        let (_dir, spec) = spec(&["sh", "-c", "seq 1 20000"], "", 5_000, 1024 * 1024);
        let result = ProcessSandbox::default().run(&spec).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stdout.lines().count(), 20_000);
        assert!(result.stdout.ends_with("20000\n"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let (_dir, spec) = spec(&["definitely-not-a-real-compiler"], "", 1_000, 1024);
        let err = ProcessSandbox::default().run(&spec).await.unwrap_err();
        assert!(err.is_spawn_failure());
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let (_dir, spec) = spec(&[], "", 1_000, 1024);
        let err = ProcessSandbox::default().run(&spec).await.unwrap_err();
        assert!(matches!(err, RunError::EmptyCommand));
    }

    #[tokio::test]
    async fn runs_relative_program_from_workspace() {
        let (dir, spec) = spec(&["./hello.sh"], "", 2_000, 1024);
        let script = dir.path().join("hello.sh");
        std::fs::write(&script, "#!/bin/sh\necho from-workspace\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let result = ProcessSandbox::default().run(&spec).await.unwrap();
        assert_eq!(result.stdout, "from-workspace\n");
    }
}
