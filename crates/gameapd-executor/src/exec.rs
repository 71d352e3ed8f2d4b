//! Process execution.
//!
//! Command lines are tokenized with POSIX shell quoting rules, spawned as
//! direct children (no intermediate shell), and their merged stdout/stderr
//! streamed into a sink. The integer code contract: `-1` means the command
//! never ran to completion (missing executable, interruption, signal
//! death); any other value is the child's own exit code.

use crate::output::{NullSink, OutputSink};
use async_trait::async_trait;
use gameapd_common::{Error, Result, UNKNOWN_RESULT};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Options applied to a spawned command.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    /// Working directory for the child.
    pub work_dir: Option<PathBuf>,

    /// Drop privileges to this user before exec (POSIX only).
    pub username: Option<String>,

    /// Used when `username` does not resolve to an OS user.
    pub fallback_username: Option<String>,
}

/// Executes shell command lines on behalf of commands and supervisors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command, discarding its output.
    async fn exec(
        &self,
        ctx: &CancellationToken,
        command: &str,
        options: ExecutorOptions,
    ) -> Result<i32>;

    /// Run a command, streaming merged stdout/stderr into `sink`.
    async fn exec_with_writer(
        &self,
        ctx: &CancellationToken,
        command: &str,
        sink: &dyn OutputSink,
        options: ExecutorOptions,
    ) -> Result<i32>;
}

/// Default executor backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn exec(
        &self,
        ctx: &CancellationToken,
        command: &str,
        options: ExecutorOptions,
    ) -> Result<i32> {
        self.exec_with_writer(ctx, command, &NullSink, options).await
    }

    async fn exec_with_writer(
        &self,
        ctx: &CancellationToken,
        command: &str,
        sink: &dyn OutputSink,
        options: ExecutorOptions,
    ) -> Result<i32> {
        let child = spawn_command(command, &options)?;
        run_child(ctx, child, sink).await
    }
}

/// Tokenize a command line and spawn it as a direct child with piped
/// stdout/stderr. A missing binary surfaces as `ExecutableNotFound` naming
/// the path.
pub fn spawn_command(command: &str, options: &ExecutorOptions) -> Result<Child> {
    let words = shell_words::split(command)
        .map_err(|e| Error::internal(format!("failed to split command: {e}")))?;

    let (executable, args) = match words.split_first() {
        Some((executable, args)) => (executable.clone(), args.to_vec()),
        None => return Err(Error::EmptyCommand),
    };

    debug!(command, "executing command");

    let mut cmd = Command::new(&executable);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref work_dir) = options.work_dir {
        cmd.current_dir(work_dir);
    }

    #[cfg(unix)]
    apply_user(&mut cmd, options)?;

    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::executable_not_found(&executable)
        } else {
            Error::Io(e)
        }
    })
}

/// Grace period between the termination signal and a hard kill.
const FORCE_KILL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Stream the child's merged stdout/stderr into `sink` and wait for it.
/// On cancellation the child is signalled, reaped, and `Interrupted` is
/// returned.
pub async fn run_child(
    ctx: &CancellationToken,
    mut child: Child,
    sink: &dyn OutputSink,
) -> Result<i32> {
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let pump = async {
        tokio::join!(copy_stream(stdout, sink), copy_stream(stderr, sink));
        child.wait().await
    };
    tokio::pin!(pump);

    tokio::select! {
        status = &mut pump => {
            let status = status.map_err(Error::Io)?;
            Ok(status.code().unwrap_or(UNKNOWN_RESULT))
        }
        _ = ctx.cancelled() => {
            warn!("command interrupted");
            terminate_pid(pid);
            // grace period to exit on its own; kill_on_drop finishes it
            let _ = tokio::time::timeout(FORCE_KILL_TIMEOUT, &mut pump).await;
            Err(Error::Interrupted)
        }
    }
}

async fn copy_stream<R>(stream: Option<R>, sink: &dyn OutputSink)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };

    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.write(&buf[..n]),
            Err(e) => {
                warn!("failed to read process output: {e}");
                break;
            }
        }
    }
}

/// Ask the child to stop gracefully. On Unix this is SIGTERM; elsewhere
/// the hard kill applied after the grace period is the only option.
fn terminate_pid(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("failed to signal child process {pid}: {e}");
        }
    }

    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn apply_user(cmd: &mut Command, options: &ExecutorOptions) -> Result<()> {
    let Some(ref username) = options.username else {
        return Ok(());
    };
    if username.is_empty() {
        return Ok(());
    }

    let user = lookup_user(username)?.or_else(|| {
        options
            .fallback_username
            .as_deref()
            .and_then(|fallback| lookup_user(fallback).ok().flatten())
    });

    match user {
        Some(user) => {
            cmd.uid(user.uid.as_raw()).gid(user.gid.as_raw());
            Ok(())
        }
        None => Err(Error::user_not_found(username.clone())),
    }
}

#[cfg(unix)]
fn lookup_user(name: &str) -> Result<Option<nix::unistd::User>> {
    nix::unistd::User::from_name(name)
        .map_err(|e| Error::internal(format!("failed to lookup user {name}: {e}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::output::OutputBuffer;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        let mut perm = f.metadata().unwrap().permissions();
        perm.set_mode(0o755);
        std::fs::set_permissions(&path, perm).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exec_streams_output_and_returns_code() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "command.sh", "echo \"$1\"");

        let buf = OutputBuffer::new();
        let code = ProcessExecutor::new()
            .exec_with_writer(
                &CancellationToken::new(),
                "./command.sh start",
                &buf,
                ExecutorOptions {
                    work_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(buf.read(), b"start\n");
    }

    #[tokio::test]
    async fn test_missing_executable_reports_path() {
        let dir = tempfile::tempdir().unwrap();

        let err = ProcessExecutor::new()
            .exec(
                &CancellationToken::new(),
                "./invalid_command.sh",
                ExecutorOptions {
                    work_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("executable file not found"), "{message}");
        assert!(message.contains("./invalid_command.sh"), "{message}");
    }

    #[tokio::test]
    async fn test_failing_command_returns_child_code() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "command_fail.sh", "echo \"command failed\"\nexit 1");

        let buf = OutputBuffer::new();
        let code = ProcessExecutor::new()
            .exec_with_writer(
                &CancellationToken::new(),
                "./command_fail.sh",
                &buf,
                ExecutorOptions {
                    work_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(code, 1);
        assert_eq!(buf.read(), b"command failed\n");
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "err.sh", "echo oops >&2");

        let buf = OutputBuffer::new();
        let code = ProcessExecutor::new()
            .exec_with_writer(
                &CancellationToken::new(),
                "./err.sh",
                &buf,
                ExecutorOptions {
                    work_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(buf.read(), b"oops\n");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_child() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "sleep.sh", "sleep 30");

        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = ProcessExecutor::new()
            .exec(
                &ctx,
                "./sleep.sh",
                ExecutorOptions {
                    work_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_quoting_preserves_arguments() {
        let buf = OutputBuffer::new();
        let code = ProcessExecutor::new()
            .exec_with_writer(
                &CancellationToken::new(),
                "echo 'one two' three",
                &buf,
                ExecutorOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(buf.read(), b"one two three\n");
    }
}
