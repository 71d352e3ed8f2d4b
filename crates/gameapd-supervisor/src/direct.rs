//! Direct supervisor: runs the configured action scripts as children of
//! the daemon itself.
//!
//! Each action builds its full command line by substituting the script
//! template's `{command}` placeholder with the server's own command and
//! then the whole shortcode set. Output from every run is mirrored into a
//! bounded per-server tail ring which `get_output` serves. Liveness comes
//! from the status script when one is configured, otherwise from a
//! zero-signal probe of the pid spawned by the last start.

use crate::{ProcessSupervisor, SupervisorOutcome};
use async_trait::async_trait;
use gameapd_common::{Error, Result, ResultExt};
use gameapd_config::Config;
use gameapd_domain::{make_full_command, Server};
use gameapd_executor::{run_child, spawn_command, ExecutorOptions, OutputBuffer, OutputSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Supervisor that executes scripts directly (POSIX hosts).
pub struct DirectSupervisor {
    cfg: Arc<Config>,
    /// Pid of the in-flight or last spawned start per server.
    pids: Mutex<HashMap<i64, u32>>,
    /// Recorded output tail per server.
    outputs: Mutex<HashMap<i64, Arc<OutputBuffer>>>,
}

impl DirectSupervisor {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            pids: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    fn server_ring(&self, server_id: i64) -> Arc<OutputBuffer> {
        let mut outputs = self.outputs.lock().unwrap();
        outputs
            .entry(server_id)
            .or_insert_with(|| Arc::new(OutputBuffer::new()))
            .clone()
    }

    fn exec_options(&self, server: &Server) -> ExecutorOptions {
        let user = server.user();
        ExecutorOptions {
            work_dir: Some(server.work_dir(&self.cfg)),
            username: (!user.is_empty()).then_some(user),
            fallback_username: None,
        }
    }

    /// Build and run one action script, teeing output into the sink and
    /// the server's tail ring. Returns the child's exit code.
    async fn run_action(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        template: &str,
        server_command: &str,
        out: &dyn OutputSink,
        track_pid: bool,
    ) -> Result<i32> {
        let command = make_full_command(&self.cfg, server, template, server_command);
        if command.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }

        let ring = self.server_ring(server.id());
        let tee = Tee {
            first: out,
            second: &*ring,
        };

        let child = spawn_command(&command, &self.exec_options(server))?;

        // the start pid is recorded as the fallback liveness probe target
        if track_pid {
            if let Some(pid) = child.id() {
                self.pids.lock().unwrap().insert(server.id(), pid);
            }
        }

        run_child(ctx, child, &tee).await
    }

    fn probe_last_pid(&self, server_id: i64) -> bool {
        let pid = self.pids.lock().unwrap().get(&server_id).copied();
        match pid {
            Some(pid) => process_alive(pid),
            None => false,
        }
    }
}

#[async_trait]
impl ProcessSupervisor for DirectSupervisor {
    async fn start(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        let code = self
            .run_action(ctx, server, &self.cfg.scripts.start, &server.start_command(), out, true)
            .await
            .context("failed to execute start command")?;

        Ok(SupervisorOutcome::from_exit_code(code))
    }

    async fn stop(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        let code = self
            .run_action(ctx, server, &self.cfg.scripts.stop, &server.stop_command(), out, false)
            .await
            .context("failed to execute stop command")?;

        Ok(SupervisorOutcome::from_exit_code(code))
    }

    async fn kill(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        let template = if self.cfg.scripts.kill.is_empty() {
            &self.cfg.scripts.stop
        } else {
            &self.cfg.scripts.kill
        };
        let force_command = server.force_stop_command();
        let command = if force_command.is_empty() {
            server.stop_command()
        } else {
            force_command
        };

        match self.run_action(ctx, server, template, &command, out, false).await {
            Ok(code) => Ok(SupervisorOutcome::from_exit_code(code)),
            // no kill script anywhere: fall back to a hard signal
            Err(Error::EmptyCommand) => {
                let pid = self.pids.lock().unwrap().remove(&server.id());
                match pid {
                    Some(pid) => {
                        debug!(pid, "killing server process");
                        kill_process(pid)?;
                        Ok(SupervisorOutcome::success())
                    }
                    None => Ok(SupervisorOutcome::error()),
                }
            }
            Err(e) => Err(e.context("failed to execute kill command")),
        }
    }

    async fn restart(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        if !self.cfg.scripts.restart.is_empty() {
            let code = self
                .run_action(
                    ctx,
                    server,
                    &self.cfg.scripts.restart,
                    &server.restart_command(),
                    out,
                    false,
                )
                .await
                .context("failed to execute restart command")?;

            return Ok(SupervisorOutcome::from_exit_code(code));
        }

        // no native restart: stop (ignoring an already-stopped server) then start
        let status = self.status(ctx, server, out).await?;
        if status.is_success() {
            let stopped = self.stop(ctx, server, out).await?;
            if !stopped.is_success() {
                return Ok(stopped);
            }
        }

        self.start(ctx, server, out).await
    }

    async fn status(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        if self.cfg.scripts.status.is_empty() {
            return Ok(if self.probe_last_pid(server.id()) {
                SupervisorOutcome::success()
            } else {
                SupervisorOutcome::error()
            });
        }

        let code = self
            .run_action(ctx, server, &self.cfg.scripts.status, "", out, false)
            .await
            .context("failed to execute status command")?;

        Ok(SupervisorOutcome::from_exit_code(code))
    }

    async fn get_output(
        &self,
        _ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        let ring = self.server_ring(server.id());
        out.write(&ring.tail());
        Ok(SupervisorOutcome::success())
    }

    async fn send_input(
        &self,
        _ctx: &CancellationToken,
        _input: &str,
        _server: &Server,
        _out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        Err(Error::InputNotSupported)
    }
}

/// Tee sink mirroring writes into two sinks.
struct Tee<'a> {
    first: &'a dyn OutputSink,
    second: &'a dyn OutputSink,
}

impl OutputSink for Tee<'_> {
    fn write(&self, data: &[u8]) {
        self.first.write(data);
        self.second.write(data);
    }
}

/// Non-destructive liveness probe.
fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Hard kill.
fn kill_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| Error::internal(format!("failed to kill process {pid}: {e}")))
    }

    #[cfg(not(unix))]
    {
        Err(Error::internal(format!(
            "cannot kill process {pid} without a kill script"
        )))
    }
}
