//! Service-manager supervisor.
//!
//! Every operation goes through the host service manager: the server is
//! described by a generated descriptor file, installed (or refreshed) as a
//! service, and then driven with service verbs. Stopping a server also
//! uninstalls the service and removes its descriptor.

use crate::descriptor::ServiceDescriptor;
use crate::{ProcessSupervisor, SupervisorOutcome};
use async_trait::async_trait;
use gameapd_common::{Error, Result, ResultExt, SUCCESS_RESULT};
use gameapd_config::Config;
use gameapd_domain::Server;
use gameapd_executor::{Executor, ExecutorOptions, OutputSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Service exit code for "service could not start".
const ERROR_CODE_CANNOT_START: i32 = 1053;

/// `status` verb exit codes.
const EXIT_CODE_STATUS_NOT_ACTIVE: i32 = 0;
const EXIT_CODE_STATUS_ACTIVE: i32 = 1;

/// Bytes of service log served by `get_output`.
const OUTPUT_SIZE_LIMIT: u64 = 30_000;

/// Supervisor backed by an external service manager (Windows hosts).
pub struct ServiceSupervisor {
    cfg: Arc<Config>,
    executor: Arc<dyn Executor>,
    /// Service-manager binary invoked for every verb.
    manager_command: String,
}

impl ServiceSupervisor {
    pub fn new(cfg: Arc<Config>, executor: Arc<dyn Executor>) -> Self {
        Self {
            cfg,
            executor,
            manager_command: "winsw".to_string(),
        }
    }

    /// Override the service-manager binary (used by tests).
    pub fn with_manager_command(mut self, command: impl Into<String>) -> Self {
        self.manager_command = command.into();
        self
    }

    fn service_name(&self, server: &Server) -> String {
        format!("{}{}", self.cfg.service_prefix, server.id())
    }

    fn service_file(&self, server: &Server) -> PathBuf {
        self.cfg
            .services_config_path
            .join(format!("{}.xml", self.service_name(server)))
    }

    fn log_path(&self, server: &Server) -> PathBuf {
        self.cfg
            .services_config_path
            .join(format!("{}.out.log", self.service_name(server)))
    }

    async fn run_manager_verb(
        &self,
        ctx: &CancellationToken,
        verb: &str,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<i32> {
        self.executor
            .exec_with_writer(
                ctx,
                &format!(
                    "{} {} {}",
                    self.manager_command,
                    verb,
                    self.service_file(server).display()
                ),
                out,
                ExecutorOptions {
                    work_dir: Some(self.cfg.work_path.clone()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Write (or refresh) the descriptor file. Returns true when the file
    /// did not exist before.
    fn make_service(&self, server: &Server) -> Result<bool> {
        std::fs::create_dir_all(&self.cfg.services_config_path)?;

        let service_file = self.service_file(server);
        let created_new = !service_file.exists();

        let descriptor = ServiceDescriptor::for_server(&self.cfg, server, &self.service_name(server))?;
        std::fs::write(&service_file, descriptor.to_xml())?;

        Ok(created_new)
    }

    /// Install-or-refresh the service and run a verb against it, applying
    /// the one-shot reinstall retry when a start is refused.
    async fn command(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        verb: &str,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        check_user(&server.user())?;

        let created_new = self
            .make_service(server)
            .map_err(|e| e.context("failed to make service"))?;

        if created_new {
            let code = self
                .run_manager_verb(ctx, "install", server, out)
                .await
                .context("failed to install service")?;
            if code != SUCCESS_RESULT {
                return Err(Error::internal("failed to install service"));
            }
        } else {
            let code = self
                .run_manager_verb(ctx, "refresh", server, out)
                .await
                .context("failed to refresh service")?;
            if code != SUCCESS_RESULT {
                warn!("failed to refresh service config, trying to install service");

                let code = self
                    .run_manager_verb(ctx, "install", server, out)
                    .await
                    .context("failed to install service")?;
                if code != SUCCESS_RESULT {
                    return Err(Error::internal("failed to refresh and install service"));
                }
            }
        }

        let mut code = self
            .run_manager_verb(ctx, verb, server, out)
            .await
            .context("failed to exec command")?;

        if code == ERROR_CODE_CANNOT_START && verb == "start" {
            self.try_fix_reinstall_service(ctx, server, out)
                .await
                .context("failed to try fix by reinstalling service")?;

            code = self
                .run_manager_verb(ctx, verb, server, out)
                .await
                .context("failed to exec command")?;
        }

        Ok(SupervisorOutcome::from_exit_code(code))
    }

    async fn try_fix_reinstall_service(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<()> {
        if let Err(e) = self.run_manager_verb(ctx, "uninstall", server, out).await {
            warn!("failed to uninstall service: {e}");
        }

        let code = self
            .run_manager_verb(ctx, "install", server, out)
            .await
            .map_err(|e| {
                warn!("failed to install service: {e}");
                e
            })?;

        if code != SUCCESS_RESULT {
            return Err(Error::internal("failed to install service"));
        }

        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for ServiceSupervisor {
    async fn start(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        self.command(ctx, server, "start", out).await
    }

    async fn stop(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        self.run_manager_verb(ctx, "stop", server, out)
            .await
            .context("failed to run stop command")?;

        self.run_manager_verb(ctx, "uninstall", server, out)
            .await
            .context("failed to run uninstall command")?;

        if let Err(e) = std::fs::remove_file(self.service_file(server)) {
            warn!("failed to remove service file: {e}");
        }

        Ok(SupervisorOutcome::success())
    }

    async fn restart(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        self.command(ctx, server, "restart", out).await
    }

    async fn status(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        if !self.service_file(server).exists() {
            debug!("service file not found");
            return Ok(SupervisorOutcome::error());
        }

        let code = self
            .run_manager_verb(ctx, "status", server, out)
            .await
            .context("failed to get service status")?;

        Ok(match code {
            EXIT_CODE_STATUS_ACTIVE => SupervisorOutcome::success(),
            EXIT_CODE_STATUS_NOT_ACTIVE => SupervisorOutcome::error(),
            _ => SupervisorOutcome::error(),
        })
    }

    async fn get_output(
        &self,
        _ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        let log_path = self.log_path(server);
        let data = std::fs::read(&log_path)
            .map_err(Error::Io)
            .context("failed to open log file")?;

        let tail_start = data.len().saturating_sub(OUTPUT_SIZE_LIMIT as usize);
        out.write(&data[tail_start..]);

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

fn check_user(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyUser);
    }

    #[cfg(windows)]
    {
        // a service account must exist on the host
        use std::process::Command;
        let found = Command::new("net")
            .args(["user", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !found {
            return Err(Error::user_not_found(name));
        }
    }

    Ok(())
}
