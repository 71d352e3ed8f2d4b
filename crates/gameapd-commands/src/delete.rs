//! Delete command.

use crate::{CommandResultReader, CommandState, GameServerCommand, StatusServer, StopServer};
use async_trait::async_trait;
use gameapd_common::{Result, ResultExt, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_config::Config;
use gameapd_domain::{make_full_command, Server};
use gameapd_executor::{Executor, ExecutorOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Removes a server from the node: stops it when active, then clears its
/// work dir. A configured delete script takes over the removal when
/// present. Result 0 means the work dir is gone or empty; residual files
/// yield result 1.
pub struct DeleteServer {
    cfg: Arc<Config>,
    executor: Arc<dyn Executor>,
    status_server: StatusServer,
    stop_server: StopServer,
    state: CommandState,
    output: gameapd_executor::OutputBuffer,
}

impl DeleteServer {
    pub fn new(
        cfg: Arc<Config>,
        executor: Arc<dyn Executor>,
        status_server: StatusServer,
        stop_server: StopServer,
    ) -> Self {
        Self {
            cfg,
            executor,
            status_server,
            stop_server,
            state: CommandState::new(),
            output: gameapd_executor::OutputBuffer::new(),
        }
    }

    async fn stop_if_active(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        self.status_server
            .execute(ctx, server)
            .await
            .context("failed to check server status")?;

        if self.status_server.result() == SUCCESS_RESULT {
            self.stop_server
                .execute(ctx, server)
                .await
                .context("failed to stop server")?;
        }

        Ok(())
    }

    async fn remove_work_dir(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<i32> {
        if !self.cfg.scripts.delete.is_empty() {
            let command = make_full_command(&self.cfg, server, &self.cfg.scripts.delete, "");
            return self
                .executor
                .exec_with_writer(
                    ctx,
                    &command,
                    &self.output,
                    ExecutorOptions {
                        work_dir: Some(self.cfg.work_path.clone()),
                        ..Default::default()
                    },
                )
                .await
                .context("failed to execute delete command");
        }

        let work_dir = server.work_dir(&self.cfg);
        if !work_dir.exists() {
            return Ok(SUCCESS_RESULT);
        }

        if let Err(e) = std::fs::remove_dir_all(&work_dir) {
            warn!("failed to remove work dir: {e}");
        }

        let residual = work_dir.exists()
            && std::fs::read_dir(&work_dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(true);

        Ok(if residual { ERROR_RESULT } else { SUCCESS_RESULT })
    }
}

#[async_trait]
impl GameServerCommand for DeleteServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        if let Err(e) = self.stop_if_active(ctx, server).await {
            self.state.set_complete();
            return Err(e);
        }

        let code = match self.remove_work_dir(ctx, server).await {
            Ok(code) => code,
            Err(e) => {
                self.state.set_complete();
                return Err(e);
            }
        };

        self.state.set_result(code);
        self.state.set_complete();

        Ok(())
    }
}

impl CommandResultReader for DeleteServer {
    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn result(&self) -> i32 {
        self.state.result()
    }

    fn read_output(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(self.status_server.read_output());
        out.extend(self.stop_server.read_output());
        out.extend(self.output.read());
        out
    }
}
