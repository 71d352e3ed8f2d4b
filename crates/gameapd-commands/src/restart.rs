//! Restart command.
//!
//! With a native restart script configured the supervisor restarts the
//! server in one step. Without one the command composes its primitives:
//! check status, stop when active (aborting on a failed stop), then start.
//! The recorded output is the status, stop and start outputs in order.

use crate::{CommandResultReader, CommandState, GameServerCommand, StartServer, StatusServer, StopServer};
use async_trait::async_trait;
use gameapd_common::{Result, ResultExt, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::OutputBuffer;
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RestartServer {
    supervisor: Arc<dyn ProcessSupervisor>,
    has_restart_script: bool,
    status_server: StatusServer,
    stop_server: StopServer,
    start_server: StartServer,
    state: CommandState,
    output: OutputBuffer,
}

impl RestartServer {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        has_restart_script: bool,
        status_server: StatusServer,
        stop_server: StopServer,
        start_server: StartServer,
    ) -> Self {
        Self {
            supervisor,
            has_restart_script,
            status_server,
            stop_server,
            start_server,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }

    async fn restart_via_stop_start(
        &self,
        ctx: &CancellationToken,
        server: &Arc<Server>,
    ) -> Result<()> {
        self.status_server
            .execute(ctx, server)
            .await
            .context("failed to check server status")?;
        let active = self.status_server.result() == SUCCESS_RESULT;

        if active {
            self.stop_server
                .execute(ctx, server)
                .await
                .context("failed to stop server")?;

            if self.stop_server.result() != SUCCESS_RESULT {
                self.state.set_result(self.stop_server.result());
                return Ok(());
            }
        }

        self.start_server.execute(ctx, server).await?;

        self.state.set_result(self.start_server.result());

        Ok(())
    }
}

#[async_trait]
impl GameServerCommand for RestartServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        if !self.has_restart_script {
            let result = self.restart_via_stop_start(ctx, server).await;
            self.state.set_complete();
            return result;
        }

        let outcome = match self.supervisor.restart(ctx, server, &self.output).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.set_complete();
                return Err(e);
            }
        };

        self.state.set_result(outcome.code_or(if outcome.is_success() {
            SUCCESS_RESULT
        } else {
            ERROR_RESULT
        }));
        self.state.set_complete();

        if outcome.is_success() {
            server.set_process_active(true);
        }

        Ok(())
    }
}

impl CommandResultReader for RestartServer {
    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn result(&self) -> i32 {
        self.state.result()
    }

    fn read_output(&self) -> Vec<u8> {
        if self.has_restart_script {
            return self.output.read();
        }

        let mut out = Vec::new();
        out.extend(self.status_server.read_output());
        out.extend(self.stop_server.read_output());
        out.extend(self.start_server.read_output());
        out
    }
}
