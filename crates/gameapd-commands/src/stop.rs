//! Stop and kill commands.

use crate::{CommandResultReader, CommandState, GameServerCommand};
use async_trait::async_trait;
use gameapd_common::{Result, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::OutputBuffer;
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Graceful stop or hard kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Stop,
    Kill,
}

/// Takes a server down through the supervisor.
pub struct StopServer {
    supervisor: Arc<dyn ProcessSupervisor>,
    mode: StopMode,
    state: CommandState,
    output: OutputBuffer,
}

impl StopServer {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, mode: StopMode) -> Self {
        Self {
            supervisor,
            mode,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }
}

#[async_trait]
impl GameServerCommand for StopServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        let run = match self.mode {
            StopMode::Stop => self.supervisor.stop(ctx, server, &self.output).await,
            StopMode::Kill => self.supervisor.kill(ctx, server, &self.output).await,
        };

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.set_complete();
                return Err(e);
            }
        };

        if outcome.is_success() {
            self.state.set_result(SUCCESS_RESULT);
            server.set_process_active(false);
        } else {
            self.state.set_result(outcome.code_or(ERROR_RESULT));
        }
        self.state.set_complete();

        Ok(())
    }
}

impl CommandResultReader for StopServer {
    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn result(&self) -> i32 {
        self.state.result()
    }

    fn read_output(&self) -> Vec<u8> {
        self.output.read()
    }
}
