//! Status command.

use crate::{CommandResultReader, CommandState, GameServerCommand};
use async_trait::async_trait;
use gameapd_common::{Result, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::OutputBuffer;
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reports liveness without side effects: result 0 when the server is
/// running, 1 otherwise.
pub struct StatusServer {
    supervisor: Arc<dyn ProcessSupervisor>,
    state: CommandState,
    output: OutputBuffer,
}

impl StatusServer {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }
}

#[async_trait]
impl GameServerCommand for StatusServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        let outcome = match self.supervisor.status(ctx, server, &self.output).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.set_complete();
                return Err(e);
            }
        };

        self.state.set_result(if outcome.is_success() {
            SUCCESS_RESULT
        } else {
            ERROR_RESULT
        });
        self.state.set_complete();

        Ok(())
    }
}

impl CommandResultReader for StatusServer {
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
