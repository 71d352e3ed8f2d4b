//! Start command.

use crate::{CommandResultReader, CommandState, GameServerCommand};
use async_trait::async_trait;
use gameapd_common::{Result, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::OutputBuffer;
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Starts a server through the supervisor. The result is the supervisor's
/// native exit code; a start that never ran keeps the unknown result.
pub struct StartServer {
    supervisor: Arc<dyn ProcessSupervisor>,
    state: CommandState,
    output: OutputBuffer,
}

impl StartServer {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }
}

#[async_trait]
impl GameServerCommand for StartServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        let outcome = match self.supervisor.start(ctx, server, &self.output).await {
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

impl CommandResultReader for StartServer {
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
