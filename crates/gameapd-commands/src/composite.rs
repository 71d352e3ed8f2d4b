//! Command composition.

use crate::{CommandResultReader, CommandState, GameServerCommand};
use async_trait::async_trait;
use gameapd_common::{Result, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::{OutputBuffer, OutputSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ordered sequence of commands. Runs each in turn, stops on the first
/// non-success and adopts its result; when all succeed the list succeeds.
/// Output is the concatenation of the members' outputs.
pub struct CommandList {
    commands: Vec<Arc<dyn GameServerCommand>>,
    state: CommandState,
}

impl CommandList {
    pub fn new(commands: Vec<Arc<dyn GameServerCommand>>) -> Self {
        Self {
            commands,
            state: CommandState::new(),
        }
    }
}

#[async_trait]
impl GameServerCommand for CommandList {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        for command in &self.commands {
            command.execute(ctx, server).await?;

            if command.result() != SUCCESS_RESULT {
                self.state.set_result(command.result());
                self.state.set_complete();
                return Ok(());
            }
        }

        self.state.set_result(SUCCESS_RESULT);
        self.state.set_complete();

        Ok(())
    }
}

impl CommandResultReader for CommandList {
    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn result(&self) -> i32 {
        self.state.result()
    }

    fn read_output(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for command in &self.commands {
            out.extend(command.read_output());
        }
        out
    }
}

/// Command that does nothing but report a message and a fixed result.
pub struct NilCommand {
    message: String,
    result_code: i32,
    state: CommandState,
    output: OutputBuffer,
}

impl NilCommand {
    pub fn new(message: impl Into<String>, result_code: i32) -> Self {
        Self {
            message: message.into(),
            result_code,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }
}

#[async_trait]
impl GameServerCommand for NilCommand {
    async fn execute(&self, _ctx: &CancellationToken, _server: &Arc<Server>) -> Result<()> {
        self.state.set_complete();
        self.state.set_result(self.result_code);

        self.output.write(self.message.as_bytes());

        Ok(())
    }
}

impl CommandResultReader for NilCommand {
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
