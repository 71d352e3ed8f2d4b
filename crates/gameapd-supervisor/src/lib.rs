//! # gameapd-supervisor
//!
//! Process supervision backends. Both variants implement one capability
//! set behind the [`ProcessSupervisor`] trait:
//!
//! - [`DirectSupervisor`] runs the configured scripts as direct children
//!   (POSIX hosts) and tracks liveness through the status script or a
//!   signal probe of the spawned pid.
//! - [`ServiceSupervisor`] drives an external service manager (Windows
//!   hosts): it renders a service descriptor, installs or refreshes the
//!   service, and dispatches verbs to it.

pub mod descriptor;
pub mod direct;
pub mod service;

pub use descriptor::ServiceDescriptor;
pub use direct::DirectSupervisor;
pub use service::ServiceSupervisor;

use async_trait::async_trait;
use gameapd_common::{Result, SUCCESS_RESULT};
use gameapd_domain::Server;
use gameapd_executor::OutputSink;
use tokio_util::sync::CancellationToken;

/// Success or failure of a supervisor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    Error,
}

/// Result of a supervisor operation: an overall status plus the native
/// exit code when the operation ran a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOutcome {
    pub status: OpStatus,
    pub exit_code: Option<i32>,
}

impl SupervisorOutcome {
    pub fn success() -> Self {
        Self {
            status: OpStatus::Success,
            exit_code: None,
        }
    }

    pub fn error() -> Self {
        Self {
            status: OpStatus::Error,
            exit_code: None,
        }
    }

    /// Map a child exit code: 0 is success, anything else an error.
    pub fn from_exit_code(code: i32) -> Self {
        Self {
            status: if code == SUCCESS_RESULT {
                OpStatus::Success
            } else {
                OpStatus::Error
            },
            exit_code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OpStatus::Success
    }

    /// The native exit code, or `default` when the operation carried none.
    pub fn code_or(&self, default: i32) -> i32 {
        self.exit_code.unwrap_or(default)
    }
}

/// Platform backing that runs and monitors game server processes.
///
/// The contract is identical across variants; see each operation for the
/// success condition.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Ensure the configured start command runs and is tracked.
    async fn start(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;

    /// Ensure the server process is no longer active at return.
    async fn stop(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;

    /// Force the server process down. Defaults to [`Self::stop`]; variants
    /// with a harder path override it.
    async fn kill(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome> {
        self.stop(ctx, server, out).await
    }

    /// Atomic stop + start. Success means the final state is active.
    async fn restart(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;

    /// Report liveness without side effects: success means active.
    async fn status(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;

    /// Write the tail of the server's recorded output into `out`.
    async fn get_output(
        &self,
        ctx: &CancellationToken,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;

    /// Inject a line into the running process's stdin.
    async fn send_input(
        &self,
        ctx: &CancellationToken,
        input: &str,
        server: &Server,
        out: &dyn OutputSink,
    ) -> Result<SupervisorOutcome>;
}
