//! Daemon tasks handed to this node by the control plane.
//!
//! A task is owned by the scheduler while queued; its status and buffered
//! output sit behind one lock so transitions and appends stay serialized.

use crate::server::Server;
use gameapd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Verb carried by a daemon task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GDTaskCommand {
    #[serde(rename = "cmd_exec")]
    CommandExecute,
    #[serde(rename = "gsstart")]
    GameServerStart,
    #[serde(rename = "gspause")]
    GameServerPause,
    #[serde(rename = "gsstop")]
    GameServerStop,
    #[serde(rename = "gskill")]
    GameServerKill,
    #[serde(rename = "gsrest")]
    GameServerRestart,
    #[serde(rename = "gsinst")]
    GameServerInstall,
    #[serde(rename = "gsreinst")]
    GameServerReinstall,
    #[serde(rename = "gsupd")]
    GameServerUpdate,
    #[serde(rename = "gsdel")]
    GameServerDelete,
    /// Verb this daemon version does not know; fails as an invalid task.
    #[serde(rename = "unknown")]
    Unknown,
}

// Hand-rolled so an unrecognized verb becomes `Unknown` instead of
// rejecting the whole task list.
impl<'de> serde::Deserialize<'de> for GDTaskCommand {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "cmd_exec" => Self::CommandExecute,
            "gsstart" => Self::GameServerStart,
            "gspause" => Self::GameServerPause,
            "gsstop" => Self::GameServerStop,
            "gskill" => Self::GameServerKill,
            "gsrest" => Self::GameServerRestart,
            "gsinst" => Self::GameServerInstall,
            "gsreinst" => Self::GameServerReinstall,
            "gsupd" => Self::GameServerUpdate,
            "gsdel" => Self::GameServerDelete,
            _ => Self::Unknown,
        })
    }
}

/// Lifecycle status of a daemon task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GDTaskStatus {
    Waiting,
    Working,
    Error,
    Success,
    Canceled,
}

impl GDTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GDTaskStatus::Success | GDTaskStatus::Error | GDTaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for GDTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GDTaskStatus::Waiting => write!(f, "waiting"),
            GDTaskStatus::Working => write!(f, "working"),
            GDTaskStatus::Error => write!(f, "error"),
            GDTaskStatus::Success => write!(f, "success"),
            GDTaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug)]
struct TaskState {
    status: GDTaskStatus,
    output: Vec<u8>,
}

/// A unit of work from the control plane.
#[derive(Debug)]
pub struct GDTask {
    id: i64,
    /// Id of the task that must complete first; 0 means none.
    run_after_id: i64,
    server: Option<Arc<Server>>,
    task: GDTaskCommand,
    /// Free-form command line; only meaningful for `CommandExecute`.
    command: String,
    state: Mutex<TaskState>,
}

impl GDTask {
    pub fn new(
        id: i64,
        run_after_id: i64,
        server: Option<Arc<Server>>,
        task: GDTaskCommand,
        command: impl Into<String>,
        status: GDTaskStatus,
    ) -> Self {
        Self {
            id,
            run_after_id,
            server,
            task,
            command: command.into(),
            state: Mutex::new(TaskState {
                status,
                output: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn run_after_id(&self) -> i64 {
        self.run_after_id
    }

    pub fn server(&self) -> Option<&Arc<Server>> {
        self.server.as_ref()
    }

    pub fn task(&self) -> GDTaskCommand {
        self.task
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> GDTaskStatus {
        self.state.lock().unwrap().status
    }

    /// Transition to a new status, rejecting anything the status machine
    /// does not allow.
    pub fn set_status(&self, status: GDTaskStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if !transition_allowed(state.status, status) {
            return Err(Error::invalid_transition(state.status, status));
        }

        state.status = status;
        Ok(())
    }

    pub fn is_waiting(&self) -> bool {
        self.status() == GDTaskStatus::Waiting
    }

    pub fn is_working(&self) -> bool {
        self.status() == GDTaskStatus::Working
    }

    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// Append bytes to the locally accumulated output.
    pub fn append_output(&self, output: &[u8]) {
        if output.is_empty() {
            return;
        }
        self.state.lock().unwrap().output.extend_from_slice(output);
    }

    /// Accumulated output so far.
    pub fn output(&self) -> Vec<u8> {
        self.state.lock().unwrap().output.clone()
    }
}

fn transition_allowed(from: GDTaskStatus, to: GDTaskStatus) -> bool {
    use GDTaskStatus::*;

    matches!(
        (from, to),
        (Waiting, Working)
            | (Waiting, Error)
            | (Waiting, Canceled)
            | (Working, Success)
            | (Working, Error)
            | (Working, Canceled)
    )
}
