//! # gameapd-domain
//!
//! Domain model shared across the daemon: the `Server` aggregate with
//! dirty tracking of its writable status fields, the `GDTask` unit of work
//! with its status machine, game/mod metadata, and shortcode substitution
//! for command templates.

pub mod game;
pub mod repositories;
pub mod server;
pub mod shortcodes;
pub mod task;

pub use game::{Game, GameMod};
pub use repositories::{GDTaskRepository, ServerRepository};
pub use server::{InstallationStatus, Server, ServerConfig};
pub use shortcodes::{make_full_command, replace_shortcodes};
pub use task::{GDTask, GDTaskCommand, GDTaskStatus};

use serde::{Deserialize, Serialize};

/// Verb the command factory understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCommand {
    Start,
    Pause,
    Unpause,
    Status,
    Stop,
    Kill,
    Restart,
    Update,
    Install,
    Reinstall,
    Delete,
}

impl std::fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerCommand::Start => "start",
            ServerCommand::Pause => "pause",
            ServerCommand::Unpause => "unpause",
            ServerCommand::Status => "status",
            ServerCommand::Stop => "stop",
            ServerCommand::Kill => "kill",
            ServerCommand::Restart => "restart",
            ServerCommand::Update => "update",
            ServerCommand::Install => "install",
            ServerCommand::Reinstall => "reinstall",
            ServerCommand::Delete => "delete",
        };
        write!(f, "{name}")
    }
}
