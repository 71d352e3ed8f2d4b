//! # gameapd-commands
//!
//! The per-action command pipeline. Every action against a game server is
//! a command value with the same four-method contract: `execute` runs it,
//! `is_complete`/`result` expose its terminal state, `read_output` drains
//! the output accumulated so far. Composites (restart, reinstall) embed
//! smaller commands and delegate.

pub mod composite;
pub mod delete;
pub mod factory;
pub mod install;
pub mod restart;
pub mod start;
pub mod status;
pub mod stop;

pub use composite::{CommandList, NilCommand};
pub use delete::DeleteServer;
pub use factory::ServerCommandFactory;
pub use install::{
    ArchiveExtractor, InstallMode, InstallServer, InstallSource, LocalRepositoryFetcher,
    RepositoryFetcher,
};
pub use restart::RestartServer;
pub use start::StartServer;
pub use status::StatusServer;
pub use stop::{StopMode, StopServer};

use async_trait::async_trait;
use gameapd_common::{Result, UNKNOWN_RESULT};
use gameapd_domain::Server;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read side of a running command: completion, result code and drained
/// output. `result` is meaningful only once `is_complete` returns true;
/// `read_output` drains and may be called at any time.
pub trait CommandResultReader: Send + Sync {
    fn is_complete(&self) -> bool;

    fn result(&self) -> i32;

    fn read_output(&self) -> Vec<u8>;
}

/// A runnable action against one game server.
///
/// Instances are shared between the worker executing them and the
/// scheduler polling for completion, so all state is interior.
#[async_trait]
pub trait GameServerCommand: CommandResultReader {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()>;
}

/// Completion and result state shared by every command.
#[derive(Debug)]
pub(crate) struct CommandState {
    complete: AtomicBool,
    result: AtomicI32,
}

impl CommandState {
    pub(crate) fn new() -> Self {
        Self {
            complete: AtomicBool::new(false),
            result: AtomicI32::new(UNKNOWN_RESULT),
        }
    }

    pub(crate) fn set_result(&self, result: i32) {
        self.result.store(result, Ordering::SeqCst);
    }

    pub(crate) fn result(&self) -> i32 {
        self.result.load(Ordering::SeqCst)
    }

    pub(crate) fn set_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use gameapd_config::Config;
    use gameapd_domain::{InstallationStatus, Server, ServerConfig};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;

    /// Script that echoes its first argument (`command.sh start` prints
    /// `start`).
    pub fn write_command_script(dir: &Path) {
        write_script(dir, "command.sh", "echo \"$1\"");
    }

    /// Script that echoes `<arg> failed` and exits 1.
    pub fn write_fail_script(dir: &Path) {
        write_script(dir, "command_fail.sh", "echo \"$1 failed\"\nexit 1");
    }

    pub fn write_script(dir: &Path, name: &str, body: &str) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, "{body}").unwrap();
            let mut perm = f.metadata().unwrap().permissions();
            perm.set_mode(0o755);
            std::fs::set_permissions(&path, perm).unwrap();
        }
        #[cfg(not(unix))]
        {
            let _ = (dir, name, body);
            unimplemented!("test scripts are POSIX only");
        }
    }

    pub fn test_config(work_path: &Path, status_script: &str) -> Arc<Config> {
        let yaml = format!(
            "ds_id: 1\napi_host: \"https://panel\"\napi_key: key\nwork_path: \"{}\"\nscripts:\n  start: \"{{command}}\"\n  stop: \"{{command}}\"\n  status: \"{status_script}\"\n",
            work_path.display()
        );
        Arc::new(Config::load_from_string(&yaml).unwrap())
    }

    pub fn server_with_commands(dir: &str, start: &str, stop: &str) -> Arc<Server> {
        Arc::new(Server::new(
            1,
            "f1d2c3b4-0000-4000-8000-000000000001",
            "f1d2c3b4",
            InstallationStatus::Installed,
            ServerConfig {
                enabled: true,
                dir: dir.to_string(),
                start_command: start.to_string(),
                stop_command: stop.to_string(),
                ..Default::default()
            },
        ))
    }
}
