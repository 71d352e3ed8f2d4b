//! The `Server` aggregate.
//!
//! A server is shared between the task scheduler, running commands and the
//! server repository. Identity fields are fixed at construction,
//! configuration fields are replaced wholesale when the repository merges a
//! fresh API fetch, and the writable status fields carry dirty flags so a
//! local write is never lost to a stale fetch: local values win until the
//! repository flushes them.

use crate::game::{Game, GameMod};
use chrono::{DateTime, Utc};
use gameapd_config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

/// Installation state of a server, as exchanged with the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationStatus {
    NotInstalled,
    Installed,
    InstallInProgress,
}

impl InstallationStatus {
    /// Wire code used by the API (`installed` field).
    pub fn code(&self) -> i32 {
        match self {
            InstallationStatus::NotInstalled => 0,
            InstallationStatus::Installed => 1,
            InstallationStatus::InstallInProgress => 2,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => InstallationStatus::Installed,
            2 => InstallationStatus::InstallInProgress,
            _ => InstallationStatus::NotInstalled,
        }
    }
}

impl std::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallationStatus::NotInstalled => write!(f, "not_installed"),
            InstallationStatus::Installed => write!(f, "installed"),
            InstallationStatus::InstallInProgress => write!(f, "install_in_progress"),
        }
    }
}

/// Configuration half of the aggregate, replaced as a unit on API merge.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub blocked: bool,
    pub name: String,
    pub game: Game,
    pub game_mod: GameMod,
    pub ip: String,
    pub connect_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    /// Work dir relative to the node work path.
    pub dir: String,
    /// OS user the server runs as.
    pub user: String,
    pub start_command: String,
    pub stop_command: String,
    pub force_stop_command: String,
    pub restart_command: String,
    pub vars: HashMap<String, String>,
    pub settings: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// Status half of the aggregate, with per-field dirty flags.
#[derive(Debug)]
struct ServerState {
    installation_status: InstallationStatus,
    process_active: bool,
    last_status_check: Option<DateTime<Utc>>,
    installation_status_modified: bool,
    status_modified: bool,
    last_task_completed_at: Option<DateTime<Utc>>,
}

/// A game server managed by this node.
#[derive(Debug)]
pub struct Server {
    id: i64,
    uuid: String,
    uuid_short: String,
    config: RwLock<ServerConfig>,
    state: Mutex<ServerState>,
}

impl Server {
    pub fn new(
        id: i64,
        uuid: impl Into<String>,
        uuid_short: impl Into<String>,
        installation_status: InstallationStatus,
        config: ServerConfig,
    ) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            uuid_short: uuid_short.into(),
            config: RwLock::new(config),
            state: Mutex::new(ServerState {
                installation_status,
                process_active: false,
                last_status_check: None,
                installation_status_modified: false,
                status_modified: false,
                last_task_completed_at: None,
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn uuid_short(&self) -> &str {
        &self.uuid_short
    }

    /// Snapshot of the configuration half.
    pub fn config(&self) -> ServerConfig {
        self.config.read().unwrap().clone()
    }

    pub fn enabled(&self) -> bool {
        self.config.read().unwrap().enabled
    }

    pub fn blocked(&self) -> bool {
        self.config.read().unwrap().blocked
    }

    pub fn name(&self) -> String {
        self.config.read().unwrap().name.clone()
    }

    pub fn ip(&self) -> String {
        self.config.read().unwrap().ip.clone()
    }

    pub fn connect_port(&self) -> u16 {
        self.config.read().unwrap().connect_port
    }

    pub fn query_port(&self) -> u16 {
        self.config.read().unwrap().query_port
    }

    pub fn rcon_port(&self) -> u16 {
        self.config.read().unwrap().rcon_port
    }

    pub fn rcon_password(&self) -> String {
        self.config.read().unwrap().rcon_password.clone()
    }

    pub fn user(&self) -> String {
        self.config.read().unwrap().user.clone()
    }

    pub fn game(&self) -> Game {
        self.config.read().unwrap().game.clone()
    }

    pub fn game_mod(&self) -> GameMod {
        self.config.read().unwrap().game_mod.clone()
    }

    pub fn start_command(&self) -> String {
        self.config.read().unwrap().start_command.clone()
    }

    pub fn stop_command(&self) -> String {
        self.config.read().unwrap().stop_command.clone()
    }

    pub fn force_stop_command(&self) -> String {
        self.config.read().unwrap().force_stop_command.clone()
    }

    pub fn restart_command(&self) -> String {
        self.config.read().unwrap().restart_command.clone()
    }

    pub fn vars(&self) -> HashMap<String, String> {
        self.config.read().unwrap().vars.clone()
    }

    pub fn settings(&self) -> HashMap<String, String> {
        self.config.read().unwrap().settings.clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.config.read().unwrap().updated_at
    }

    /// Absolute work dir of the server under the node work path.
    pub fn work_dir(&self, cfg: &Config) -> PathBuf {
        cfg.work_path.join(&self.config.read().unwrap().dir)
    }

    /// Replace the configuration half. Used by the repository when merging
    /// a fresh API fetch; status fields are untouched.
    pub fn update_config(&self, config: ServerConfig) {
        *self.config.write().unwrap() = config;
    }

    pub fn installation_status(&self) -> InstallationStatus {
        self.state.lock().unwrap().installation_status
    }

    /// Record a local installation status change and mark it dirty.
    pub fn set_installation_status(&self, status: InstallationStatus) {
        let mut state = self.state.lock().unwrap();
        state.installation_status = status;
        state.installation_status_modified = true;
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().process_active
    }

    /// Record a local liveness observation and mark the status dirty.
    pub fn set_process_active(&self, active: bool) {
        let mut state = self.state.lock().unwrap();
        state.process_active = active;
        state.last_status_check = Some(Utc::now());
        state.status_modified = true;
    }

    pub fn last_status_check(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_status_check
    }

    pub fn is_installation_status_modified(&self) -> bool {
        self.state.lock().unwrap().installation_status_modified
    }

    pub fn is_status_modified(&self) -> bool {
        self.state.lock().unwrap().status_modified
    }

    /// Any locally-modified field not yet flushed?
    pub fn is_modified(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.installation_status_modified || state.status_modified
    }

    /// Clear dirty flags after a successful flush to the API.
    pub fn unmark_modified_flag(&self) {
        let mut state = self.state.lock().unwrap();
        state.installation_status_modified = false;
        state.status_modified = false;
    }

    /// Overwrite status fields from an API fetch, respecting dirty flags:
    /// a locally-modified field keeps its local value.
    pub fn apply_remote_state(
        &self,
        installation_status: InstallationStatus,
        process_active: bool,
        last_status_check: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state.lock().unwrap();

        if !state.installation_status_modified {
            state.installation_status = installation_status;
        }

        if !state.status_modified {
            state.process_active = process_active;
            state.last_status_check = last_status_check;
        }
    }

    /// Called by the scheduler when a task targeting this server reaches a
    /// terminal status; the repository uses it to shorten the cache TTL so
    /// the next read observes control-plane changes made alongside the task.
    pub fn notice_task_completed(&self) {
        self.state.lock().unwrap().last_task_completed_at = Some(Utc::now());
    }

    pub fn last_task_completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_task_completed_at
    }
}
