//! Server repository.
//!
//! Read side: a TTL'd read-through cache of `Server` aggregates. A fetch
//! merges into the existing aggregate, and dirty-tracked status fields are
//! never overwritten by a stale fetch: local writes win until flushed.
//! Write side: saves enqueue into a [`CallScheduler`] that uploads state
//! one at a time or in bulk batches.

use crate::client::{ApiClient, ApiRequest};
use crate::limiter::{CallScheduler, Flush};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use gameapd_common::{Error, Result, ResultExt};
use gameapd_domain::{Game, GameMod, InstallationStatus, Server, ServerConfig, ServerRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SERVER_CACHE_TTL_SECS: i64 = 10;

const SCHEDULER_DURATION: Duration = Duration::from_secs(1);
const SCHEDULER_BULK_CALL_FROM: usize = 5;
const SCHEDULER_BULK_SIZE: usize = 100;

const LAST_CHECK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Server document as served by the control plane.
#[derive(Debug, Deserialize)]
struct ServerPayload {
    id: i64,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    installed: i32,
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    name: String,
    uuid: String,
    uuid_short: String,
    #[serde(default)]
    game: Game,
    #[serde(default)]
    game_mod: GameMod,
    #[serde(default, rename = "server_ip")]
    ip: String,
    #[serde(default, rename = "server_port")]
    connect_port: u16,
    #[serde(default)]
    query_port: u16,
    #[serde(default)]
    rcon_port: u16,
    #[serde(default, rename = "rcon")]
    rcon_password: String,
    #[serde(default)]
    dir: String,
    #[serde(default, rename = "su_user")]
    user: String,
    #[serde(default)]
    start_command: String,
    #[serde(default)]
    stop_command: String,
    #[serde(default)]
    force_stop_command: String,
    #[serde(default)]
    restart_command: String,
    #[serde(default)]
    process_active: bool,
    #[serde(default)]
    last_process_check: String,
    #[serde(default)]
    vars: HashMap<String, String>,
    #[serde(default)]
    settings: Vec<serde_json::Value>,
    #[serde(default)]
    updated_at: String,
}

impl ServerPayload {
    fn last_process_check(&self) -> Result<Option<DateTime<Utc>>> {
        if self.last_process_check.is_empty() {
            return Ok(None);
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(&self.last_process_check, LAST_CHECK_FORMAT)
        {
            return Ok(Some(naive.and_utc()));
        }

        DateTime::parse_from_rfc3339(&self.last_process_check)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::validation(format!("bad last_process_check: {e}")))
    }

    fn updated_at(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    /// Settings arrive as `[{name, value}]`; malformed entries are skipped.
    fn settings_map(&self) -> HashMap<String, String> {
        let mut settings = HashMap::new();
        for entry in &self.settings {
            let (Some(name), Some(value)) = (
                entry.get("name").and_then(|v| v.as_str()),
                entry.get("value").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            settings.insert(name.to_string(), value.to_string());
        }
        settings
    }

    fn into_config(self) -> ServerConfig {
        let settings = self.settings_map();
        let updated_at = self.updated_at();

        ServerConfig {
            enabled: self.enabled,
            blocked: self.blocked,
            name: self.name,
            game: self.game,
            game_mod: self.game_mod,
            ip: self.ip,
            connect_port: self.connect_port,
            query_port: self.query_port,
            rcon_port: self.rcon_port,
            rcon_password: self.rcon_password,
            dir: self.dir,
            user: self.user,
            start_command: self.start_command,
            stop_command: self.stop_command,
            force_stop_command: self.force_stop_command,
            restart_command: self.restart_command,
            vars: self.vars,
            settings,
            updated_at,
        }
    }
}

/// Upload document: only dirty-tracked fields are present.
#[derive(Debug, Serialize)]
struct ServerSavePayload {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    installed: Option<i32>,
    process_active: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_process_check: Option<String>,
}

fn save_payload(server: &Server) -> ServerSavePayload {
    let mut payload = ServerSavePayload {
        id: server.id(),
        installed: None,
        process_active: 0,
        last_process_check: None,
    };

    if server.is_installation_status_modified() {
        payload.installed = Some(server.installation_status().code());
    }

    if server.is_status_modified() {
        if server.is_active() {
            payload.process_active = 1;
        }
        if let Some(checked) = server.last_status_check() {
            payload.last_process_check = Some(checked.format(LAST_CHECK_FORMAT).to_string());
        }
    }

    payload
}

/// Stateless API access used by the cache and the flusher.
struct ApiServerRepo {
    client: Arc<dyn ApiClient>,
}

impl ApiServerRepo {
    async fn ids(&self) -> Result<Vec<i64>> {
        let response = self
            .client
            .request(ApiRequest::get("/gdaemon_api/servers"))
            .await?;

        if !response.is_ok() {
            return Err(response.into_error());
        }

        #[derive(Deserialize)]
        struct IdEntry {
            id: i64,
        }

        let entries: Vec<IdEntry> = serde_json::from_slice(&response.body)
            .map_err(|e| Error::validation(format!("bad server list: {e}")))?;

        Ok(entries.into_iter().map(|entry| entry.id).collect())
    }

    async fn fetch(&self, id: i64) -> Result<Option<ServerPayload>> {
        let response = self
            .client
            .request(ApiRequest::get("/gdaemon_api/servers/{id}").with_path_param("id", id))
            .await?;

        if response.is_not_found() {
            return Ok(None);
        }
        if !response.is_ok() {
            return Err(response.into_error().context("failed to find game server"));
        }

        let payload: ServerPayload = serde_json::from_slice(&response.body)
            .map_err(|e| Error::validation(format!("bad server document: {e}")))?;

        Ok(Some(payload))
    }

    async fn save_one(&self, server: &Arc<Server>) -> Result<()> {
        let payload = save_payload(server);
        server.unmark_modified_flag();

        let body = serde_json::to_vec(&payload)
            .map_err(|e| Error::internal(format!("failed to marshal server: {e}")))?;

        let response = self
            .client
            .request(
                ApiRequest::put("/gdaemon_api/servers/{id}", body).with_path_param("id", server.id()),
            )
            .await
            .context("failed to save server")?;

        if !response.is_ok() {
            return Err(response.into_error().context("failed to save server"));
        }

        Ok(())
    }

    async fn save_bulk(&self, servers: &[Arc<Server>]) -> Result<()> {
        let mut payloads = Vec::with_capacity(servers.len());
        for server in servers {
            payloads.push(save_payload(server));
            server.unmark_modified_flag();
        }

        let body = serde_json::to_vec(&payloads)
            .map_err(|e| Error::internal(format!("failed to marshal servers: {e}")))?;

        let response = self
            .client
            .request(ApiRequest::patch("/gdaemon_api/servers", body))
            .await
            .context("failed to bulk save servers")?;

        if !response.is_ok() {
            return Err(response.into_error().context("failed to bulk save servers"));
        }

        Ok(())
    }
}

struct ServerFlusher {
    repo: Arc<ApiServerRepo>,
}

#[async_trait]
impl Flush<Arc<Server>> for ServerFlusher {
    async fn flush_one(&self, server: Arc<Server>) -> Result<()> {
        self.repo.save_one(&server).await
    }

    async fn flush_bulk(&self, servers: Vec<Arc<Server>>) -> Result<()> {
        // repeated saves of one server collapse to its latest state
        let mut deduped: Vec<Arc<Server>> = Vec::with_capacity(servers.len());
        for server in servers {
            if !deduped.iter().any(|s| s.id() == server.id()) {
                deduped.push(server);
            }
        }

        self.repo.save_bulk(&deduped).await
    }
}

struct CacheState {
    servers: HashMap<i64, Arc<Server>>,
    last_updated: HashMap<i64, DateTime<Utc>>,
}

/// TTL'd read-through cache over the API server repo with coalesced
/// write-back.
pub struct CachedServerRepository {
    inner: Arc<ApiServerRepo>,
    scheduler: CallScheduler<Arc<Server>>,
    state: tokio::sync::Mutex<CacheState>,
    ttl: chrono::Duration,
}

impl CachedServerRepository {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        let inner = Arc::new(ApiServerRepo { client });
        let scheduler = CallScheduler::new(
            Box::new(ServerFlusher { repo: inner.clone() }),
            SCHEDULER_DURATION,
            SCHEDULER_BULK_CALL_FROM,
            SCHEDULER_BULK_SIZE,
        );

        Self {
            inner,
            scheduler,
            state: tokio::sync::Mutex::new(CacheState {
                servers: HashMap::new(),
                last_updated: HashMap::new(),
            }),
            ttl: chrono::Duration::seconds(SERVER_CACHE_TTL_SECS),
        }
    }

    /// Shrink the cache TTL (tests).
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Drive the write-back scheduler until cancellation.
    pub async fn run(&self, ctx: &CancellationToken) {
        self.scheduler.run(ctx).await;
    }

    /// Force one write-back step outside the cadence (tests).
    pub async fn flush_pending(&self) {
        self.scheduler.flush_pending().await;
    }

    /// Fetch and merge into the cached aggregate, preserving locally
    /// modified status fields.
    async fn refresh(&self, state: &mut CacheState, id: i64) -> Result<Option<Arc<Server>>> {
        let Some(payload) = self.inner.fetch(id).await? else {
            state.servers.remove(&id);
            state.last_updated.remove(&id);
            return Ok(None);
        };

        let installation_status = InstallationStatus::from_code(payload.installed);
        let process_active = payload.process_active;
        let last_check = payload.last_process_check()?;

        let server = match state.servers.get(&id) {
            Some(server) => {
                server.update_config(payload.into_config());
                server.apply_remote_state(installation_status, process_active, last_check);
                server.clone()
            }
            None => {
                let server = Arc::new(Server::new(
                    payload.id,
                    payload.uuid.clone(),
                    payload.uuid_short.clone(),
                    installation_status,
                    payload.into_config(),
                ));
                server.apply_remote_state(installation_status, process_active, last_check);
                state.servers.insert(id, server.clone());
                server
            }
        };

        state.last_updated.insert(id, Utc::now());

        Ok(Some(server))
    }
}

#[async_trait]
impl ServerRepository for CachedServerRepository {
    async fn ids(&self) -> Result<Vec<i64>> {
        self.inner.ids().await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Arc<Server>>> {
        let mut state = self.state.lock().await;

        let Some(server) = state.servers.get(&id).cloned() else {
            return self.refresh(&mut state, id).await;
        };

        let last_updated = state.last_updated.get(&id).copied();
        let stale = match last_updated {
            Some(at) => {
                Utc::now() - at > self.ttl
                    || server
                        .last_task_completed_at()
                        .map(|done| done > at)
                        .unwrap_or(false)
            }
            None => true,
        };

        if stale && !server.is_modified() {
            debug!(server_id = id, "server cache entry stale, refetching");
            return self.refresh(&mut state, id).await;
        }

        Ok(Some(server))
    }

    async fn save(&self, server: &Arc<Server>) -> Result<()> {
        self.scheduler.put(server.clone());
        Ok(())
    }
}
