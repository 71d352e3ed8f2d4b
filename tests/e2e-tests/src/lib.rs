//! Shared harness for daemon end-to-end tests.
//!
//! Each test boots the real component stack (HTTP client, cached server
//! repository, command factory with the direct supervisor, task manager)
//! against a wiremock control plane and a temporary work dir.

use gameapd_api::{ApiGDTaskRepository, CachedServerRepository, HttpApiClient};
use gameapd_commands::{ArchiveExtractor, LocalRepositoryFetcher, ServerCommandFactory};
use gameapd_common::Result;
use gameapd_config::Config;
use gameapd_domain::{GDTaskRepository, ServerRepository};
use gameapd_executor::ProcessExecutor;
use gameapd_scheduler::TaskManager;
use gameapd_supervisor::DirectSupervisor;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

pub struct DaemonHarness {
    pub cfg: Arc<Config>,
    pub server_repo: Arc<CachedServerRepository>,
    pub task_manager: Arc<TaskManager>,
}

struct NoopExtractor;

#[async_trait::async_trait]
impl ArchiveExtractor for NoopExtractor {
    async fn extract(
        &self,
        _ctx: &CancellationToken,
        _archive: &Path,
        _dst: &Path,
    ) -> Result<()> {
        Ok(())
    }
}

impl DaemonHarness {
    pub fn new(mock: &MockServer, work_path: &Path) -> Self {
        let cfg = Arc::new(
            Config::load_from_string(&format!(
                "ds_id: 1\napi_host: \"{}\"\napi_key: key\nwork_path: \"{}\"\nscripts:\n  start: \"{{command}}\"\n  stop: \"{{command}}\"\n  status: \"./command.sh status\"\n",
                mock.uri(),
                work_path.display()
            ))
            .unwrap(),
        );

        let executor = Arc::new(ProcessExecutor::new());
        let api_client = Arc::new(HttpApiClient::new(&cfg).unwrap().with_retries(0));

        let server_repo = Arc::new(CachedServerRepository::new(api_client.clone()));
        let shared_server_repo: Arc<dyn ServerRepository> = server_repo.clone();
        let task_repo: Arc<dyn GDTaskRepository> =
            Arc::new(ApiGDTaskRepository::new(api_client, server_repo.clone()));

        let factory = Arc::new(ServerCommandFactory::new(
            cfg.clone(),
            shared_server_repo,
            executor.clone(),
            Arc::new(DirectSupervisor::new(cfg.clone())),
            Arc::new(LocalRepositoryFetcher),
            Arc::new(NoopExtractor),
        ));

        let task_manager = TaskManager::new(task_repo, factory, executor, cfg.clone());

        Self {
            cfg,
            server_repo,
            task_manager,
        }
    }

    /// Run the task manager until `done` holds or the timeout expires.
    pub async fn run_until<F, Fut>(&self, done: F, timeout: Duration)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let ctx = CancellationToken::new();
        let run = {
            let manager = self.task_manager.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { manager.run(&ctx).await })
        };

        let waited = tokio::time::timeout(timeout, async {
            loop {
                if done().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;

        ctx.cancel();
        let _ = run.await;

        assert!(waited.is_ok(), "daemon did not converge within {timeout:?}");
    }
}

/// Write the standard `command.sh` fixture (echoes its first argument).
pub fn write_command_script(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("command.sh");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "echo \"$1\"").unwrap();
    let mut perm = f.metadata().unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(&path, perm).unwrap();
}

/// The standard server document used across the e2e tests.
pub fn server_document(id: i64, dir: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "enabled": true,
        "installed": 1,
        "blocked": false,
        "name": format!("server {id}"),
        "uuid": format!("00000000-0000-4000-8000-{id:012}"),
        "uuid_short": format!("{id:08}"),
        "game": {"code": "cstrike", "start_code": "cstrike"},
        "game_mod": {"id": 1, "name": "classic"},
        "server_ip": "127.0.0.1",
        "server_port": 27015,
        "query_port": 27016,
        "rcon_port": 27017,
        "rcon": "",
        "dir": dir,
        "su_user": "",
        "start_command": "./command.sh start",
        "stop_command": "./command.sh stop",
        "force_stop_command": "",
        "restart_command": "",
        "process_active": false,
        "last_process_check": "",
        "vars": {},
        "settings": [],
        "updated_at": "2025-04-01T10:00:00Z"
    })
}
