//! Functional tests for the task manager and reconciler, driven through
//! in-memory repositories and real shell scripts.
#![cfg(unix)]

use crate::manager::TaskManager;
use crate::reconciler::StatusReconciler;
use async_trait::async_trait;
use gameapd_commands::{
    ArchiveExtractor, LocalRepositoryFetcher, RepositoryFetcher, ServerCommandFactory,
};
use gameapd_common::Result;
use gameapd_config::Config;
use gameapd_domain::{
    GDTask, GDTaskCommand, GDTaskRepository, GDTaskStatus, InstallationStatus, Server,
    ServerConfig, ServerRepository,
};
use gameapd_executor::ProcessExecutor;
use gameapd_supervisor::DirectSupervisor;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct InMemoryTaskRepo {
    tasks: Mutex<Vec<Arc<GDTask>>>,
    /// Ids in the order their terminal status was persisted.
    completion_order: Mutex<Vec<i64>>,
}

impl InMemoryTaskRepo {
    fn new(tasks: Vec<Arc<GDTask>>) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(tasks),
            completion_order: Mutex::new(Vec::new()),
        })
    }

    fn completion_order(&self) -> Vec<i64> {
        self.completion_order.lock().unwrap().clone()
    }

    fn find(&self, id: i64) -> Option<Arc<GDTask>> {
        self.tasks.lock().unwrap().iter().find(|t| t.id() == id).cloned()
    }
}

#[async_trait]
impl GDTaskRepository for InMemoryTaskRepo {
    async fn find_by_status(&self, status: GDTaskStatus) -> Result<Vec<Arc<GDTask>>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status() == status)
            .cloned()
            .collect())
    }

    async fn save(&self, task: &Arc<GDTask>) -> Result<()> {
        if task.is_complete() {
            let mut order = self.completion_order.lock().unwrap();
            if !order.contains(&task.id()) {
                order.push(task.id());
            }
        }
        Ok(())
    }

    async fn append_output(&self, task: &Arc<GDTask>, output: &[u8]) -> Result<()> {
        task.append_output(output);
        Ok(())
    }
}

struct InMemoryServerRepo;

#[async_trait]
impl ServerRepository for InMemoryServerRepo {
    async fn ids(&self) -> Result<Vec<i64>> {
        Ok(vec![])
    }

    async fn find_by_id(&self, _id: i64) -> Result<Option<Arc<Server>>> {
        Ok(None)
    }

    async fn save(&self, _server: &Arc<Server>) -> Result<()> {
        Ok(())
    }
}

struct NoopExtractor;

#[async_trait]
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

fn write_command_script(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("command.sh");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "echo \"$1\"").unwrap();
    let mut perm = f.metadata().unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(&path, perm).unwrap();
}

fn test_config(work_path: &Path) -> Arc<Config> {
    Arc::new(
        Config::load_from_string(&format!(
            "ds_id: 1\napi_host: \"https://panel\"\napi_key: key\nwork_path: \"{}\"\nscripts:\n  start: \"{{command}}\"\n  stop: \"{{command}}\"\n",
            work_path.display()
        ))
        .unwrap(),
    )
}

fn test_server(work_path: &Path) -> Arc<Server> {
    std::fs::create_dir_all(work_path.join("s1")).unwrap();
    write_command_script(&work_path.join("s1"));

    Arc::new(Server::new(
        1,
        "ab12cd34-0000-4000-8000-000000000001",
        "ab12cd34",
        InstallationStatus::Installed,
        ServerConfig {
            enabled: true,
            dir: "s1".to_string(),
            start_command: "./command.sh start".to_string(),
            stop_command: "./command.sh stop".to_string(),
            ..Default::default()
        },
    ))
}

fn factory(cfg: Arc<Config>) -> Arc<ServerCommandFactory> {
    let fetcher: Arc<dyn RepositoryFetcher> = Arc::new(LocalRepositoryFetcher);
    Arc::new(ServerCommandFactory::new(
        cfg.clone(),
        Arc::new(InMemoryServerRepo),
        Arc::new(ProcessExecutor::new()),
        Arc::new(DirectSupervisor::new(cfg)),
        fetcher,
        Arc::new(NoopExtractor),
    ))
}

fn manager_for(repo: Arc<InMemoryTaskRepo>, cfg: Arc<Config>) -> Arc<TaskManager> {
    TaskManager::new(
        repo,
        factory(cfg.clone()),
        Arc::new(ProcessExecutor::new()),
        cfg,
    )
}

fn game_task(id: i64, run_after_id: i64, server: &Arc<Server>, command: GDTaskCommand) -> Arc<GDTask> {
    Arc::new(GDTask::new(
        id,
        run_after_id,
        Some(server.clone()),
        command,
        "",
        GDTaskStatus::Waiting,
    ))
}

/// Drive the manager until `done` holds or the timeout expires.
async fn run_until(
    manager: &Arc<TaskManager>,
    done: impl Fn() -> bool,
    timeout: Duration,
) {
    let ctx = CancellationToken::new();
    let run = {
        let manager = manager.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { manager.run(&ctx).await })
    };

    let waited = tokio::time::timeout(timeout, async {
        loop {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    ctx.cancel();
    let _ = run.await;

    assert!(waited.is_ok(), "task manager did not converge in {timeout:?}");
}

#[tokio::test]
async fn test_command_execute_task_runs_and_succeeds() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());

    let task = Arc::new(GDTask::new(
        100,
        0,
        None,
        GDTaskCommand::CommandExecute,
        "echo gameap",
        GDTaskStatus::Waiting,
    ));
    let repo = InMemoryTaskRepo::new(vec![task.clone()]);
    let manager = manager_for(repo.clone(), cfg);

    run_until(&manager, || task.is_complete(), Duration::from_secs(10)).await;

    assert_eq!(task.status(), GDTaskStatus::Success);
    assert_eq!(task.output(), b"gameap\n");
    assert_eq!(repo.completion_order(), vec![100]);
}

#[tokio::test]
async fn test_game_server_start_task_appends_command_output() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());
    let server = test_server(work.path());

    let task = game_task(5, 0, &server, GDTaskCommand::GameServerStart);
    let repo = InMemoryTaskRepo::new(vec![task.clone()]);
    let manager = manager_for(repo, cfg);

    run_until(&manager, || task.is_complete(), Duration::from_secs(10)).await;

    assert_eq!(task.status(), GDTaskStatus::Success);
    assert_eq!(task.output(), b"start\n");
}

#[tokio::test]
async fn test_run_after_chain_completes_in_dependency_order() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());
    let server = test_server(work.path());

    // chain 1 <- 2 <- 3 <- 5 <- 7, seeded shuffled
    let tasks = vec![
        game_task(2, 1, &server, GDTaskCommand::GameServerStop),
        game_task(7, 5, &server, GDTaskCommand::GameServerStart),
        game_task(3, 2, &server, GDTaskCommand::GameServerStop),
        game_task(1, 0, &server, GDTaskCommand::GameServerStart),
        game_task(5, 3, &server, GDTaskCommand::GameServerStart),
    ];
    let repo = InMemoryTaskRepo::new(tasks.clone());
    let manager = manager_for(repo.clone(), cfg);

    run_until(
        &manager,
        || tasks.iter().all(|t| t.is_complete()),
        Duration::from_secs(20),
    )
    .await;

    assert_eq!(repo.completion_order(), vec![1, 2, 3, 5, 7]);
    for task in &tasks {
        assert_eq!(task.status(), GDTaskStatus::Success);
    }
}

#[tokio::test]
async fn test_working_tasks_fail_after_restart() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());
    let server = test_server(work.path());

    let first = Arc::new(GDTask::new(
        10,
        0,
        Some(server.clone()),
        GDTaskCommand::GameServerStart,
        "",
        GDTaskStatus::Working,
    ));
    let second = Arc::new(GDTask::new(
        11,
        0,
        Some(server),
        GDTaskCommand::GameServerStop,
        "",
        GDTaskStatus::Working,
    ));
    let repo = InMemoryTaskRepo::new(vec![first.clone(), second.clone()]);
    let manager = manager_for(repo.clone(), cfg);

    run_until(
        &manager,
        || first.is_complete() && second.is_complete(),
        Duration::from_secs(10),
    )
    .await;

    for task in [&first, &second] {
        assert_eq!(task.status(), GDTaskStatus::Error);
        let output = String::from_utf8(task.output()).unwrap();
        assert!(output.contains("Working task failed. GameAP Daemon was restarted."));
    }
}

#[tokio::test]
async fn test_task_without_server_fails_as_invalid() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());

    let task = Arc::new(GDTask::new(
        20,
        0,
        None,
        GDTaskCommand::GameServerStart,
        "",
        GDTaskStatus::Waiting,
    ));
    let repo = InMemoryTaskRepo::new(vec![task.clone()]);
    let manager = manager_for(repo.clone(), cfg);

    run_until(&manager, || task.is_complete(), Duration::from_secs(10)).await;

    assert_eq!(task.status(), GDTaskStatus::Error);
    let output = String::from_utf8(task.output()).unwrap();
    assert!(output.contains("invalid task"));
    assert_eq!(repo.find(20).unwrap().status(), GDTaskStatus::Error);
}

#[tokio::test]
async fn test_stats_are_empty_after_drain() {
    let work = tempfile::tempdir().unwrap();
    let cfg = test_config(work.path());

    let task = Arc::new(GDTask::new(
        30,
        0,
        None,
        GDTaskCommand::CommandExecute,
        "echo done",
        GDTaskStatus::Waiting,
    ));
    let repo = InMemoryTaskRepo::new(vec![task.clone()]);
    let manager = manager_for(repo, cfg);

    run_until(&manager, || task.is_complete(), Duration::from_secs(10)).await;

    let stats = manager.stats();
    assert_eq!(stats.working_count, 0);
    assert_eq!(stats.waiting_count, 0);
}

mod reconciler {
    use super::*;

    struct SingleServerRepo {
        server: Arc<Server>,
        saved: Mutex<usize>,
    }

    #[async_trait]
    impl ServerRepository for SingleServerRepo {
        async fn ids(&self) -> Result<Vec<i64>> {
            Ok(vec![self.server.id()])
        }

        async fn find_by_id(&self, id: i64) -> Result<Option<Arc<Server>>> {
            Ok((id == self.server.id()).then(|| self.server.clone()))
        }

        async fn save(&self, _server: &Arc<Server>) -> Result<()> {
            *self.saved.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_round_records_liveness_and_saves() {
        let work = tempfile::tempdir().unwrap();
        let yaml = format!(
            "ds_id: 1\napi_host: \"https://panel\"\napi_key: key\nwork_path: \"{}\"\nscripts:\n  status: \"./command.sh status\"\n",
            work.path().display()
        );
        let cfg = Arc::new(Config::load_from_string(&yaml).unwrap());
        let server = test_server(work.path());

        let repo = Arc::new(SingleServerRepo {
            server: server.clone(),
            saved: Mutex::new(0),
        });
        let reconciler = StatusReconciler::new(repo.clone(), factory(cfg));

        reconciler.reconcile_round(&CancellationToken::new()).await;

        assert!(server.is_active());
        assert!(server.is_status_modified());
        assert!(server.last_status_check().is_some());
        assert_eq!(*repo.saved.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_installed_servers_are_skipped() {
        let work = tempfile::tempdir().unwrap();
        let cfg = test_config(work.path());
        let server = test_server(work.path());
        server.set_installation_status(InstallationStatus::NotInstalled);

        let repo = Arc::new(SingleServerRepo {
            server: server.clone(),
            saved: Mutex::new(0),
        });
        let reconciler = StatusReconciler::new(repo.clone(), factory(cfg));

        reconciler.reconcile_round(&CancellationToken::new()).await;

        assert!(!server.is_active());
        assert_eq!(*repo.saved.lock().unwrap(), 0);
    }
}
