//! Task manager.
//!
//! Two cooperating loops drive the work feed: the ingest loop polls the
//! control plane for waiting tasks (rate limited to one poll per five
//! seconds), and the worker loop advances one task per tick through the
//! command pipeline. Tasks targeting the same server are ordered by the
//! control plane via `run_after_id` chains; the manager enforces them by
//! skipping a task while its predecessor is still incomplete.

use crate::execute::ExecuteCommand;
use crate::queue::TaskQueue;
use gameapd_commands::{CommandResultReader, GameServerCommand, ServerCommandFactory};
use gameapd_common::{Error, Result, SUCCESS_RESULT};
use gameapd_config::Config;
use gameapd_domain::{GDTask, GDTaskCommand, GDTaskRepository, GDTaskStatus, ServerCommand};
use gameapd_executor::Executor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Minimum time between two task source polls.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker tick; the floor on dispatch latency.
const WORKER_TICK: Duration = Duration::from_millis(100);

/// Output appended to tasks found mid-flight after a daemon restart.
const RESTARTED_TASK_OUTPUT: &str = "Working task failed. GameAP Daemon was restarted.";

fn task_server_command(task: GDTaskCommand) -> Option<ServerCommand> {
    match task {
        GDTaskCommand::GameServerStart => Some(ServerCommand::Start),
        GDTaskCommand::GameServerPause => Some(ServerCommand::Pause),
        GDTaskCommand::GameServerStop => Some(ServerCommand::Stop),
        GDTaskCommand::GameServerKill => Some(ServerCommand::Kill),
        GDTaskCommand::GameServerRestart => Some(ServerCommand::Restart),
        GDTaskCommand::GameServerInstall => Some(ServerCommand::Install),
        GDTaskCommand::GameServerReinstall => Some(ServerCommand::Reinstall),
        GDTaskCommand::GameServerUpdate => Some(ServerCommand::Update),
        GDTaskCommand::GameServerDelete => Some(ServerCommand::Delete),
        GDTaskCommand::CommandExecute | GDTaskCommand::Unknown => None,
    }
}

/// An in-flight command bound to a working task.
enum InProgress {
    Game(Arc<dyn GameServerCommand>),
    Exec(Arc<ExecuteCommand>),
}

impl InProgress {
    fn reader(&self) -> &dyn CommandResultReader {
        match self {
            InProgress::Game(cmd) => cmd.as_ref(),
            InProgress::Exec(cmd) => cmd.as_ref(),
        }
    }
}

/// Scheduler load counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    pub working_count: usize,
    pub waiting_count: usize,
}

/// Ingests, orders and executes daemon tasks.
pub struct TaskManager {
    repository: Arc<dyn GDTaskRepository>,
    factory: Arc<ServerCommandFactory>,
    executor: Arc<dyn Executor>,
    cfg: Arc<Config>,
    queue: TaskQueue,
    commands_in_progress: Mutex<HashMap<i64, InProgress>>,
    last_updated: Mutex<Option<Instant>>,
}

impl TaskManager {
    pub fn new(
        repository: Arc<dyn GDTaskRepository>,
        factory: Arc<ServerCommandFactory>,
        executor: Arc<dyn Executor>,
        cfg: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repository,
            factory,
            executor,
            cfg,
            queue: TaskQueue::new(),
            commands_in_progress: Mutex::new(HashMap::new()),
            last_updated: Mutex::new(None),
        })
    }

    /// Run both loops until the token is cancelled.
    pub async fn run(&self, ctx: &CancellationToken) -> Result<()> {
        self.fail_working_tasks_after_restart().await;

        if let Err(e) = self.update_tasks_if_needed().await {
            error!("failed to update tasks: {e}");
        }

        tokio::join!(self.run_ingest(ctx), self.run_worker(ctx));

        Ok(())
    }

    async fn run_ingest(&self, ctx: &CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.task_manager.update_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.update_tasks_if_needed().await {
                        error!("failed to update tasks: {e}");
                    }
                }
            }
        }
    }

    async fn run_worker(&self, ctx: &CancellationToken) {
        let mut ticker = tokio::time::interval(WORKER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => {
                    if !self.queue.is_empty() {
                        self.run_next(ctx).await;
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> TaskStats {
        let working_count = self.commands_in_progress.lock().unwrap().len();

        TaskStats {
            working_count,
            waiting_count: self.queue.len().saturating_sub(working_count),
        }
    }

    /// Turn tasks the previous daemon run left mid-flight into visible
    /// failures.
    async fn fail_working_tasks_after_restart(&self) {
        let tasks = match self.repository.find_by_status(GDTaskStatus::Working).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("failed to load working tasks: {e}");
                return;
            }
        };

        for task in tasks {
            if let Err(e) = task.set_status(GDTaskStatus::Error) {
                error!(task_id = task.id(), "{e}");
                continue;
            }

            append_task_output(self.repository.as_ref(), &task, RESTARTED_TASK_OUTPUT.as_bytes())
                .await;

            if let Err(e) = self.repository.save(&task).await {
                error!(task_id = task.id(), "failed to save task: {e}");
            }
        }
    }

    async fn run_next(&self, ctx: &CancellationToken) {
        let Some(task) = self.queue.next() else {
            return;
        };

        if self.should_wait_for_another_task(&task) {
            return;
        }

        let step = if task.is_waiting() {
            self.execute_task(ctx, &task).await
        } else if task.is_working() {
            self.proceed_task(&task).await
        } else {
            Ok(())
        };

        if let Err(e) = step {
            error!(task_id = task.id(), "task execution failed: {e}");

            append_task_output(self.repository.as_ref(), &task, e.to_string().as_bytes()).await;
            fail_task(&task);
        }

        if task.is_complete() {
            debug!(task_id = task.id(), "task completed");

            if let Some(server) = task.server() {
                server.notice_task_completed();
            }

            self.queue.remove(task.id());
            self.commands_in_progress.lock().unwrap().remove(&task.id());

            if let Err(e) = self.repository.save(&task).await {
                error!(task_id = task.id(), "failed to save task: {e}");
            }
        }
    }

    fn should_wait_for_another_task(&self, task: &Arc<GDTask>) -> bool {
        if task.run_after_id() <= 0 {
            return false;
        }

        match self.queue.find_by_id(task.run_after_id()) {
            Some(predecessor) => !predecessor.is_complete(),
            None => false,
        }
    }

    async fn execute_task(&self, ctx: &CancellationToken, task: &Arc<GDTask>) -> Result<()> {
        task.set_status(GDTaskStatus::Working)?;

        if let Err(e) = self.repository.save(task).await {
            error!(task_id = task.id(), "failed to save task: {e}");
        }

        if task.task() == GDTaskCommand::CommandExecute {
            return self.execute_command(ctx, task);
        }

        self.execute_game_command(ctx, task)
    }

    fn execute_command(&self, ctx: &CancellationToken, task: &Arc<GDTask>) -> Result<()> {
        let cmd = Arc::new(ExecuteCommand::new(self.cfg.clone(), self.executor.clone()));

        self.commands_in_progress
            .lock()
            .unwrap()
            .insert(task.id(), InProgress::Exec(cmd.clone()));

        debug!(task_id = task.id(), "running task command");

        let repository = self.repository.clone();
        let task = task.clone();
        let ctx = ctx.child_token();
        tokio::spawn(async move {
            if let Err(e) = cmd.execute(&ctx, task.command()).await {
                warn!(task_id = task.id(), "{e}");
                append_task_output(repository.as_ref(), &task, e.to_string().as_bytes()).await;
                fail_task(&task);
            }
        });

        Ok(())
    }

    fn execute_game_command(&self, ctx: &CancellationToken, task: &Arc<GDTask>) -> Result<()> {
        let Some(server_command) = task_server_command(task.task()) else {
            return Err(Error::InvalidTask);
        };
        let Some(server) = task.server().cloned() else {
            return Err(Error::InvalidTask);
        };

        let cmd = self.factory.load_server_command(server_command);

        self.commands_in_progress
            .lock()
            .unwrap()
            .insert(task.id(), InProgress::Game(cmd.clone()));

        debug!(task_id = task.id(), "running task command");

        let repository = self.repository.clone();
        let task = task.clone();
        let ctx = ctx.child_token();
        tokio::spawn(async move {
            if let Err(e) = cmd.execute(&ctx, &server).await {
                warn!(task_id = task.id(), "{e}");

                let mut output = cmd.read_output();
                output.extend_from_slice(e.to_string().as_bytes());
                append_task_output(repository.as_ref(), &task, &output).await;
                fail_task(&task);
            }
        });

        Ok(())
    }

    async fn proceed_task(&self, task: &Arc<GDTask>) -> Result<()> {
        let (complete, result, output) = {
            let commands = self.commands_in_progress.lock().unwrap();
            let Some(cmd) = commands.get(&task.id()) else {
                return Err(Error::internal("task doesn't exist in working tasks"));
            };

            let reader = cmd.reader();
            (reader.is_complete(), reader.result(), reader.read_output())
        };

        if complete {
            self.commands_in_progress.lock().unwrap().remove(&task.id());

            if result == SUCCESS_RESULT {
                task.set_status(GDTaskStatus::Success)?;
            } else {
                fail_task(task);
            }
        }

        append_task_output(self.repository.as_ref(), task, &output).await;

        Ok(())
    }

    async fn update_tasks_if_needed(&self) -> Result<()> {
        {
            let last_updated = self.last_updated.lock().unwrap();
            if let Some(at) = *last_updated {
                if at.elapsed() <= UPDATE_TIMEOUT {
                    return Ok(());
                }
            }
        }

        let tasks = self
            .repository
            .find_by_status(GDTaskStatus::Waiting)
            .await?;

        if !tasks.is_empty() {
            self.queue.insert(tasks);
        }

        *self.last_updated.lock().unwrap() = Some(Instant::now());

        Ok(())
    }
}

fn fail_task(task: &Arc<GDTask>) {
    if let Err(e) = task.set_status(GDTaskStatus::Error) {
        error!(task_id = task.id(), "{e}");
    }
}

async fn append_task_output(repository: &dyn GDTaskRepository, task: &Arc<GDTask>, output: &[u8]) {
    if output.is_empty() {
        return;
    }

    if let Err(e) = repository.append_output(task, output).await {
        error!(task_id = task.id(), "failed to append task output: {e}");
    }
}
