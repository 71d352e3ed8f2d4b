//! Free-form command execution for `cmd_exec` tasks.

use gameapd_commands::CommandResultReader;
use gameapd_common::Result;
use gameapd_config::Config;
use gameapd_executor::{Executor, ExecutorOptions, OutputBuffer};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one shell command line in the node work dir, with the node path
/// shortcodes substituted.
pub struct ExecuteCommand {
    cfg: Arc<Config>,
    executor: Arc<dyn Executor>,
    complete: AtomicBool,
    result: AtomicI32,
    output: OutputBuffer,
}

impl ExecuteCommand {
    pub fn new(cfg: Arc<Config>, executor: Arc<dyn Executor>) -> Self {
        Self {
            cfg,
            executor,
            complete: AtomicBool::new(false),
            result: AtomicI32::new(gameapd_common::UNKNOWN_RESULT),
            output: OutputBuffer::new(),
        }
    }

    pub async fn execute(&self, ctx: &CancellationToken, command: &str) -> Result<()> {
        let command = command
            .replace("{node_work_path}", &self.cfg.work_path.to_string_lossy())
            .replace("{node_tools_path}", &self.cfg.tools_path().to_string_lossy());

        let run = self
            .executor
            .exec_with_writer(
                ctx,
                &command,
                &self.output,
                ExecutorOptions {
                    work_dir: Some(self.cfg.work_path.clone()),
                    ..Default::default()
                },
            )
            .await;

        match run {
            Ok(code) => {
                self.result.store(code, Ordering::SeqCst);
                self.complete.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.complete.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl CommandResultReader for ExecuteCommand {
    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    fn result(&self) -> i32 {
        self.result.load(Ordering::SeqCst)
    }

    fn read_output(&self) -> Vec<u8> {
        self.output.read()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use gameapd_executor::ProcessExecutor;

    fn config_with_work_path(path: &std::path::Path) -> Arc<Config> {
        Arc::new(
            Config::load_from_string(&format!(
                "ds_id: 1\napi_host: \"https://panel\"\napi_key: key\nwork_path: \"{}\"\n",
                path.display()
            ))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_node_paths_are_substituted() {
        let work = tempfile::tempdir().unwrap();
        let cfg = config_with_work_path(work.path());
        let cmd = ExecuteCommand::new(cfg, Arc::new(ProcessExecutor::new()));

        cmd.execute(&CancellationToken::new(), "echo {node_work_path} {node_tools_path}")
            .await
            .unwrap();

        assert!(cmd.is_complete());
        assert_eq!(cmd.result(), 0);
        let expected = format!("{} {}/tools\n", work.path().display(), work.path().display());
        assert_eq!(cmd.read_output(), expected.as_bytes());
    }

    #[tokio::test]
    async fn test_failing_command_reports_code() {
        let work = tempfile::tempdir().unwrap();
        let cfg = config_with_work_path(work.path());
        let cmd = ExecuteCommand::new(cfg, Arc::new(ProcessExecutor::new()));

        cmd.execute(&CancellationToken::new(), "false").await.unwrap();

        assert!(cmd.is_complete());
        assert_eq!(cmd.result(), 1);
    }
}
