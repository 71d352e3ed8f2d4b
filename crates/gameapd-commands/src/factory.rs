//! Command factory.
//!
//! Builds a fresh command instance per `(verb, server)` dispatch so no
//! per-instance state is ever shared between runs. Composites get freshly
//! built sub-commands wired in.

use crate::{
    ArchiveExtractor, CommandList, DeleteServer, GameServerCommand, InstallMode, InstallServer,
    NilCommand, RepositoryFetcher, RestartServer, StartServer, StatusServer, StopMode, StopServer,
};
use gameapd_common::ERROR_RESULT;
use gameapd_config::Config;
use gameapd_domain::{ServerCommand, ServerRepository};
use gameapd_executor::Executor;
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;

/// Builds command instances with their dependencies injected.
pub struct ServerCommandFactory {
    cfg: Arc<Config>,
    server_repo: Arc<dyn ServerRepository>,
    executor: Arc<dyn Executor>,
    supervisor: Arc<dyn ProcessSupervisor>,
    fetcher: Arc<dyn RepositoryFetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl ServerCommandFactory {
    pub fn new(
        cfg: Arc<Config>,
        server_repo: Arc<dyn ServerRepository>,
        executor: Arc<dyn Executor>,
        supervisor: Arc<dyn ProcessSupervisor>,
        fetcher: Arc<dyn RepositoryFetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            cfg,
            server_repo,
            executor,
            supervisor,
            fetcher,
            extractor,
        }
    }

    /// Build a fresh command for the verb.
    pub fn load_server_command(&self, command: ServerCommand) -> Arc<dyn GameServerCommand> {
        match command {
            ServerCommand::Start => Arc::new(self.start()),
            ServerCommand::Stop => Arc::new(self.stop()),
            ServerCommand::Kill => Arc::new(StopServer::new(self.supervisor.clone(), StopMode::Kill)),
            ServerCommand::Restart => Arc::new(RestartServer::new(
                self.supervisor.clone(),
                !self.cfg.scripts.restart.is_empty(),
                self.status(),
                self.stop(),
                self.start(),
            )),
            ServerCommand::Status => Arc::new(self.status()),
            ServerCommand::Install => Arc::new(self.install(InstallMode::Install)),
            ServerCommand::Update => Arc::new(self.install(InstallMode::Update)),
            ServerCommand::Reinstall => Arc::new(CommandList::new(vec![
                Arc::new(self.delete()),
                Arc::new(self.install(InstallMode::Install)),
            ])),
            ServerCommand::Delete => Arc::new(self.delete()),
            ServerCommand::Pause | ServerCommand::Unpause => {
                Arc::new(NilCommand::new("not implemented command", ERROR_RESULT))
            }
        }
    }

    fn start(&self) -> StartServer {
        StartServer::new(self.supervisor.clone())
    }

    fn stop(&self) -> StopServer {
        StopServer::new(self.supervisor.clone(), StopMode::Stop)
    }

    fn status(&self) -> StatusServer {
        StatusServer::new(self.supervisor.clone())
    }

    fn delete(&self) -> DeleteServer {
        DeleteServer::new(
            self.cfg.clone(),
            self.executor.clone(),
            self.status(),
            self.stop(),
        )
    }

    fn install(&self, mode: InstallMode) -> InstallServer {
        InstallServer::new(
            self.cfg.clone(),
            self.executor.clone(),
            self.server_repo.clone(),
            self.fetcher.clone(),
            self.extractor.clone(),
            mode,
            self.status(),
            self.stop(),
        )
    }
}
