//! Install and update commands.
//!
//! The installation engine resolves a source from the server's game mod
//! (falling back to the game itself), stages the payload, places it into
//! the work dir and hands ownership to the server's OS user. Downloading
//! and archive unpacking are collaborator contracts behind
//! [`RepositoryFetcher`] and [`ArchiveExtractor`].
//!
//! The installation status is flushed through the server repository on
//! entry (`InstallInProgress`) and on every exit path, so a crash mid-pipe
//! is the only way to observe an in-progress status from outside.

use crate::{CommandResultReader, CommandState, GameServerCommand, StatusServer, StopServer};
use async_trait::async_trait;
use gameapd_common::{Error, Result, ResultExt, ERROR_RESULT, SUCCESS_RESULT};
use gameapd_config::Config;
use gameapd_domain::{InstallationStatus, Server, ServerRepository};
use gameapd_executor::{Executor, ExecutorOptions, OutputBuffer, OutputSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source the installation payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Directory or archive on this host.
    Local(PathBuf),
    /// Remote repository URL.
    Remote(String),
}

/// Downloads a remote repository into a staging directory.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Fetch `url` into `staging`, returning the path of the payload
    /// (archive or directory).
    async fn fetch(&self, ctx: &CancellationToken, url: &str, staging: &Path) -> Result<PathBuf>;
}

/// Unpacks an archive into a directory.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, ctx: &CancellationToken, archive: &Path, dst: &Path) -> Result<()>;
}

/// Fetcher for nodes whose repositories live on the local filesystem;
/// remote URLs are rejected.
pub struct LocalRepositoryFetcher;

#[async_trait]
impl RepositoryFetcher for LocalRepositoryFetcher {
    async fn fetch(&self, _ctx: &CancellationToken, url: &str, _staging: &Path) -> Result<PathBuf> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(Error::validation(format!(
                "repository is not available: {url}"
            )));
        }
        Ok(path)
    }
}

/// Fresh install or in-place update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Wipe the work dir before placing files; failure reverts the server
    /// to not-installed.
    Install,
    /// Keep existing files; failure leaves the installation status alone.
    Update,
}

/// Installs or updates a server's files.
pub struct InstallServer {
    cfg: Arc<Config>,
    executor: Arc<dyn Executor>,
    server_repo: Arc<dyn ServerRepository>,
    fetcher: Arc<dyn RepositoryFetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    mode: InstallMode,
    status_server: StatusServer,
    stop_server: StopServer,
    state: CommandState,
    output: OutputBuffer,
}

impl InstallServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        executor: Arc<dyn Executor>,
        server_repo: Arc<dyn ServerRepository>,
        fetcher: Arc<dyn RepositoryFetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
        mode: InstallMode,
        status_server: StatusServer,
        stop_server: StopServer,
    ) -> Self {
        Self {
            cfg,
            executor,
            server_repo,
            fetcher,
            extractor,
            mode,
            status_server,
            stop_server,
            state: CommandState::new(),
            output: OutputBuffer::new(),
        }
    }

    /// Pick the installation source: game mod repositories win over game
    /// repositories, local sources over remote ones.
    fn resolve_source(server: &Server) -> Option<InstallSource> {
        let game_mod = server.game_mod();
        let game = server.game();

        for local in [&game_mod.local_repository, &game.local_repository] {
            if !local.is_empty() {
                return Some(InstallSource::Local(PathBuf::from(local)));
            }
        }

        for remote in [&game_mod.remote_repository, &game.remote_repository] {
            if !remote.is_empty() {
                return Some(InstallSource::Remote(remote.clone()));
            }
        }

        None
    }

    async fn stop_if_active(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        self.status_server
            .execute(ctx, server)
            .await
            .context("failed to check server status")?;

        if self.status_server.result() == SUCCESS_RESULT {
            self.output.write(self.status_server.read_output().as_slice());
            self.stop_server
                .execute(ctx, server)
                .await
                .context("failed to stop server")?;
            self.output.write(self.stop_server.read_output().as_slice());
        } else {
            // drop the status probe output, it is not part of the install log
            let _ = self.status_server.read_output();
        }

        Ok(())
    }

    /// The fallible middle of the pipeline; the caller owns status
    /// bookkeeping around it.
    async fn place_files(
        &self,
        ctx: &CancellationToken,
        server: &Arc<Server>,
        source: InstallSource,
    ) -> Result<()> {
        let work_dir = server.work_dir(&self.cfg);

        if self.mode == InstallMode::Install && work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;

        let staging = tempfile::Builder::new()
            .prefix(".gameapd-install")
            .tempdir_in(
                work_dir
                    .parent()
                    .unwrap_or_else(|| Path::new(&self.cfg.work_path)),
            )?;

        let payload = match source {
            InstallSource::Local(path) => path,
            InstallSource::Remote(url) => {
                self.output
                    .write(format!("Downloading {url} ...\n").as_bytes());
                self.fetcher
                    .fetch(ctx, &url, staging.path())
                    .await
                    .context("failed to download repository")?
            }
        };

        if payload.is_dir() {
            copy_dir_recursive(&payload, &work_dir)?;
        } else {
            self.extractor
                .extract(ctx, &payload, &work_dir)
                .await
                .context("failed to extract repository")?;
        }

        chown_recursive(&work_dir, &server.user())?;

        self.run_post_install_script(ctx, server, &work_dir).await?;

        Ok(())
    }

    async fn run_post_install_script(
        &self,
        ctx: &CancellationToken,
        server: &Arc<Server>,
        work_dir: &Path,
    ) -> Result<()> {
        let script = work_dir.join("post-install.sh");
        if !script.exists() {
            return Ok(());
        }

        info!(server_id = server.id(), "running post-install script");

        let user = server.user();
        let code = self
            .executor
            .exec_with_writer(
                ctx,
                "./post-install.sh",
                &self.output,
                ExecutorOptions {
                    work_dir: Some(work_dir.to_path_buf()),
                    username: (!user.is_empty()).then_some(user),
                    fallback_username: None,
                },
            )
            .await
            .context("failed to execute post-install script")?;

        if let Err(e) = std::fs::remove_file(&script) {
            warn!("failed to remove post-install script: {e}");
        }

        if code != SUCCESS_RESULT {
            return Err(Error::internal(format!(
                "post-install script exited with code {code}"
            )));
        }

        Ok(())
    }

    async fn save_server(&self, server: &Arc<Server>) {
        if let Err(e) = self.server_repo.save(server).await {
            warn!("failed to save server: {e}");
        }
    }
}

#[async_trait]
impl GameServerCommand for InstallServer {
    async fn execute(&self, ctx: &CancellationToken, server: &Arc<Server>) -> Result<()> {
        let Some(source) = Self::resolve_source(server) else {
            self.output.write(b"No source to install\n");
            self.state.set_result(ERROR_RESULT);
            self.state.set_complete();
            return Ok(());
        };

        if let Err(e) = self.stop_if_active(ctx, server).await {
            self.state.set_complete();
            return Err(e);
        }

        server.set_installation_status(InstallationStatus::InstallInProgress);
        self.save_server(server).await;

        let placed = self.place_files(ctx, server, source).await;

        match placed {
            Ok(()) => {
                server.set_installation_status(InstallationStatus::Installed);
                self.save_server(server).await;
                self.output.write(b"Installation completed\n");
                self.state.set_result(SUCCESS_RESULT);
                self.state.set_complete();
                Ok(())
            }
            Err(e) => {
                // never leave the server marked as in-progress
                let fallback = match self.mode {
                    InstallMode::Install => InstallationStatus::NotInstalled,
                    InstallMode::Update => InstallationStatus::Installed,
                };
                server.set_installation_status(fallback);
                self.save_server(server).await;

                if e.is_interrupted() {
                    self.state.set_complete();
                    return Err(e);
                }

                self.output.write(format!("{e}\n").as_bytes());
                self.state.set_result(ERROR_RESULT);
                self.state.set_complete();
                Ok(())
            }
        }
    }
}

impl CommandResultReader for InstallServer {
    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn result(&self) -> i32 {
        self.state.result()
    }

    fn read_output(&self) -> Vec<u8> {
        self.output.read()
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Hand the tree to the server's OS user. A missing user is not fatal:
/// installation proceeds under the daemon's own account.
fn chown_recursive(path: &Path, user: &str) -> Result<()> {
    #[cfg(unix)]
    {
        if user.is_empty() {
            return Ok(());
        }

        let Some(user) = nix::unistd::User::from_name(user)
            .map_err(|e| Error::internal(format!("failed to lookup user {user}: {e}")))?
        else {
            warn!(user, "chown skipped, user does not exist");
            return Ok(());
        };

        chown_tree(path, user.uid, user.gid)?;
    }

    #[cfg(not(unix))]
    let _ = (path, user);

    Ok(())
}

#[cfg(unix)]
fn chown_tree(path: &Path, uid: nix::unistd::Uid, gid: nix::unistd::Gid) -> Result<()> {
    nix::unistd::chown(path, Some(uid), Some(gid))
        .map_err(|e| Error::internal(format!("failed to chown {}: {e}", path.display())))?;

    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            chown_tree(&entry?.path(), uid, gid)?;
        }
    }

    Ok(())
}
