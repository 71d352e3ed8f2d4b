//! Periodic server liveness reconciliation.
//!
//! Walks the servers assigned to this node, probes each installed one
//! through the status command and records the observation on the
//! aggregate. Saving goes through the server repository, whose coalescer
//! batches the resulting uploads.

use gameapd_commands::{CommandResultReader, GameServerCommand, ServerCommandFactory};
use gameapd_common::SUCCESS_RESULT;
use gameapd_domain::{InstallationStatus, ServerCommand, ServerRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

pub struct StatusReconciler {
    server_repo: Arc<dyn ServerRepository>,
    factory: Arc<ServerCommandFactory>,
    period: Duration,
}

impl StatusReconciler {
    pub fn new(server_repo: Arc<dyn ServerRepository>, factory: Arc<ServerCommandFactory>) -> Self {
        Self {
            server_repo,
            factory,
            period: DEFAULT_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run reconciliation rounds until the token is cancelled.
    pub async fn run(&self, ctx: &CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = interval.tick() => self.reconcile_round(ctx).await,
            }
        }
    }

    /// One pass over all known servers.
    pub async fn reconcile_round(&self, ctx: &CancellationToken) {
        let ids = match self.server_repo.ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("failed to load server ids: {e}");
                return;
            }
        };

        for id in ids {
            if ctx.is_cancelled() {
                return;
            }

            let server = match self.server_repo.find_by_id(id).await {
                Ok(Some(server)) => server,
                Ok(None) => continue,
                Err(e) => {
                    error!(server_id = id, "failed to load server: {e}");
                    continue;
                }
            };

            if !server.enabled()
                || server.blocked()
                || server.installation_status() != InstallationStatus::Installed
            {
                continue;
            }

            let cmd = self.factory.load_server_command(ServerCommand::Status);
            match cmd.execute(ctx, &server).await {
                Ok(()) => {
                    let active = cmd.result() == SUCCESS_RESULT;
                    debug!(server_id = id, active, "status check finished");
                    server.set_process_active(active);
                }
                Err(e) => {
                    warn!(server_id = id, "status check failed: {e}");
                    server.set_process_active(false);
                }
            }

            if let Err(e) = self.server_repo.save(&server).await {
                error!(server_id = id, "failed to save server: {e}");
            }
        }
    }
}
