use anyhow::Result;
use clap::Parser;
use gameapd_api::{ApiGDTaskRepository, CachedServerRepository, HttpApiClient};
use gameapd_commands::{LocalRepositoryFetcher, ServerCommandFactory};
use gameapd_config::Config;
use gameapd_domain::{GDTaskRepository, ServerRepository};
use gameapd_executor::ProcessExecutor;
use gameapd_scheduler::{StatusReconciler, TaskManager};
use gameapd_supervisor::ProcessSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod extractor;

/// GameAP daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE", default_value = "gameapd.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_from_file(&args.config)?;

    initialize_logging(args.debug, &config.log_level)?;

    info!("Starting GameAP Daemon");
    info!("Config file: {}", args.config);

    let cfg = Arc::new(config);
    let ctx = CancellationToken::new();

    let executor = Arc::new(ProcessExecutor::new());

    let api_client = Arc::new(HttpApiClient::new(&cfg)?);
    let server_repo = Arc::new(CachedServerRepository::new(api_client.clone()));
    let task_repo: Arc<dyn GDTaskRepository> =
        Arc::new(ApiGDTaskRepository::new(api_client, server_repo.clone()));

    let supervisor = build_supervisor(cfg.clone(), executor.clone());
    let shared_server_repo: Arc<dyn ServerRepository> = server_repo.clone();

    let factory = Arc::new(ServerCommandFactory::new(
        cfg.clone(),
        shared_server_repo.clone(),
        executor.clone(),
        supervisor,
        Arc::new(LocalRepositoryFetcher),
        Arc::new(extractor::ToolExtractor::new(executor.clone())),
    ));

    let task_manager = TaskManager::new(task_repo, factory.clone(), executor, cfg.clone());
    let reconciler = StatusReconciler::new(shared_server_repo, factory);

    let flusher = {
        let server_repo = server_repo.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { server_repo.run(&ctx).await })
    };

    let reconciler_task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { reconciler.run(&ctx).await })
    };

    let manager_task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { task_manager.run(&ctx).await })
    };

    wait_for_shutdown_signal().await;
    info!("Shutting down...");
    ctx.cancel();

    if let Err(e) = manager_task.await {
        error!("task manager terminated abnormally: {e}");
    }
    let _ = reconciler_task.await;
    let _ = flusher.await;

    info!("GameAP Daemon stopped");

    Ok(())
}

fn build_supervisor(
    cfg: Arc<Config>,
    executor: Arc<ProcessExecutor>,
) -> Arc<dyn ProcessSupervisor> {
    if cfg!(windows) {
        Arc::new(gameapd_supervisor::ServiceSupervisor::new(cfg, executor))
    } else {
        Arc::new(gameapd_supervisor::DirectSupervisor::new(cfg))
    }
}

fn initialize_logging(debug: bool, config_level: &str) -> Result<()> {
    let level = if debug { "debug" } else { config_level };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
            _ = signal::ctrl_c() => info!("Received interrupt signal"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }
}
