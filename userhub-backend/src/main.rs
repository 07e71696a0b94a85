//! UserHub Backend Server
//!
//! Entry point for the userhub-backend server: configuration loading, queue
//! backend connection, worker startup and the HTTP server.

use std::sync::Arc;

use tokio::net::TcpListener;
use userhub_job_queue::{FailureReporter, JobRegistry, QueueManager};

use userhub_backend::state::AppState;

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{
    build_backend, mailer_from_config, parse_bind_address, tracker_from_config,
    worker_options_from_config,
};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help();
        return Ok(());
    }

    // Resolve config path: CLI > environment variable
    let config_path = args
        .config_path
        .or_else(|| std::env::var("USERHUB_CONFIG_PATH").ok());

    let config = load_config(&config_path)?;
    install_tracing_from_config(&config.logging);
    tracing::info!(
        config_path = config_path.as_deref().unwrap_or("-"),
        environment = %config.environment,
        queue_driver = %config.queue.driver,
        "configuration loaded"
    );

    let tracker = tracker_from_config(&config)?;
    let mailer = mailer_from_config(&config)?;

    let mut registry = JobRegistry::new();
    userhub_jobs::register_all_executors(&mut registry, mailer)?;

    let backend = build_backend(&config).await?;
    let reporter = FailureReporter::new(tracker, config.is_development());
    let queue = Arc::new(QueueManager::init(registry, backend.as_ref(), reporter).await?);

    let run_worker = args.worker.unwrap_or(config.worker.enabled);
    let processing = if run_worker {
        Some(queue.start_processing(worker_options_from_config(&config))?)
    } else {
        tracing::info!("worker disabled; jobs are only enqueued by this process");
        None
    };

    let app = userhub_backend::build_router(Arc::new(AppState::new(queue)));

    let addr = parse_bind_address(&config.server.host, config.server.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = processing {
        tracing::info!("waiting for workers to finish in-flight jobs");
        handle.shutdown().await;
    }
    tracing::info!("shutdown complete");

    Ok(())
}

/// Load configuration from file or defaults, then validate it.
fn load_config(path: &Option<String>) -> anyhow::Result<userhub_config::Config> {
    let config = match path.as_deref() {
        Some(p) => userhub_config::load_config(Some(p)),
        None => userhub_config::load_config::<&std::path::Path>(None),
    }
    .map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;

    userhub_config::validate_config(&config).map_err(|e| {
        eprintln!("invalid configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;

    Ok(config)
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
