use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use marketlog_core::config::MarketlogConfig;
use marketlog_scheduler::{Scheduler, SchedulerOptions};
use marketlog_store::LogStore;
use tracing::{info, warn};

mod cli;
mod jobs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketlog=info".into()),
        )
        .init();

    let cli = cli::Cli::parse();

    // load config: --config / MARKETLOG_CONFIG > ./marketlog.toml, then flags on top
    let mut config = MarketlogConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config)?;
    config.validate()?;

    info!(
        symbol = %config.target.symbol,
        quotes = ?config.target.quotes,
        slugs = ?config.target.slugs,
        "initializing"
    );

    let log_path = Path::new(&config.publisher.repo_dir).join(&config.store.path);
    let store = Arc::new(
        LogStore::open(&log_path)
            .await
            .with_context(|| format!("opening report log {}", log_path.display()))?,
    );
    info!(path = %log_path.display(), "report log ready");

    let sources = jobs::Sources::from_config(&config)?;
    let mut scheduler = Scheduler::new(SchedulerOptions {
        tick: Duration::from_millis(config.scheduler.tick_ms),
    });

    info!("scheduling");
    for job in jobs::collector_jobs(&config, &sources, &store)? {
        scheduler.register(job)?;
    }
    scheduler.register(jobs::publisher_job(&config, &store))?;
    if config.publisher.git.is_none() {
        warn!("no git credentials; snapshots are committed locally only");
    }

    let handle = scheduler.handle();
    let run = tokio::spawn(scheduler.run());
    info!(jobs = handle.jobs().len(), "started");

    shutdown_signal().await;
    info!("shutdown requested");
    handle.shutdown();
    run.await.context("scheduler task")?;

    for job in handle.jobs() {
        info!(
            job = %job.name,
            runs = job.total_runs,
            failures = job.total_failures,
            dropped_ticks = job.dropped_ticks,
            last_error = job.last_error.as_deref().unwrap_or("-"),
            "job summary"
        );
    }
    Ok(())
}

/// Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
