use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use marketlog_collector::{CoinMarketCap, CollectorTask, DataSource, Ethplorer, Query};
use marketlog_core::config::{MarketlogConfig, MARKET_PAIRS_LIMIT};
use marketlog_publisher::{GitCli, PublisherOptions, Signature, SnapshotPublisher};
use marketlog_scheduler::{Cadence, JobSpec};
use marketlog_store::LogStore;
use tracing::info;

/// Data-source clients shared by every collector job.
pub struct Sources {
    pub coinmarketcap: Arc<dyn DataSource>,
    pub ethplorer: Arc<dyn DataSource>,
}

impl Sources {
    pub fn from_config(config: &MarketlogConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.collectors.fetch_timeout_secs);
        let coinmarketcap = CoinMarketCap::new(
            Some(config.sources.coinmarketcap_url.clone()),
            config.credentials.get("coinmarketcap"),
            timeout,
        )
        .context("building CoinMarketCap client")?;
        let ethplorer = Ethplorer::new(
            Some(config.sources.ethplorer_url.clone()),
            config.credentials.get("ethplorer"),
            timeout,
        )
        .context("building Ethplorer client")?;
        Ok(Self {
            coinmarketcap: Arc::new(coinmarketcap),
            ethplorer: Arc::new(ethplorer),
        })
    }
}

/// Collection jobs: every interval job has an end-of-day twin that captures
/// the closing state, plus one daily OHLCV job per convert currency.
///
/// Interval jobs run once at startup; the daily ones wait for their slot.
pub fn collector_jobs(
    config: &MarketlogConfig,
    sources: &Sources,
    store: &Arc<LogStore>,
) -> anyhow::Result<Vec<JobSpec>> {
    let target = &config.target;
    let c = &config.collectors;
    let timeout = Duration::from_secs(c.fetch_timeout_secs);
    let daily = Cadence::parse_daily(&c.daily_at).context("collectors.daily_at")?;
    let ohlcv_at = Cadence::parse_daily(&c.ohlcv_at).context("collectors.ohlcv_at")?;

    let collector = |query: Query, source: &Arc<dyn DataSource>| -> Arc<CollectorTask> {
        Arc::new(CollectorTask::new(
            query,
            Arc::clone(source),
            Arc::clone(store),
            timeout,
        ))
    };
    let mut jobs = Vec::new();
    let mut with_daily_twin = |name: String, every_mins: u64, task: Arc<CollectorTask>| {
        jobs.push(JobSpec::new(format!("{name}@daily"), daily.clone(), task.clone()).run_on_start(false));
        jobs.push(JobSpec::new(name, Cadence::every_mins(every_mins), task));
    };

    with_daily_twin(
        "quote".to_string(),
        c.quote_every_mins,
        collector(
            Query::Quote {
                symbol: target.symbol.clone(),
                convert: target.quotes.clone(),
            },
            &sources.coinmarketcap,
        ),
    );

    for slug in &target.slugs {
        with_daily_twin(
            format!("pairs:{slug}"),
            c.pairs_every_mins,
            collector(
                Query::MarketPairs {
                    slug: slug.clone(),
                    symbol: target.symbol.clone(),
                    convert: target.quotes.clone(),
                    limit: MARKET_PAIRS_LIMIT,
                },
                &sources.coinmarketcap,
            ),
        );
    }

    match &target.address {
        Some(address) => with_daily_twin(
            "metric".to_string(),
            c.metric_every_mins,
            collector(
                Query::TokenMetric {
                    symbol: target.symbol.clone(),
                    address: address.clone(),
                },
                &sources.ethplorer,
            ),
        ),
        None => info!("no token address configured; token metric jobs skipped"),
    }

    for convert in &target.quotes {
        jobs.push(
            JobSpec::new(
                format!("ohlcv:{convert}"),
                ohlcv_at.clone(),
                collector(
                    Query::Ohlcv {
                        symbol: target.symbol.clone(),
                        convert: convert.clone(),
                    },
                    &sources.coinmarketcap,
                ),
            )
            .run_on_start(false),
        );
    }

    Ok(jobs)
}

/// Hourly commit-and-push of the report log. Its first run waits one
/// interval so startup collections land in the same commit.
pub fn publisher_job(config: &MarketlogConfig, store: &Arc<LogStore>) -> JobSpec {
    let p = &config.publisher;
    let vcs = GitCli::new(
        Path::new(&p.repo_dir),
        config.store.path.clone(),
        Duration::from_secs(p.commit_timeout_secs),
        Duration::from_secs(p.push_timeout_secs),
    );
    let publisher = SnapshotPublisher::new(
        Arc::clone(store),
        Arc::new(vcs),
        PublisherOptions {
            remote: p.remote.clone(),
            author: Signature::new(p.author_name.clone(), p.author_email.clone()),
            credentials: p.git.clone(),
            push_timeout: Duration::from_secs(p.push_timeout_secs),
        },
    );
    JobSpec::new("publish", Cadence::every_mins(p.every_mins), Arc::new(publisher))
        .enabled(p.enabled)
        .run_on_start(false)
}
