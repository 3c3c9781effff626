use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ApiKeyPair, GitCredentials};

pub const DEFAULT_CONFIG_FILE: &str = "marketlog.toml";
pub const DEFAULT_LOG_FILE: &str = "report.log";
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PUSH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_COMMIT_TIMEOUT_SECS: u64 = 30;
/// Listings requested per exchange market-pairs call.
pub const MARKET_PAIRS_LIMIT: u32 = 200;
/// Longest accepted job interval: one leap year.
pub const MAX_INTERVAL_MINS: u64 = 366 * 24 * 60;

/// Top-level config (marketlog.toml + MARKETLOG_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketlogConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collectors: CollectorsConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Source identifier (e.g. "coinmarketcap") → key pair.
    #[serde(default)]
    pub credentials: HashMap<String, ApiKeyPair>,
}

/// What to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Ticker symbol, e.g. "BTC".
    #[serde(default)]
    pub symbol: String,
    /// ERC-20 contract address for token metrics. Metric jobs are skipped when unset.
    #[serde(default)]
    pub address: Option<String>,
    /// Convert currencies for quotes and candles.
    #[serde(default = "default_quotes")]
    pub quotes: Vec<String>,
    /// Exchange slugs for market-pair collection.
    #[serde(default = "default_slugs")]
    pub slugs: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            address: None,
            quotes: default_quotes(),
            slugs: default_slugs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Report log path, relative to `publisher.repo_dir`.
    #[serde(default = "default_log_file")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch loop resolution in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

/// Collection cadences. Daily times are "HH:MM" in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_ten")]
    pub quote_every_mins: u64,
    #[serde(default = "default_ten")]
    pub pairs_every_mins: u64,
    #[serde(default = "default_thirty")]
    pub metric_every_mins: u64,
    /// End-of-day capture for quotes, pairs and metrics.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_ohlcv_at")]
    pub ohlcv_at: String,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            quote_every_mins: 10,
            pairs_every_mins: 10,
            metric_every_mins: 30,
            daily_at: default_daily_at(),
            ohlcv_at: default_ohlcv_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_sixty")]
    pub every_mins: u64,
    /// Git working tree that contains the report log.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// Push is skipped (local-only history) when unset.
    #[serde(default)]
    pub git: Option<GitCredentials>,
    #[serde(default = "default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,
    #[serde(default = "default_push_timeout_secs")]
    pub push_timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_mins: 60,
            repo_dir: default_repo_dir(),
            remote: default_remote(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            git: None,
            commit_timeout_secs: DEFAULT_COMMIT_TIMEOUT_SECS,
            push_timeout_secs: DEFAULT_PUSH_TIMEOUT_SECS,
        }
    }
}

/// Base URLs of the HTTP data sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_coinmarketcap_url")]
    pub coinmarketcap_url: String,
    #[serde(default = "default_ethplorer_url")]
    pub ethplorer_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            coinmarketcap_url: default_coinmarketcap_url(),
            ethplorer_url: default_ethplorer_url(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_quotes() -> Vec<String> {
    vec!["USD".to_string()]
}
fn default_slugs() -> Vec<String> {
    vec!["binance".to_string()]
}
fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}
fn default_commit_timeout_secs() -> u64 {
    DEFAULT_COMMIT_TIMEOUT_SECS
}
fn default_push_timeout_secs() -> u64 {
    DEFAULT_PUSH_TIMEOUT_SECS
}
fn default_ten() -> u64 {
    10
}
fn default_thirty() -> u64 {
    30
}
fn default_sixty() -> u64 {
    60
}
fn default_daily_at() -> String {
    "23:59".to_string()
}
fn default_ohlcv_at() -> String {
    "09:05".to_string()
}
fn default_repo_dir() -> String {
    ".".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_author_name() -> String {
    "marketlog".to_string()
}
fn default_author_email() -> String {
    "marketlog@localhost".to_string()
}
fn default_coinmarketcap_url() -> String {
    "https://pro-api.coinmarketcap.com".to_string()
}
fn default_ethplorer_url() -> String {
    "https://api.ethplorer.io".to_string()
}

impl MarketlogConfig {
    /// Load config from a TOML file with MARKETLOG_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `MARKETLOG_PUBLISHER__GIT__USERNAME`. A missing default file is not an
    /// error, but an explicitly named one is. Every field has a default except
    /// `target.symbol`, which [`validate`](Self::validate) checks.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !std::path::Path::new(path).is_file() {
                return Err(ConfigError::Load(format!("config file not found: {path}")));
            }
        }
        let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MARKETLOG_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Reject values no job could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("target.symbol is required".into()));
        }
        if self.target.quotes.is_empty() {
            return Err(ConfigError::Invalid(
                "target.quotes needs at least one currency".into(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_ms must be > 0".into()));
        }
        let c = &self.collectors;
        let intervals = [
            c.quote_every_mins,
            c.pairs_every_mins,
            c.metric_every_mins,
            self.publisher.every_mins,
        ];
        if intervals.contains(&0) {
            return Err(ConfigError::Invalid("job intervals must be > 0 minutes".into()));
        }
        if intervals.iter().any(|mins| *mins > MAX_INTERVAL_MINS) {
            return Err(ConfigError::Invalid(format!(
                "job intervals must be at most {MAX_INTERVAL_MINS} minutes"
            )));
        }
        for (key, at) in [("collectors.daily_at", &c.daily_at), ("collectors.ohlcv_at", &c.ohlcv_at)] {
            if parse_hhmm(at).is_none() {
                return Err(ConfigError::Invalid(format!("{key} must be HH:MM, got {at:?}")));
            }
        }
        if c.fetch_timeout_secs == 0
            || self.publisher.push_timeout_secs == 0
            || self.publisher.commit_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if std::path::Path::new(&self.store.path).is_absolute() {
            return Err(ConfigError::Invalid(
                "store.path must be relative to publisher.repo_dir".into(),
            ));
        }
        for (source, pair) in &self.credentials {
            if pair.access_key.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "credentials.{source}.access_key is empty"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a 24-hour "HH:MM" wall-clock time.
pub fn parse_hhmm(at: &str) -> Option<(u8, u8)> {
    let (h, m) = at.trim().split_once(':')?;
    let hour: u8 = h.parse().ok()?;
    let minute: u8 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Split a comma-separated CLI value ("USD,KRW") into trimmed, non-empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
