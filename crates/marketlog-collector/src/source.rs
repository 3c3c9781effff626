use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketlog_core::{RecordKind, SourceError};
use serde::{Deserialize, Serialize};

/// One request to a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Latest quote of `symbol` in every `convert` currency.
    Quote { symbol: String, convert: Vec<String> },
    /// Listings on exchange `slug` that involve `symbol`.
    MarketPairs {
        slug: String,
        symbol: String,
        convert: Vec<String>,
        limit: u32,
    },
    /// On-chain statistics of the token contract at `address`.
    TokenMetric { symbol: String, address: String },
    /// Latest daily candle of `symbol` in `convert`.
    Ohlcv { symbol: String, convert: String },
}

impl Query {
    /// Record kind this query produces.
    pub fn kind(&self) -> RecordKind {
        match self {
            Query::Quote { .. } => RecordKind::Quote,
            Query::MarketPairs { .. } => RecordKind::Pair,
            Query::TokenMetric { .. } => RecordKind::Metric,
            Query::Ohlcv { .. } => RecordKind::Candle,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Quote { symbol, convert } => write!(f, "quote {symbol} in {}", convert.join(",")),
            Query::MarketPairs { slug, symbol, .. } => write!(f, "{symbol} pairs on {slug}"),
            Query::TokenMetric { symbol, address } => write!(f, "{symbol} token metric ({address})"),
            Query::Ohlcv { symbol, convert } => write!(f, "{symbol}/{convert} ohlcv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub convert: String,
    pub price: f64,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub percent_change_1h: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub percent_change_7d: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairQuote {
    pub price: Option<f64>,
    pub volume_24h: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPair {
    pub exchange: String,
    /// e.g. "BTC/USDT".
    pub market_pair: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    /// Convert currency → price and volume.
    pub quotes: BTreeMap<String, PairQuote>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MarketPair {
    pub fn involves(&self, symbol: &str) -> bool {
        self.base_symbol.eq_ignore_ascii_case(symbol) || self.quote_symbol.eq_ignore_ascii_case(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetric {
    pub symbol: String,
    pub address: String,
    pub holders_count: Option<u64>,
    pub transfers_count: Option<u64>,
    pub total_supply: Option<String>,
    pub price_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub convert: String,
    pub time_open: Option<DateTime<Utc>>,
    pub time_close: Option<DateTime<Utc>>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Typed result of a [`DataSource::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Quotes(Vec<Quote>),
    MarketPairs(Vec<MarketPair>),
    TokenMetric(TokenMetric),
    Candles(Vec<Candle>),
}

/// Common interface for market-data providers.
///
/// Implementations must be safe to call concurrently from several collector
/// tasks with different queries.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source identifier; also stamped on every record it produces.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &Query) -> Result<Payload, SourceError>;
}

/// Classify a reqwest failure the way every HTTP source reports it.
pub(crate) fn http_error(e: reqwest::Error, timeout: std::time::Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else if e.is_connect() {
        SourceError::Unavailable(e.to_string())
    } else if e.is_decode() {
        SourceError::Parse(e.to_string())
    } else {
        SourceError::Http(e.to_string())
    }
}
