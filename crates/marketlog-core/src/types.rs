use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a [`LogRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Latest price of a symbol in one convert currency.
    Quote,
    /// One exchange market-pair listing.
    Pair,
    /// On-chain token statistics (holders, transfers, supply).
    Metric,
    /// One OHLCV candle.
    Candle,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Quote => "quote",
            RecordKind::Pair => "pair",
            RecordKind::Metric => "metric",
            RecordKind::Candle => "candle",
        };
        write!(f, "{s}")
    }
}

/// One immutable observation, serialised as a single line of the report log.
///
/// `payload` is opaque to the scheduler and the store; only the collector that
/// produced it and downstream readers interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    /// Identifier of the data source that produced the record.
    pub source: String,
    pub payload: serde_json::Value,
}

impl LogRecord {
    pub fn new(kind: RecordKind, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Override the observation time (defaults to creation time).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Access/secret key pair for one data source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyPair {
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl fmt::Debug for ApiKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyPair")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Username/password for pushing to the snapshot remote over HTTP(S).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
