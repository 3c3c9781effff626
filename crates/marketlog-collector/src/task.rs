use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketlog_core::{LogRecord, RecordKind, SourceError, TaskError};
use marketlog_scheduler::{Task, TaskContext};
use marketlog_store::LogStore;
use serde::Serialize;
use tracing::debug;

use crate::source::{DataSource, Payload, Query};

/// Fetches one query from one source and appends the result to the report log.
///
/// Exactly one fetch and at most one append per execution; nothing is written
/// when the fetch fails or times out.
pub struct CollectorTask {
    query: Query,
    source: Arc<dyn DataSource>,
    store: Arc<LogStore>,
    fetch_timeout: Duration,
}

impl CollectorTask {
    pub fn new(
        query: Query,
        source: Arc<dyn DataSource>,
        store: Arc<LogStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            query,
            source,
            store,
            fetch_timeout,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    async fn fetch(&self) -> Result<Payload, SourceError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch(&self.query)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                ms: self.fetch_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl Task for CollectorTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<usize, TaskError> {
        debug!(job = %ctx.job, query = %self.query, source = self.source.name(), "fetching");
        let payload = self.fetch().await?;
        let records = to_records(&self.query, self.source.name(), payload)?;
        let appended = self.store.append(&records).await?;
        debug!(job = %ctx.job, records = appended, "batch appended");
        Ok(appended)
    }
}

/// Map a payload to log records, all stamped with the same observation time.
pub fn to_records(query: &Query, source: &str, payload: Payload) -> Result<Vec<LogRecord>, SourceError> {
    let stamp = Stamp {
        kind: query.kind(),
        source,
        at: Utc::now(),
    };

    match payload {
        Payload::Quotes(quotes) => quotes.iter().map(|q| stamp.record(q)).collect(),
        Payload::MarketPairs(pairs) => pairs
            .iter()
            .filter(|p| match query {
                Query::MarketPairs { symbol, .. } => p.involves(symbol),
                _ => true,
            })
            .map(|p| stamp.record(p))
            .collect(),
        Payload::TokenMetric(metric) => Ok(vec![stamp.record(&metric)?]),
        Payload::Candles(candles) => candles.iter().map(|c| stamp.record(c)).collect(),
    }
}

struct Stamp<'a> {
    kind: RecordKind,
    source: &'a str,
    at: DateTime<Utc>,
}

impl Stamp<'_> {
    fn record<T: Serialize>(&self, item: &T) -> Result<LogRecord, SourceError> {
        let payload = serde_json::to_value(item).map_err(|e| SourceError::Parse(e.to_string()))?;
        Ok(LogRecord::new(self.kind, self.source, payload).at(self.at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MarketPair, Quote, TokenMetric};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        payload: Result<Payload, SourceError>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn ok(payload: Payload) -> Arc<Self> {
            Arc::new(Self {
                payload: Ok(payload),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: SourceError) -> Arc<Self> {
            Arc::new(Self {
                payload: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DataSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, _query: &Query) -> Result<Payload, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payload.clone()
        }
    }

    fn quote(convert: &str, price: f64) -> Quote {
        Quote {
            symbol: "HDAC".into(),
            convert: convert.into(),
            price,
            volume_24h: None,
            market_cap: None,
            percent_change_1h: None,
            percent_change_24h: None,
            percent_change_7d: None,
            last_updated: None,
        }
    }

    fn pair(name: &str, base: &str, quote: &str) -> MarketPair {
        MarketPair {
            exchange: "upbit".into(),
            market_pair: name.into(),
            base_symbol: base.into(),
            quote_symbol: quote.into(),
            quotes: BTreeMap::new(),
            last_updated: None,
        }
    }

    fn quote_query() -> Query {
        Query::Quote {
            symbol: "HDAC".into(),
            convert: vec!["USD".into(), "KRW".into()],
        }
    }

    async fn store() -> (tempfile::TempDir, Arc<LogStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("report.log")).await.unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn appends_one_record_per_quote() {
        let (_dir, store) = store().await;
        let source = FakeSource::ok(Payload::Quotes(vec![quote("USD", 0.02), quote("KRW", 29.0)]));
        let task = CollectorTask::new(quote_query(), source.clone(), store.clone(), Duration::from_secs(5));

        let n = task.execute(&TaskContext::detached("quote")).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let records = store.snapshot().await.unwrap().records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == RecordKind::Quote && r.source == "fake"));
        assert_eq!(records[0].payload["convert"], "USD");
        assert_eq!(records[1].payload["price"], 29.0);
        assert_eq!(records[0].timestamp, records[1].timestamp);
    }

    #[tokio::test]
    async fn fetch_error_appends_nothing() {
        let (_dir, store) = store().await;
        let source = FakeSource::failing(SourceError::Http("502 bad gateway".into()));
        let task = CollectorTask::new(quote_query(), source, store.clone(), Duration::from_secs(5));

        let err = task.execute(&TaskContext::detached("quote")).await.unwrap_err();
        assert!(matches!(err, TaskError::Source(SourceError::Http(_))));
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[test]
    fn pairs_without_the_symbol_are_dropped() {
        let query = Query::MarketPairs {
            slug: "upbit".into(),
            symbol: "HDAC".into(),
            convert: vec!["USD".into()],
            limit: 200,
        };
        let payload = Payload::MarketPairs(vec![
            pair("HDAC/KRW", "HDAC", "KRW"),
            pair("BTC/KRW", "BTC", "KRW"),
            pair("ETH/HDAC", "ETH", "HDAC"),
        ]);
        let records = to_records(&query, "fake", payload).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == RecordKind::Pair));
        assert_eq!(records[1].payload["market_pair"], "ETH/HDAC");
    }

    #[tokio::test]
    async fn empty_payload_is_success_with_zero_records() {
        let (_dir, store) = store().await;
        let source = FakeSource::ok(Payload::Quotes(Vec::new()));
        let task = CollectorTask::new(quote_query(), source, store.clone(), Duration::from_secs(5));

        assert_eq!(task.execute(&TaskContext::detached("quote")).await.unwrap(), 0);
        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[test]
    fn token_metric_maps_to_single_record() {
        let query = Query::TokenMetric {
            symbol: "HDAC".into(),
            address: "0xabc".into(),
        };
        let payload = Payload::TokenMetric(TokenMetric {
            symbol: "HDAC".into(),
            address: "0xabc".into(),
            holders_count: Some(10),
            transfers_count: None,
            total_supply: None,
            price_usd: None,
        });
        let records = to_records(&query, "ethplorer", payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::Metric);
        assert_eq!(records[0].payload["holders_count"], 10);
    }
}
