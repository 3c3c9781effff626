use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketlog_core::{ApiKeyPair, SourceError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::source::{
    http_error, Candle, DataSource, MarketPair, PairQuote, Payload, Query, Quote,
};

pub const DEFAULT_BASE_URL: &str = "https://pro-api.coinmarketcap.com";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// CoinMarketCap professional API client: quotes, exchange market pairs and
/// daily OHLCV.
pub struct CoinMarketCap {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl CoinMarketCap {
    pub fn new(
        base_url: Option<String>,
        credentials: Option<&ApiKeyPair>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("marketlog/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: credentials.map(|c| c.access_key.clone()),
            timeout,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!(%url, "sending request to CoinMarketCap");

        let mut req = self.client.get(&url).query(params).header("accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }

        let resp = req.send().await.map_err(|e| http_error(e, self.timeout))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| http_error(e, self.timeout))?;

        if !(200..300).contains(&status) {
            let message = status_message(&text).unwrap_or(text);
            warn!(status, %message, "CoinMarketCap API error");
            return Err(SourceError::Api { status, message });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))?;
        check_status(&body, status)?;
        Ok(body)
    }
}

#[async_trait]
impl DataSource for CoinMarketCap {
    fn name(&self) -> &str {
        "coinmarketcap"
    }

    async fn fetch(&self, query: &Query) -> Result<Payload, SourceError> {
        match query {
            Query::Quote { symbol, convert } => {
                let body = self
                    .get(
                        "/v1/cryptocurrency/quotes/latest",
                        &[("symbol", symbol.clone()), ("convert", convert.join(","))],
                    )
                    .await?;
                parse_quotes(&body, symbol, convert).map(Payload::Quotes)
            }
            Query::MarketPairs {
                slug,
                symbol,
                convert,
                limit,
            } => {
                let body = self
                    .get(
                        "/v1/exchange/market-pairs/latest",
                        &[
                            ("slug", slug.clone()),
                            ("convert", convert.join(",")),
                            ("limit", limit.to_string()),
                        ],
                    )
                    .await?;
                parse_market_pairs(&body, slug, symbol).map(Payload::MarketPairs)
            }
            Query::Ohlcv { symbol, convert } => {
                let body = self
                    .get(
                        "/v1/cryptocurrency/ohlcv/latest",
                        &[("symbol", symbol.clone()), ("convert", convert.clone())],
                    )
                    .await?;
                parse_ohlcv(&body, symbol, convert).map(Payload::Candles)
            }
            Query::TokenMetric { .. } => Err(SourceError::Unavailable(
                "coinmarketcap does not serve token metrics".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
}

/// The API reports some failures with a 200 and a non-zero `status.error_code`.
fn check_status(body: &Value, http_status: u16) -> Result<(), SourceError> {
    let Some(status) = body.get("status") else {
        return Ok(());
    };
    let status: Status = serde_json::from_value(status.clone())
        .map_err(|e| SourceError::Parse(format!("status block: {e}")))?;
    if status.error_code == 0 {
        return Ok(());
    }
    Err(SourceError::Api {
        status: http_status,
        message: status
            .error_message
            .unwrap_or_else(|| format!("error code {}", status.error_code)),
    })
}

fn status_message(text: &str) -> Option<String> {
    let body: Value = serde_json::from_str(text).ok()?;
    body.pointer("/status/error_message")?.as_str().map(str::to_string)
}

/// `data.<SYMBOL>` is an object in v1 and a list of candidates in later
/// versions; take the first candidate.
fn symbol_entry<'a>(body: &'a Value, symbol: &str) -> Result<&'a Value, SourceError> {
    let data = body
        .get("data")
        .ok_or_else(|| SourceError::Parse("missing `data`".to_string()))?;
    let entry = data
        .get(symbol)
        .or_else(|| data.get(symbol.to_uppercase()))
        .ok_or_else(|| SourceError::Parse(format!("no data for {symbol}")))?;
    match entry {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| SourceError::Parse(format!("empty data for {symbol}"))),
        other => Ok(other),
    }
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    price: Option<f64>,
    volume_24h: Option<f64>,
    market_cap: Option<f64>,
    percent_change_1h: Option<f64>,
    percent_change_24h: Option<f64>,
    percent_change_7d: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
}

/// One [`Quote`] per requested convert currency, in request order.
pub fn parse_quotes(body: &Value, symbol: &str, convert: &[String]) -> Result<Vec<Quote>, SourceError> {
    let entry = symbol_entry(body, symbol)?;
    let quotes: BTreeMap<String, QuoteEntry> = entry
        .get("quote")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| SourceError::Parse(format!("quote block: {e}")))?
        .unwrap_or_default();

    let mut out = Vec::with_capacity(convert.len());
    for currency in convert {
        let Some(q) = quotes.get(currency) else {
            warn!(%symbol, %currency, "quote missing from response");
            continue;
        };
        let Some(price) = q.price else {
            warn!(%symbol, %currency, "quote has no price");
            continue;
        };
        out.push(Quote {
            symbol: symbol.to_string(),
            convert: currency.clone(),
            price,
            volume_24h: q.volume_24h,
            market_cap: q.market_cap,
            percent_change_1h: q.percent_change_1h,
            percent_change_24h: q.percent_change_24h,
            percent_change_7d: q.percent_change_7d,
            last_updated: q.last_updated,
        });
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct PairsData {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    market_pairs: Vec<PairEntry>,
}

#[derive(Debug, Deserialize)]
struct PairEntry {
    market_pair: String,
    market_pair_base: PairCurrency,
    market_pair_quote: PairCurrency,
    #[serde(default)]
    quote: BTreeMap<String, PairQuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct PairCurrency {
    currency_symbol: String,
}

#[derive(Debug, Deserialize)]
struct PairQuoteEntry {
    price: Option<f64>,
    volume_24h: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
}

/// Market pairs of exchange `slug` that involve `symbol` on either side.
pub fn parse_market_pairs(body: &Value, slug: &str, symbol: &str) -> Result<Vec<MarketPair>, SourceError> {
    let data: PairsData = body
        .get("data")
        .cloned()
        .ok_or_else(|| SourceError::Parse("missing `data`".to_string()))
        .and_then(|d| serde_json::from_value(d).map_err(|e| SourceError::Parse(e.to_string())))?;
    let exchange = data.slug.unwrap_or_else(|| slug.to_string());

    Ok(data
        .market_pairs
        .into_iter()
        .map(|p| {
            let last_updated = p.quote.values().filter_map(|q| q.last_updated).max();
            MarketPair {
                exchange: exchange.clone(),
                market_pair: p.market_pair,
                base_symbol: p.market_pair_base.currency_symbol,
                quote_symbol: p.market_pair_quote.currency_symbol,
                quotes: p
                    .quote
                    .into_iter()
                    .map(|(k, q)| {
                        (
                            k,
                            PairQuote {
                                price: q.price,
                                volume_24h: q.volume_24h,
                            },
                        )
                    })
                    .collect(),
                last_updated,
            }
        })
        .filter(|p| p.involves(symbol))
        .collect())
}

#[derive(Debug, Deserialize)]
struct OhlcvEntry {
    time_open: Option<DateTime<Utc>>,
    time_close: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

/// Latest daily candle of `symbol` in `convert`. Empty when the response has
/// no complete candle for that currency.
pub fn parse_ohlcv(body: &Value, symbol: &str, convert: &str) -> Result<Vec<Candle>, SourceError> {
    let entry = symbol_entry(body, symbol)?;
    let time_open = entry
        .get("time_open")
        .cloned()
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok());
    let time_close = entry
        .get("time_close")
        .cloned()
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok());

    let Some(raw) = entry.get("quote").and_then(|q| q.get(convert)) else {
        warn!(%symbol, %convert, "ohlcv quote missing from response");
        return Ok(Vec::new());
    };
    let q: OhlcvEntry =
        serde_json::from_value(raw.clone()).map_err(|e| SourceError::Parse(format!("ohlcv: {e}")))?;

    let (Some(open), Some(high), Some(low), Some(close)) = (q.open, q.high, q.low, q.close) else {
        warn!(%symbol, %convert, "incomplete ohlcv candle");
        return Ok(Vec::new());
    };

    Ok(vec![Candle {
        symbol: symbol.to_string(),
        convert: convert.to_string(),
        time_open: q.time_open.or(time_open),
        time_close: q.time_close.or(time_close),
        open,
        high,
        low,
        close,
        volume: q.volume,
    }])
}
