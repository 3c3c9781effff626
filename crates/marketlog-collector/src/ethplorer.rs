use std::time::Duration;

use async_trait::async_trait;
use marketlog_core::{ApiKeyPair, SourceError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::source::{http_error, DataSource, Payload, Query, TokenMetric};

pub const DEFAULT_BASE_URL: &str = "https://api.ethplorer.io";
/// Public key Ethplorer accepts for low-volume use.
const FREE_KEY: &str = "freekey";

/// Ethplorer client for ERC-20 token statistics.
pub struct Ethplorer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl Ethplorer {
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
            api_key: credentials
                .map(|c| c.access_key.clone())
                .unwrap_or_else(|| FREE_KEY.to_string()),
            timeout,
        })
    }
}

#[async_trait]
impl DataSource for Ethplorer {
    fn name(&self) -> &str {
        "ethplorer"
    }

    async fn fetch(&self, query: &Query) -> Result<Payload, SourceError> {
        let Query::TokenMetric { symbol, address } = query else {
            return Err(SourceError::Unavailable(format!(
                "ethplorer only serves token metrics, not {}",
                query.kind()
            )));
        };

        let url = format!(
            "{}/getTokenInfo/{}",
            self.base_url.trim_end_matches('/'),
            address
        );
        debug!(%url, "sending request to Ethplorer");

        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| http_error(e, self.timeout))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| http_error(e, self.timeout))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if let Some(message) = body.as_ref().and_then(error_message) {
            warn!(status, %message, "Ethplorer API error");
            return Err(SourceError::Api { status, message });
        }
        if !(200..300).contains(&status) {
            warn!(status, body = %text, "Ethplorer API error");
            return Err(SourceError::Api {
                status,
                message: text,
            });
        }

        let body = body.ok_or_else(|| SourceError::Parse("response is not JSON".to_string()))?;
        parse_token_info(&body, symbol, address).map(Payload::TokenMetric)
    }
}

/// Ethplorer reports failures as `{"error": {"code": .., "message": ..}}`.
fn error_message(body: &Value) -> Option<String> {
    let err = body.get("error")?;
    let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
    match err.get("code").and_then(Value::as_i64) {
        Some(code) => Some(format!("{message} (code {code})")),
        None => Some(message.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfo {
    holders_count: Option<u64>,
    transfers_count: Option<u64>,
    total_supply: Option<Value>,
    /// An object with `rate`, or `false` when the token has no market price.
    #[serde(default)]
    price: Value,
}

pub fn parse_token_info(body: &Value, symbol: &str, address: &str) -> Result<TokenMetric, SourceError> {
    let info: TokenInfo =
        serde_json::from_value(body.clone()).map_err(|e| SourceError::Parse(e.to_string()))?;

    let total_supply = match info.total_supply {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let price_usd = info.price.get("rate").and_then(|r| match r {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });

    Ok(TokenMetric {
        symbol: symbol.to_string(),
        address: address.to_string(),
        holders_count: info.holders_count,
        transfers_count: info.transfers_count,
        total_supply,
        price_usd,
    })
}
