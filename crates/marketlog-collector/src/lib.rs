//! `marketlog-collector`: fetch-and-record tasks.
//!
//! A [`CollectorTask`] binds one [`Query`] to one [`DataSource`], maps the
//! fetched payload to log records and appends them to the report log in a
//! single batch. Concrete sources: [`CoinMarketCap`] (quotes, market pairs,
//! OHLCV) and [`Ethplorer`] (token metrics).

pub mod coinmarketcap;
pub mod ethplorer;
pub mod source;
pub mod task;

pub use coinmarketcap::CoinMarketCap;
pub use ethplorer::Ethplorer;
pub use source::{Candle, DataSource, MarketPair, Payload, Query, Quote, TokenMetric};
pub use task::CollectorTask;
