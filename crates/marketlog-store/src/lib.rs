//! `marketlog-store`: the append-only report log.
//!
//! One file, one JSON-encoded [`LogRecord`](marketlog_core::LogRecord) per
//! line. [`LogStore::append`] writes a whole batch or nothing;
//! [`LogStore::snapshot`] never observes an append that is still in progress.

pub mod snapshot;
pub mod store;

pub use snapshot::Snapshot;
pub use store::LogStore;

pub type Result<T> = std::result::Result<T, marketlog_core::StoreError>;
