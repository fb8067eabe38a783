//! Write path and storage backends: event ingestion, the background counter
//! writer, and the ClickHouse / in-memory event stores.

#![warn(clippy::unwrap_used)]

pub mod clickhouse_store;
pub mod counters;
pub mod ingest;
pub mod memory;

pub use clickhouse_store::ClickHouseEventStore;
pub use counters::{user_counters, CounterWriter};
pub use ingest::EventIngestor;
pub use memory::MemoryEventStore;
