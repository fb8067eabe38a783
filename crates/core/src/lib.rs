#![warn(clippy::unwrap_used)]

pub mod config;
pub mod counters;
pub mod error;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use counters::CounterCache;
pub use error::{PulseError, PulseResult};
pub use store::{DailyRollup, EventFilter, EventStore, InsertOutcome, NameMatch};
