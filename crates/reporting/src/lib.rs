//! Read side of the analytics engine: daily and realtime rollups, funnel
//! definitions and funnel analysis, session browsing.

#![warn(clippy::unwrap_used)]

pub mod aggregator;
mod deadline;
pub mod funnel;
pub mod sessions;
pub mod window;

#[cfg(test)]
mod test_support;

pub use aggregator::TimeWindowAggregator;
pub use funnel::{FunnelAnalyzer, FunnelRegistry};
pub use sessions::SessionBrowser;
pub use window::DateRange;
