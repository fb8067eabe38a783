#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;

pub use client::RedisCounterCache;
pub use local::LocalCounterCache;
