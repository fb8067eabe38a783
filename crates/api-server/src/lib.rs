#![warn(clippy::unwrap_used)]

pub mod rest;
pub mod server;

pub use rest::{router, AppState};
pub use server::ApiServer;
