use pulse_core::{PulseError, PulseResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub(crate) const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a store query under a deadline. Expiry becomes `PulseError::Timeout`.
pub(crate) async fn within<T>(
    timeout: Duration,
    operation: &'static str,
    query: impl Future<Output = PulseResult<T>>,
) -> PulseResult<T> {
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("query.timeouts", "operation" => operation).increment(1);
            warn!(operation = operation, timeout_ms = timeout.as_millis() as u64, "Query deadline exceeded");
            Err(PulseError::Timeout(timeout))
        }
    }
}
