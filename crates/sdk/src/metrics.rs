//! Client-side telemetry hooks.
//!
//! The engines report node requests, retries, endpoint changes, transaction
//! outcomes and skipped enumeration entries through [`SdkMetrics`]. The
//! default sink is [`NoopSdkMetrics`]; [`MetricsSdkMetrics`] forwards to the
//! [`metrics`](https://docs.rs/metrics) facade and whichever recorder the
//! application installed.
//!
//! # Metric Names
//!
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cess_sdk_requests_total` | Counter | `method`, `status` | Node requests by method and outcome |
//! | `cess_sdk_request_duration_seconds` | Histogram | `method` | Request latency distribution |
//! | `cess_sdk_retries_total` | Counter | `method`, `attempt`, `error_type` | Retry attempts by method |
//! | `cess_sdk_connections_total` | Counter | `endpoint`, `event` | Connection lifecycle events |
//! | `cess_sdk_transactions_total` | Counter | `call`, `outcome` | Terminal transaction outcomes |
//! | `cess_sdk_transaction_duration_seconds` | Histogram | `call` | Submit-to-outcome latency |
//! | `cess_sdk_decode_skipped_total` | Counter | `item` | Enumerated entries dropped as malformed |
//!
//! # Example
//!
//! ```no_run
//! use cess_sdk::{ClientConfig, MetricsSdkMetrics};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .with_endpoint("ws://127.0.0.1:9944")
//!     .with_metrics(Arc::new(MetricsSdkMetrics))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc, time::Duration};

/// What happened to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Dialed and metadata loaded; now the active handle.
    Connected,
    /// A connection was marked unusable.
    Disconnected,
    /// Dial, health call or metadata fetch failed.
    Failed,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Sink for client telemetry.
///
/// Every method defaults to a no-op. One instance is shared by all clones of
/// a client and by both engines, hence `Send + Sync`.
pub trait SdkMetrics: Send + Sync + fmt::Debug {
    /// Records the outcome of a completed node request (after retries resolve).
    ///
    /// `method` is the JSON-RPC name, e.g. `state_getStorage`. `duration`
    /// covers every attempt.
    fn record_request(&self, method: &str, duration: Duration, success: bool) {
        let _ = (method, duration, success);
    }

    /// Records that `attempt` (1 = first) failed with a retryable error and
    /// another one follows. `error_type` is [`SdkError::error_type`](crate::SdkError::error_type).
    fn record_retry(&self, method: &str, attempt: u32, error_type: &str) {
        let _ = (method, attempt, error_type);
    }

    /// Records an endpoint transition.
    fn record_connection(&self, endpoint: &str, event: ConnectionEvent) {
        let _ = (endpoint, event);
    }

    /// Records the terminal outcome of a transaction.
    ///
    /// - `call`: The `Module.method` descriptor.
    /// - `outcome`: One of `success`, `failure`, `timed_out`, `error`.
    fn record_tx_outcome(&self, call: &str, outcome: &str, duration: Duration) {
        let _ = (call, outcome, duration);
    }

    /// Records entries skipped during enumeration because they failed to decode.
    fn record_decode_skipped(&self, item: &str, count: u64) {
        let _ = (item, count);
    }
}

/// Discards everything. Used unless [`ClientConfigBuilder::with_metrics`](crate::ClientConfigBuilder::with_metrics) is called.
#[derive(Debug, Clone, Copy)]
pub struct NoopSdkMetrics;

impl SdkMetrics for NoopSdkMetrics {}

/// Forwards to the `metrics` facade under the names listed in the module docs.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSdkMetrics;

mod metric_names {
    pub const REQUESTS_TOTAL: &str = "cess_sdk_requests_total";
    pub const REQUEST_DURATION: &str = "cess_sdk_request_duration_seconds";
    pub const RETRIES_TOTAL: &str = "cess_sdk_retries_total";
    pub const CONNECTIONS_TOTAL: &str = "cess_sdk_connections_total";
    pub const TRANSACTIONS_TOTAL: &str = "cess_sdk_transactions_total";
    pub const TRANSACTION_DURATION: &str = "cess_sdk_transaction_duration_seconds";
    pub const DECODE_SKIPPED_TOTAL: &str = "cess_sdk_decode_skipped_total";
}

impl SdkMetrics for MetricsSdkMetrics {
    fn record_request(&self, method: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(metric_names::REQUESTS_TOTAL, "method" => method.to_owned(), "status" => status).increment(1);
        metrics::histogram!(metric_names::REQUEST_DURATION, "method" => method.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_retry(&self, method: &str, attempt: u32, error_type: &str) {
        metrics::counter!(
            metric_names::RETRIES_TOTAL,
            "method" => method.to_owned(),
            "attempt" => attempt.to_string(),
            "error_type" => error_type.to_owned(),
        )
        .increment(1);
    }

    fn record_connection(&self, endpoint: &str, event: ConnectionEvent) {
        metrics::counter!(
            metric_names::CONNECTIONS_TOTAL,
            "endpoint" => endpoint.to_owned(),
            "event" => event.to_string(),
        )
        .increment(1);
    }

    fn record_tx_outcome(&self, call: &str, outcome: &str, duration: Duration) {
        metrics::counter!(
            metric_names::TRANSACTIONS_TOTAL,
            "call" => call.to_owned(),
            "outcome" => outcome.to_owned(),
        )
        .increment(1);
        metrics::histogram!(metric_names::TRANSACTION_DURATION, "call" => call.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_decode_skipped(&self, item: &str, count: u64) {
        metrics::counter!(metric_names::DECODE_SKIPPED_TOTAL, "item" => item.to_owned())
            .increment(count);
    }
}

/// Creates the default metrics instance (no-op).
pub(crate) fn default_metrics() -> Arc<dyn SdkMetrics> {
    Arc::new(NoopSdkMetrics)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Custom test metrics that counts calls for verification.
    #[derive(Debug, Default)]
    struct CountingMetrics {
        requests: AtomicU64,
        retries: AtomicU64,
        connections: AtomicU64,
        transactions: AtomicU64,
        skipped: AtomicU64,
    }

    impl SdkMetrics for CountingMetrics {
        fn record_request(&self, _method: &str, _duration: Duration, _success: bool) {
            self.requests.fetch_add(1, Ordering::Relaxed);
        }
        fn record_retry(&self, _method: &str, _attempt: u32, _error_type: &str) {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
        fn record_connection(&self, _endpoint: &str, _event: ConnectionEvent) {
            self.connections.fetch_add(1, Ordering::Relaxed);
        }
        fn record_tx_outcome(&self, _call: &str, _outcome: &str, _duration: Duration) {
            self.transactions.fetch_add(1, Ordering::Relaxed);
        }
        fn record_decode_skipped(&self, _item: &str, count: u64) {
            self.skipped.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[test]
    fn noop_is_default() {
        let metrics = default_metrics();
        metrics.record_request("state_getStorage", Duration::from_millis(1), true);
        metrics.record_tx_outcome("FileBank.create_bucket", "success", Duration::from_secs(6));
    }

    #[test]
    fn trait_object_via_arc() {
        let counting = Arc::new(CountingMetrics::default());
        let metrics: Arc<dyn SdkMetrics> = counting.clone();

        metrics.record_request("state_getStorage", Duration::from_millis(5), true);
        metrics.record_retry("state_getKeysPaged", 1, "transport");
        metrics.record_connection("ws://127.0.0.1:9944", ConnectionEvent::Connected);
        metrics.record_tx_outcome("Oss.register", "timed_out", Duration::from_secs(60));
        metrics.record_decode_skipped("Sminer.MinerItems", 3);

        assert_eq!(counting.requests.load(Ordering::Relaxed), 1);
        assert_eq!(counting.retries.load(Ordering::Relaxed), 1);
        assert_eq!(counting.connections.load(Ordering::Relaxed), 1);
        assert_eq!(counting.transactions.load(Ordering::Relaxed), 1);
        assert_eq!(counting.skipped.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn connection_event_display() {
        assert_eq!(ConnectionEvent::Connected.to_string(), "connected");
        assert_eq!(ConnectionEvent::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionEvent::Failed.to_string(), "failed");
    }

    #[test]
    fn metrics_facade_does_not_panic_without_recorder() {
        let metrics = MetricsSdkMetrics;
        metrics.record_request("chain_getBlock", Duration::from_millis(5), false);
        metrics.record_retry("state_getStorage", 2, "timeout");
        metrics.record_connection("ws://127.0.0.1:9944", ConnectionEvent::Failed);
        metrics.record_tx_outcome("FileBank.delete_bucket", "failure", Duration::from_secs(6));
        metrics.record_decode_skipped("Oss.Oss", 1);
    }

    #[test]
    fn metrics_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopSdkMetrics>();
        assert_send_sync::<MetricsSdkMetrics>();
        assert_send_sync::<Arc<dyn SdkMetrics>>();
    }
}
