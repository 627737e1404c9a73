//! [`ClientConfig`] and its validating builder.
//!
//! Covers:
//! - Node endpoint URLs, tried in order on failover
//! - Request, connection and transaction watch timeouts
//! - Transaction mortality and enumeration page size
//! - Retry policy and metrics sink

use std::{fmt, sync::Arc, time::Duration};

use snafu::ensure;

use crate::{
    error::{ConfigSnafu, InvalidUrlSnafu, Result},
    metrics::{SdkMetrics, default_metrics},
};

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a transaction to reach a block (60 seconds).
const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(60);

/// Default transaction validity window in blocks.
const DEFAULT_MORTALITY_PERIOD: u64 = 64;

/// Default number of keys fetched per enumeration page.
const DEFAULT_PAGE_SIZE: u32 = 500;

/// Upper bound the node accepts for `state_getKeysPaged`.
const MAX_PAGE_SIZE: u32 = 1000;

/// Configuration for the chain client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Node endpoint URLs (e.g., `ws://127.0.0.1:9944`), in failover order.
    pub(crate) endpoints: Vec<String>,

    /// Request timeout.
    pub(crate) timeout: Duration,

    /// Connection establishment timeout, per endpoint.
    pub(crate) connect_timeout: Duration,

    /// Deadline for a submitted transaction to be included.
    pub(crate) tx_timeout: Duration,

    /// Mortality period in blocks; zero signs immortal transactions.
    pub(crate) mortality_period: u64,

    /// Wait for finalization instead of first inclusion.
    pub(crate) wait_for_finalization: bool,

    /// Keys per `state_getKeysPaged` page.
    pub(crate) page_size: u32,

    /// Retry policy for transient read failures.
    pub(crate) retry_policy: RetryPolicy,

    /// Metrics sink.
    pub(crate) metrics: Arc<dyn SdkMetrics>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("tx_timeout", &self.tx_timeout)
            .field("mortality_period", &self.mortality_period)
            .field("wait_for_finalization", &self.wait_for_finalization)
            .field("page_size", &self.page_size)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the configured endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the transaction inclusion deadline.
    #[must_use]
    pub fn tx_timeout(&self) -> Duration {
        self.tx_timeout
    }

    /// Returns the mortality period in blocks (zero means immortal).
    #[must_use]
    pub fn mortality_period(&self) -> u64 {
        self.mortality_period
    }

    /// Returns whether writes wait for finalization.
    #[must_use]
    pub fn wait_for_finalization(&self) -> bool {
        self.wait_for_finalization
    }

    /// Returns the enumeration page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn SdkMetrics> {
        &self.metrics
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    endpoints: Vec<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    tx_timeout: Option<Duration>,
    mortality_period: Option<u64>,
    wait_for_finalization: bool,
    page_size: Option<u32>,
    retry_policy: Option<RetryPolicy>,
    metrics: Option<Arc<dyn SdkMetrics>>,
}

impl ClientConfigBuilder {
    /// Sets the node endpoint URLs.
    ///
    /// At least one endpoint must be provided. URLs must be `ws://` or `wss://`.
    #[must_use]
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single endpoint URL.
    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Sets the request timeout.
    ///
    /// Default: 30 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the per-endpoint connection timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets how long a write waits for block inclusion.
    ///
    /// Default: 60 seconds.
    #[must_use]
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = Some(timeout);
        self
    }

    /// Sets the transaction mortality period in blocks.
    ///
    /// The period is rounded up to a power of two between 4 and 65536.
    /// Zero signs immortal transactions. Default: 64.
    #[must_use]
    pub fn with_mortality_period(mut self, blocks: u64) -> Self {
        self.mortality_period = Some(blocks);
        self
    }

    /// Waits for finalization rather than first inclusion.
    ///
    /// Default: disabled.
    #[must_use]
    pub fn with_wait_for_finalization(mut self, enabled: bool) -> Self {
        self.wait_for_finalization = enabled;
        self
    }

    /// Sets the number of keys requested per enumeration page.
    ///
    /// Default: 500. Maximum: 1000.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the retry policy for transient failures.
    ///
    /// Default: [`RetryPolicy::default()`].
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the metrics sink.
    ///
    /// Default: [`NoopSdkMetrics`](crate::NoopSdkMetrics).
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SdkMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoints provided
    /// - Any endpoint URL is invalid
    /// - Any timeout is zero
    /// - Page size is zero or above 1000
    pub fn build(self) -> Result<ClientConfig> {
        ensure!(
            !self.endpoints.is_empty(),
            ConfigSnafu { message: "at least one endpoint is required" }
        );

        for endpoint in &self.endpoints {
            validate_url(endpoint)?;
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        ensure!(!timeout.is_zero(), ConfigSnafu { message: "timeout cannot be zero" });

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        ensure!(
            !connect_timeout.is_zero(),
            ConfigSnafu { message: "connect_timeout cannot be zero" }
        );

        let tx_timeout = self.tx_timeout.unwrap_or(DEFAULT_TX_TIMEOUT);
        ensure!(!tx_timeout.is_zero(), ConfigSnafu { message: "tx_timeout cannot be zero" });

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        ensure!(
            (1..=MAX_PAGE_SIZE).contains(&page_size),
            ConfigSnafu { message: format!("page_size must be between 1 and {MAX_PAGE_SIZE}") }
        );

        Ok(ClientConfig {
            endpoints: self.endpoints,
            timeout,
            connect_timeout,
            tx_timeout,
            mortality_period: self.mortality_period.unwrap_or(DEFAULT_MORTALITY_PERIOD),
            wait_for_finalization: self.wait_for_finalization,
            page_size,
            retry_policy: self.retry_policy.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_else(default_metrics),
        })
    }
}

/// Backoff schedule for reads and fragment transfers that fail transiently.
///
/// Only errors classified by [`SdkError::is_retryable`](crate::SdkError::is_retryable)
/// are retried. Writes are never retried: a resubmitted extrinsic would reuse
/// or skip a nonce.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per operation, counting the first one. Never below 1.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Ceiling for any single delay.
    pub max_backoff: Duration,

    /// Growth factor applied after each retry.
    pub multiplier: f64,

    /// Fraction of each delay randomized in both directions, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Starts a policy from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder { policy: Self::default() }
    }

    /// Single attempt, no backoff.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Unjittered delay before retry number `retry` (1-based), capped at
    /// `max_backoff`.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Builder for [`RetryPolicy`]. Unset fields keep their defaults.
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Attempts per operation; zero is raised to one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.policy.initial_backoff = backoff;
        self
    }

    /// Ceiling for a single delay.
    #[must_use]
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.policy.max_backoff = backoff;
        self
    }

    /// Growth factor between retries.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Jitter fraction; clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Finishes the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let mut policy = self.policy;
        policy.max_attempts = policy.max_attempts.max(1);
        policy.jitter = policy.jitter.clamp(0.0, 1.0);
        policy
    }
}

/// Validates that a URL is a well-formed WebSocket URL.
pub(crate) fn validate_url(url: &str) -> Result<()> {
    let Some(rest) = url.strip_prefix("ws://").or_else(|| url.strip_prefix("wss://")) else {
        return InvalidUrlSnafu { url, message: "URL must start with ws:// or wss://" }.fail();
    };

    if rest.is_empty() || rest.starts_with('/') || rest.starts_with(':') {
        return InvalidUrlSnafu { url, message: "URL must have a host" }.fail();
    }

    if rest.contains(char::is_whitespace) {
        return InvalidUrlSnafu { url, message: "URL cannot contain whitespace" }.fail();
    }

    Ok(())
}
