//! Connection management and failover.
//!
//! The [`ConnectionManager`] owns the ordered endpoint list and the active
//! [`ConnectionHandle`].
//!
//! # Architecture
//!
//! - **Snapshot handle**: a handle bundles the live node with the metadata
//!   fetched over it. It is swapped wholesale through `ArcSwapOption`, so a
//!   reader holding an `Arc<ConnectionHandle>` always sees a consistent pair.
//! - **Health flag**: an `AtomicBool` set by the latest probe or cleared when an
//!   engine observes a transport failure. Reading it performs no I/O.
//! - **Inline reconnect**: there is no background loop. The call that finds the
//!   flag cleared reconnects, serialized behind an async mutex so concurrent
//!   callers dial once and share the result.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;

use crate::{
    config::ClientConfig,
    error::{ConnectionSnafu, Result, SdkError, duration_ms},
    metadata::{MetadataCache, RuntimeCodec},
    metrics::{ConnectionEvent, SdkMetrics},
    rpc::{Connector, NodeRpc},
};

/// Immutable snapshot of one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// The connected node.
    pub node: Arc<dyn NodeRpc>,
    /// Metadata fetched over this connection.
    pub cache: MetadataCache,
    /// Endpoint the node was reached at.
    pub endpoint: String,
    /// Monotonic counter distinguishing successive handles.
    pub generation: u64,
}

/// Owns the endpoint list, the active handle and the health flag.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoints: Vec<String>,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn RuntimeCodec>,
    connect_timeout: Duration,
    request_timeout: Duration,
    metrics: Arc<dyn SdkMetrics>,
    handle: ArcSwapOption<ConnectionHandle>,
    healthy: AtomicBool,
    generation: AtomicU64,
    reconnect_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Creates a manager without connecting.
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn RuntimeCodec>,
    ) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            connector,
            codec,
            connect_timeout: config.connect_timeout,
            request_timeout: config.timeout,
            metrics: Arc::clone(&config.metrics),
            handle: ArcSwapOption::empty(),
            healthy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            reconnect_lock: Mutex::new(()),
        }
    }

    /// Last-known health. Performs no I/O.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// The active handle, if any connection has been made.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.handle.load_full()
    }

    /// Candidate endpoints, in the order they are tried.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Codec used for metadata and event decoding.
    #[must_use]
    pub fn codec(&self) -> &dyn RuntimeCodec {
        self.codec.as_ref()
    }

    /// Issues a liveness call against the active connection.
    ///
    /// A successful probe only sets the health flag. A failed probe (or a
    /// missing connection) walks the endpoint list, replacing the handle and
    /// refreshing metadata on the first endpoint that answers.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Connection`] if every endpoint fails; the health
    /// flag stays false.
    pub async fn probe(&self) -> Result<()> {
        let stale = match self.current() {
            Some(handle) => match handle.node.health().await {
                Ok(_) => {
                    self.healthy.store(true, Ordering::Release);
                    return Ok(());
                },
                Err(err) => {
                    tracing::warn!(endpoint = %handle.endpoint, error = %err, "health probe failed");
                    self.mark_unhealthy(&handle);
                    Some(handle.generation)
                },
            },
            None => None,
        };
        self.reconnect(stale).await.map(|_| ())
    }

    /// Returns a usable handle, reconnecting inline if the flag is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Connection`] if reconnection fails.
    pub async fn ensure_healthy(&self) -> Result<Arc<ConnectionHandle>> {
        let current = self.current();
        if self.is_healthy()
            && let Some(handle) = current
        {
            return Ok(handle);
        }
        self.reconnect(current.map(|h| h.generation)).await
    }

    /// Clears the health flag if `handle` is still the active one.
    ///
    /// A failure observed on an already-replaced handle is ignored.
    pub fn mark_unhealthy(&self, handle: &ConnectionHandle) {
        let is_active = self.current().is_some_and(|h| h.generation == handle.generation);
        if is_active && self.healthy.swap(false, Ordering::AcqRel) {
            tracing::debug!(endpoint = %handle.endpoint, generation = handle.generation, "connection marked unhealthy");
            self.metrics.record_connection(&handle.endpoint, ConnectionEvent::Disconnected);
        }
    }

    /// Runs `err` through the health bookkeeping and hands it back.
    pub(crate) fn observe(&self, handle: &ConnectionHandle, err: SdkError) -> SdkError {
        if err.is_connection_fault() {
            self.mark_unhealthy(handle);
        }
        err
    }

    /// Replaces the active handle with a fresh connection.
    ///
    /// `stale` is the generation the caller found broken. If another caller
    /// already replaced it while this one waited for the lock, the newer
    /// handle is returned without dialing again.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Connection`] listing every endpoint's failure.
    pub async fn reconnect(&self, stale: Option<u64>) -> Result<Arc<ConnectionHandle>> {
        let _guard = self.reconnect_lock.lock().await;

        if self.is_healthy()
            && let Some(handle) = self.current()
            && Some(handle.generation) != stale
        {
            return Ok(handle);
        }

        let mut failures = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let started = Instant::now();
            match self.open(endpoint).await {
                Ok((node, cache)) => {
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    let handle = Arc::new(ConnectionHandle {
                        node,
                        cache,
                        endpoint: endpoint.clone(),
                        generation,
                    });
                    self.handle.store(Some(Arc::clone(&handle)));
                    self.healthy.store(true, Ordering::Release);
                    self.metrics.record_connection(endpoint, ConnectionEvent::Connected);
                    tracing::info!(
                        endpoint = %endpoint,
                        generation,
                        spec_version = handle.cache.runtime_version.spec_version,
                        elapsed_ms = duration_ms(started.elapsed()),
                        "connected to node"
                    );
                    return Ok(handle);
                },
                Err(err) => {
                    self.metrics.record_connection(endpoint, ConnectionEvent::Failed);
                    tracing::warn!(endpoint = %endpoint, error = %err, "endpoint connection failed");
                    failures.push(format!("{endpoint}: {err}"));
                },
            }
        }

        self.healthy.store(false, Ordering::Release);
        ConnectionSnafu { message: format!("all endpoints failed: [{}]", failures.join("; ")) }
            .fail()
    }

    /// Dials one endpoint and fetches its metadata.
    async fn open(&self, endpoint: &str) -> Result<(Arc<dyn NodeRpc>, MetadataCache)> {
        let node = tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(endpoint, self.connect_timeout),
        )
        .await
        .map_err(|_| SdkError::timeout(self.connect_timeout))??;

        let cache = tokio::time::timeout(
            self.request_timeout,
            MetadataCache::fetch(node.as_ref(), self.codec.as_ref()),
        )
        .await
        .map_err(|_| SdkError::timeout(self.request_timeout))??;

        Ok((node, cache))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mock::{MockChain, MockCodec, MockConnector};

    const A: &str = "ws://node-a:9944";
    const B: &str = "ws://node-b:9944";

    fn manager(chain: &Arc<MockChain>) -> ConnectionManager {
        let config = ClientConfig::builder()
            .with_endpoints([A, B])
            .with_connect_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        ConnectionManager::new(&config, Arc::new(MockConnector::new(Arc::clone(chain))), Arc::new(MockCodec))
    }

    #[tokio::test]
    async fn starts_disconnected_and_unhealthy() {
        let chain = MockChain::new();
        let manager = manager(&chain);
        assert!(!manager.is_healthy());
        assert!(manager.current().is_none());
        assert_eq!(chain.connect_count(), 0);
    }

    #[tokio::test]
    async fn first_answering_endpoint_wins() {
        let chain = MockChain::new();
        chain.set_endpoint_up(A, false);
        let manager = manager(&chain);

        let handle = manager.ensure_healthy().await.unwrap();
        assert_eq!(handle.endpoint, B);
        assert_eq!(handle.generation, 1);
        assert!(manager.is_healthy());
        assert_eq!(handle.cache.genesis_hash, chain.genesis_hash());
    }

    #[tokio::test]
    async fn ensure_healthy_reuses_handle() {
        let chain = MockChain::new();
        let manager = manager(&chain);
        let first = manager.ensure_healthy().await.unwrap();
        let second = manager.ensure_healthy().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(chain.metadata_fetch_count(), 1);
    }

    #[tokio::test]
    async fn mark_unhealthy_ignores_replaced_handles() {
        let chain = MockChain::new();
        let manager = manager(&chain);
        let old = manager.ensure_healthy().await.unwrap();
        manager.mark_unhealthy(&old);
        let new = manager.ensure_healthy().await.unwrap();
        assert_eq!(new.generation, 2);

        manager.mark_unhealthy(&old);
        assert!(manager.is_healthy());
    }

    #[tokio::test]
    async fn concurrent_reconnects_dial_once() {
        let chain = MockChain::new();
        let manager = Arc::new(manager(&chain));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.ensure_healthy().await.map(|h| h.generation) })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(chain.connect_count(), 1);
    }

    #[tokio::test]
    async fn connect_timeout_moves_to_next_endpoint() {
        let chain = MockChain::new();
        chain.set_connect_delay(A, Duration::from_secs(5));
        let manager = manager(&chain);

        let handle = manager.ensure_healthy().await.unwrap();
        assert_eq!(handle.endpoint, B);
    }
}
