//! Read-only chain queries.
//!
//! Every read goes through [`ConnectionManager::ensure_healthy`] first and
//! fails fast when no endpoint can be reached. Transient transport failures
//! are retried under the client's [`RetryPolicy`](crate::RetryPolicy); a
//! transport failure also clears the health flag so the next attempt dials a
//! fresh connection.

use std::{future::Future, sync::Arc, time::Instant};

use cess_types::{BlockHash, BlockNumber};
use parity_scale_codec::Decode;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    connection::ConnectionManager,
    error::{Result, SdkError},
    retry::with_retry_cancellable,
    rpc::{Header, NodeRpc},
    storage::StorageAddress,
};

/// Outcome of a point lookup.
///
/// An absent key is [`QueryResult::NotFound`], not an error.
#[derive(Debug)]
pub enum QueryResult<T> {
    /// The key exists and its value decoded.
    Found(T),
    /// The node reported no value under the key.
    NotFound,
    /// The read failed, or the value did not decode.
    Error(SdkError),
}

impl<T> QueryResult<T> {
    /// Whether a value was found.
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Whether the key was absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// The error, if the read failed.
    #[must_use]
    pub fn error(&self) -> Option<&SdkError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// The value, discarding the distinction between absent and failed.
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Converts into `Result<Option<T>>` for use with `?`.
    ///
    /// # Errors
    ///
    /// Returns the read error for [`QueryResult::Error`].
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Self::Found(value) => Ok(Some(value)),
            Self::NotFound => Ok(None),
            Self::Error(err) => Err(err),
        }
    }

    /// Maps a found value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryResult<U> {
        match self {
            Self::Found(value) => QueryResult::Found(f(value)),
            Self::NotFound => QueryResult::NotFound,
            Self::Error(err) => QueryResult::Error(err),
        }
    }
}

impl<T> From<Result<Option<T>>> for QueryResult<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Self::Found(value),
            Ok(None) => Self::NotFound,
            Err(err) => Self::Error(err),
        }
    }
}

/// Entries read from one storage map.
#[derive(Debug, Clone)]
pub struct Enumerated<T> {
    /// Full storage key and decoded value of every well-formed entry, in key order.
    pub entries: Vec<(Vec<u8>, T)>,
    /// Entries whose value did not decode.
    pub skipped: u64,
    /// Block every page was read at.
    pub block: BlockHash,
}

impl<T> Enumerated<T> {
    /// Number of decoded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry decoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decoded values, dropping keys.
    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.entries.into_iter().map(|(_, value)| value)
    }
}

/// Point reads and prefix enumeration against the active connection.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    connection: Arc<ConnectionManager>,
    config: ClientConfig,
    shutdown: CancellationToken,
}

impl QueryEngine {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        config: ClientConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self { connection, config, shutdown }
    }

    /// Reads and decodes the value at `address` from the best block.
    pub async fn get_one<T: Decode>(&self, address: &StorageAddress) -> QueryResult<T> {
        self.get_one_at(address, None).await
    }

    /// Reads and decodes the value at `address` from block `at`.
    pub async fn get_one_at<T: Decode>(
        &self,
        address: &StorageAddress,
        at: Option<BlockHash>,
    ) -> QueryResult<T> {
        match self.fetch(address, at).await {
            Ok(Some(bytes)) => match address.decode::<T>(&bytes) {
                Ok(value) => QueryResult::Found(value),
                Err(err) => {
                    tracing::warn!(address = %address, error = %err, "storage value did not decode");
                    QueryResult::Error(err)
                },
            },
            Ok(None) => QueryResult::NotFound,
            Err(err) => QueryResult::Error(err),
        }
    }

    /// Reads the undecoded value at `address`.
    pub async fn get_raw(&self, address: &StorageAddress) -> QueryResult<Vec<u8>> {
        self.fetch(address, None).await.into()
    }

    /// Lists every entry under `address` and decodes each value as `T`.
    ///
    /// All pages are read at one pinned block. Entries whose value fails to
    /// decode are logged and counted in [`Enumerated::skipped`] instead of
    /// failing the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or any page read fails.
    pub async fn enumerate<T: Decode>(&self, address: &StorageAddress) -> Result<Enumerated<T>> {
        let prefix = address.derive();
        let page_size = self.config.page_size;
        let at = self.best_hash().await?;

        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut start_key: Option<Vec<u8>> = None;
        loop {
            let prefix = prefix.as_slice();
            let start = start_key.as_deref();
            let page = self
                .read("state_getKeysPaged", |node| async move {
                    node.storage_keys_paged(prefix, page_size, start, Some(at)).await
                })
                .await?;

            let full_page = page.len() >= page_size as usize;
            start_key = page.last().cloned();
            keys.extend(page.into_iter().filter(|key| key.starts_with(prefix)));
            if !full_page {
                break;
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        let mut skipped = 0u64;
        for chunk in keys.chunks(page_size as usize) {
            let values = self
                .read("state_queryStorageAt", |node| async move {
                    node.query_storage_at(chunk, Some(at)).await
                })
                .await?;

            for (key, value) in values {
                let Some(bytes) = value else { continue };
                match address.decode::<T>(&bytes) {
                    Ok(decoded) => entries.push((key, decoded)),
                    Err(err) => {
                        skipped += 1;
                        tracing::warn!(
                            address = %address,
                            key = %cess_types::to_hex(&key),
                            error = %err,
                            "skipping undecodable entry"
                        );
                    },
                }
            }
        }

        if skipped > 0 {
            let item = format!("{}.{}", address.module(), address.item());
            self.config.metrics.record_decode_skipped(&item, skipped);
        }
        tracing::debug!(address = %address, entries = entries.len(), skipped, block = %at, "enumerated storage map");

        Ok(Enumerated { entries, skipped, block: at })
    }

    /// Header of the best block.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the node has no best block.
    pub async fn latest_block(&self) -> Result<Header> {
        self.read("chain_getHeader", |node| async move { node.header(None).await })
            .await?
            .ok_or_else(|| SdkError::Internal { message: "node returned no best header".to_owned() })
    }

    /// Hash of the block at `number`, if the node knows it.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn block_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>> {
        self.read("chain_getBlockHash", |node| async move { node.block_hash(Some(number)).await })
            .await
    }

    async fn best_hash(&self) -> Result<BlockHash> {
        self.read("chain_getBlockHash", |node| async move { node.block_hash(None).await })
            .await?
            .ok_or_else(|| SdkError::Internal { message: "node returned no best block".to_owned() })
    }

    async fn fetch(&self, address: &StorageAddress, at: Option<BlockHash>) -> Result<Option<Vec<u8>>> {
        let key = address.derive();
        let key = key.as_slice();
        self.read("state_getStorage", |node| async move { node.storage(key, at).await }).await
    }

    /// Runs one node call with health gating, timeout, retry and metrics.
    async fn read<T, F, Fut>(&self, method: &'static str, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.shutdown.is_cancelled() {
            return Err(SdkError::Shutdown);
        }

        let metrics = self.config.metrics.as_ref();
        let timeout = self.config.timeout;
        let started = Instant::now();

        let result = with_retry_cancellable(&self.config.retry_policy, &self.shutdown, metrics, method, || async {
            let handle = self.connection.ensure_healthy().await?;
            match tokio::time::timeout(timeout, call(Arc::clone(&handle.node))).await {
                Ok(result) => result.map_err(|err| self.connection.observe(&handle, err)),
                Err(_) => Err(self.connection.observe(&handle, SdkError::timeout(timeout))),
            }
        })
        .await
        .map_err(|err| match err {
            SdkError::Cancelled => SdkError::Shutdown,
            other => other,
        });

        metrics.record_request(method, started.elapsed(), result.is_ok());
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use cess_types::AccountId;

    use super::*;
    use crate::{
        config::RetryPolicy,
        mock::{MockChain, MockCodec, MockConnector},
        storage::KeyHasher,
    };

    const ENDPOINT: &str = "ws://mock:9944";

    fn engine(chain: &Arc<MockChain>, page_size: u32) -> QueryEngine {
        let config = ClientConfig::builder()
            .with_endpoint(ENDPOINT)
            .with_page_size(page_size)
            .with_retry_policy(
                RetryPolicy::builder()
                    .with_max_attempts(3)
                    .with_initial_backoff(Duration::from_millis(1))
                    .build(),
            )
            .build()
            .unwrap();
        let connection = Arc::new(ConnectionManager::new(
            &config,
            Arc::new(MockConnector::new(Arc::clone(chain))),
            Arc::new(MockCodec),
        ));
        QueryEngine::new(connection, config, CancellationToken::new())
    }

    #[tokio::test]
    async fn absent_key_is_not_found_and_bad_bytes_are_errors() {
        let chain = MockChain::new();
        let engine = engine(&chain, 10);

        let present = StorageAddress::new("Demo", "Value");
        chain.put_value(&present, &42u64);
        let missing = StorageAddress::new("Demo", "Missing");
        let garbled = StorageAddress::new("Demo", "Garbled");
        chain.put_raw(garbled.derive(), vec![1, 2, 3]);

        assert!(matches!(engine.get_one::<u64>(&present).await, QueryResult::Found(42)));
        assert!(engine.get_one::<u64>(&missing).await.is_not_found());
        match engine.get_one::<u64>(&garbled).await {
            QueryResult::Error(SdkError::Encoding { message }) => assert!(message.contains("Demo.Garbled")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(engine.get_raw(&garbled).await.found(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_on_a_fresh_connection() {
        let chain = MockChain::new();
        let engine = engine(&chain, 10);
        let address = StorageAddress::new("System", "Number");
        chain.put_value(&address, &7u32);

        assert!(engine.get_one::<u32>(&address).await.is_found());
        chain.fail_next("state_getStorage", 2);

        assert!(matches!(engine.get_one::<u32>(&address).await, QueryResult::Found(7)));
        assert_eq!(chain.connect_count(), 3);
        assert!(engine.connection.is_healthy());
    }

    #[tokio::test]
    async fn persistent_failures_exhaust_retries() {
        let chain = MockChain::new();
        let engine = engine(&chain, 10);
        let address = StorageAddress::new("System", "Number");
        chain.fail_next("state_getStorage", 10);

        match engine.get_one::<u32>(&address).await {
            QueryResult::Error(SdkError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_node_fails_fast_with_connection_error() {
        let chain = MockChain::new();
        chain.set_endpoint_up(ENDPOINT, false);
        let engine = engine(&chain, 10);

        let result = engine.get_one::<u32>(&StorageAddress::new("System", "Number")).await;
        assert!(matches!(result.error(), Some(SdkError::Connection { .. })));
        assert_eq!(chain.connect_count(), 0);
    }

    #[tokio::test]
    async fn enumerate_pages_and_skips_malformed_entries() {
        let chain = MockChain::new();
        let engine = engine(&chain, 2);
        let map = StorageAddress::new("Sminer", "MinerItems");

        for i in 0..5u8 {
            let entry = map.clone().with_key(KeyHasher::Blake2_128Concat, &AccountId([i; 32]));
            chain.put_value(&entry, &u128::from(i));
        }
        let broken = map.clone().with_key(KeyHasher::Blake2_128Concat, &AccountId([9; 32]));
        chain.put_raw(broken.derive(), vec![0xff]);
        chain.put_value(&StorageAddress::new("Sminer", "Other"), &1u128);

        let listed = engine.enumerate::<u128>(&map).await.unwrap();
        assert_eq!(listed.len(), 5);
        assert_eq!(listed.skipped, 1);
        let mut values: Vec<u128> = listed.into_values().collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(chain.call_count("state_getKeysPaged") >= 3);
    }

    #[tokio::test]
    async fn enumerate_empty_map() {
        let chain = MockChain::new();
        let engine = engine(&chain, 4);
        let listed = engine.enumerate::<u32>(&StorageAddress::new("Oss", "Oss")).await.unwrap();
        assert!(listed.is_empty());
        assert_eq!(listed.skipped, 0);
        assert_eq!(listed.block, chain.best_hash());
    }

    #[tokio::test]
    async fn block_helpers() {
        let chain = MockChain::new();
        let engine = engine(&chain, 4);
        let header = engine.latest_block().await.unwrap();
        assert_eq!(header.number, chain.best_number());
        assert_eq!(engine.block_hash(0).await.unwrap(), Some(chain.genesis_hash()));
        assert_eq!(engine.block_hash(header.number + 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_short_circuits_reads() {
        let chain = MockChain::new();
        let engine = engine(&chain, 4);
        engine.shutdown.cancel();
        let result = engine.get_one::<u32>(&StorageAddress::new("System", "Number")).await;
        assert!(matches!(result.error(), Some(SdkError::Shutdown)));
    }

    #[test]
    fn query_result_conversions() {
        let found: QueryResult<u8> = Ok(Some(1)).into();
        assert_eq!(found.map(|v| v + 1).into_result().unwrap(), Some(2));
        let absent: QueryResult<u8> = Ok(None).into();
        assert!(absent.into_result().unwrap().is_none());
        let failed: QueryResult<u8> = Err(SdkError::Shutdown).into();
        assert!(failed.into_result().is_err());
    }
}
