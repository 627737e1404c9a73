//! Main `ChainClient` implementation.
//!
//! Wires the connection manager, query engine and transaction engine together
//! behind one handle and owns the client-wide shutdown token. Every public
//! operation runs through [`ChainClient::guarded`], which fails fast after
//! shutdown and converts a panic anywhere below into [`SdkError::Internal`].

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use cess_types::AccountId;
use futures::FutureExt;
use parity_scale_codec::Decode;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    connection::ConnectionManager,
    error::{Result, SdkError},
    events::EventMatcher,
    extrinsic::CallRequest,
    metadata::RuntimeCodec,
    query::{Enumerated, QueryEngine, QueryResult},
    rpc::Connector,
    signer::Signer,
    storage::StorageAddress,
    tx::{TransactionEngine, TxOptions, TxOutcome},
    ws::WsConnector,
};

/// Handle to a storage chain through one signer.
///
/// Cloning is cheap; clones share the connection, the write lock and the
/// shutdown state.
#[derive(Debug, Clone)]
pub struct ChainClient {
    config: ClientConfig,
    connection: Arc<ConnectionManager>,
    query: QueryEngine,
    tx: Arc<TransactionEngine>,
    cancellation: CancellationToken,
}

impl ChainClient {
    /// Creates a client and connects to the first endpoint that answers.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Connection`] if no endpoint can be reached or its
    /// metadata cannot be loaded.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use cess_sdk::{ChainClient, ClientConfig, Ed25519Signer, RuntimeCodec, WsConnector};
    /// # async fn example(codec: Arc<dyn RuntimeCodec>) -> cess_sdk::Result<()> {
    /// let config = ClientConfig::builder()
    ///     .with_endpoint("wss://testnet-rpc.cess.network/ws/")
    ///     .build()?;
    /// let client = ChainClient::connect(
    ///     config.clone(),
    ///     Arc::new(WsConnector::new(config.timeout())),
    ///     codec,
    ///     Arc::new(Ed25519Signer::generate()),
    /// )
    /// .await?;
    /// assert!(client.is_healthy());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn RuntimeCodec>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self> {
        let client = Self::new(config, connector, codec, signer);
        let handle = client.connection.ensure_healthy().await?;
        tracing::info!(
            endpoint = %handle.endpoint,
            account = %client.account_id(),
            "chain client ready"
        );
        Ok(client)
    }

    /// Creates a client over WebSocket endpoints.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_ws(
        config: ClientConfig,
        codec: Arc<dyn RuntimeCodec>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(config.timeout()));
        Self::connect(config, connector, codec, signer).await
    }

    /// Creates a client without connecting. The first operation connects.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn RuntimeCodec>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let cancellation = CancellationToken::new();
        let connection = Arc::new(ConnectionManager::new(&config, connector, codec));
        let query = QueryEngine::new(Arc::clone(&connection), config.clone(), cancellation.clone());
        let tx = Arc::new(TransactionEngine::new(
            Arc::clone(&connection),
            config.clone(),
            signer,
            cancellation.clone(),
        ));
        Self { config, connection, query, tx, cancellation }
    }

    /// Returns the client configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the connection manager.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Returns the read engine.
    #[inline]
    #[must_use]
    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Returns the write engine.
    #[inline]
    #[must_use]
    pub fn tx(&self) -> &TransactionEngine {
        &self.tx
    }

    /// Account every transaction is signed by.
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        self.tx.signer().account_id()
    }

    /// Last-known connection health. Performs no I/O.
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.connection.is_healthy()
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probes the active node, failing over if it does not answer.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Connection`] if every endpoint fails.
    pub async fn probe(&self) -> Result<()> {
        self.guarded("probe", self.connection.probe()).await
    }

    /// Probes and reports whether the client is healthy afterwards.
    ///
    /// Unlike [`probe`](Self::probe), an unreachable network is reported as
    /// `false` rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Shutdown`] after shutdown.
    pub async fn health_check(&self) -> Result<bool> {
        match self.probe().await {
            Ok(()) => Ok(true),
            Err(SdkError::Connection { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads one storage value. See [`QueryEngine::get_one`].
    pub async fn get_one<T: Decode>(&self, address: &StorageAddress) -> QueryResult<T> {
        match self.guarded("get_one", self.query.get_one::<T>(address).map(Ok)).await {
            Ok(result) => result,
            Err(err) => QueryResult::Error(err),
        }
    }

    /// Enumerates one storage map. See [`QueryEngine::enumerate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a page read fails.
    pub async fn enumerate<T: Decode>(&self, address: &StorageAddress) -> Result<Enumerated<T>> {
        self.guarded("enumerate", self.query.enumerate::<T>(address)).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Submits `call` and waits for its outcome. See [`TransactionEngine::submit`].
    ///
    /// # Errors
    ///
    /// See [`TransactionEngine::submit_with`].
    pub async fn submit(&self, call: CallRequest, matcher: &dyn EventMatcher) -> Result<TxOutcome> {
        self.submit_with(call, matcher, &TxOptions::default()).await
    }

    /// Submits `call` with per-call options.
    ///
    /// # Errors
    ///
    /// See [`TransactionEngine::submit_with`].
    pub async fn submit_with(
        &self,
        call: CallRequest,
        matcher: &dyn EventMatcher,
        options: &TxOptions,
    ) -> Result<TxOutcome> {
        self.guarded("submit", self.tx.submit_with(call, matcher, options)).await
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Returns the client's cancellation token.
    ///
    /// Child tokens make good per-request tokens for [`TxOptions`]: they fire
    /// on client shutdown as well as on their own cancellation.
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Initiates shutdown.
    ///
    /// In-flight reads and writes return [`SdkError::Shutdown`] at their next
    /// suspension point; new operations fail immediately. All clones share
    /// the shutdown state.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
        tracing::debug!("client shutdown initiated");
    }

    /// Returns `true` if the client has been shut down.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Runs `operation` at the client boundary.
    ///
    /// Fails fast after shutdown and turns a panic into
    /// [`SdkError::Internal`]. The write lock and any subscription held by
    /// the operation are released while unwinding.
    pub(crate) async fn guarded<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_shutdown() {
            return Err(SdkError::Shutdown);
        }
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(operation, panic = %message, "operation panicked");
                Err(SdkError::Internal { message: format!("{operation} panicked: {message}") })
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{
        mock::{MockChain, MockCodec, MockConnector},
        signer::Ed25519Signer,
    };

    fn client(chain: &Arc<MockChain>) -> ChainClient {
        let config = ClientConfig::builder().with_endpoint("ws://node-a:9944").build().unwrap();
        ChainClient::new(
            config,
            Arc::new(MockConnector::new(Arc::clone(chain))),
            Arc::new(MockCodec),
            Arc::new(Ed25519Signer::from_seed([7; 32])),
        )
    }

    #[tokio::test]
    async fn new_is_lazy_and_probe_connects() {
        let chain = MockChain::new();
        let client = client(&chain);
        assert!(!client.is_healthy());
        assert_eq!(chain.connect_count(), 0);

        client.probe().await.unwrap();
        assert!(client.is_healthy());
        assert_eq!(chain.connect_count(), 1);
    }

    #[tokio::test]
    async fn health_check_reports_unreachable_network_as_false() {
        let chain = MockChain::new();
        chain.set_endpoint_up("ws://node-a:9944", false);
        let client = client(&chain);
        assert!(!client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_is_shared_by_clones() {
        let chain = MockChain::new();
        let client = client(&chain);
        let clone = client.clone();
        client.shutdown();

        assert!(clone.is_shutdown());
        assert!(matches!(clone.probe().await, Err(SdkError::Shutdown)));
        let read = clone.get_one::<u32>(&StorageAddress::new("System", "Number")).await;
        assert!(matches!(read, QueryResult::Error(SdkError::Shutdown)));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let chain = MockChain::new();
        let client = client(&chain);
        let err = client.guarded("explode", explode()).await.unwrap_err();
        match err {
            SdkError::Internal { message } => assert_eq!(message, "explode panicked: boom"),
            other => panic!("unexpected: {other}"),
        }
    }

    async fn explode() -> Result<()> {
        panic!("boom")
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
