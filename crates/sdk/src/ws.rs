//! JSON-RPC over WebSocket transport.
//!
//! [`WsConnector`] dials `ws://` or `wss://` endpoints with `jsonrpsee` and
//! hands out [`WsNode`]s speaking the standard node RPC method set.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use cess_types::{AccountId, BlockHash, BlockNumber, Nonce, RuntimeVersion};
use futures::StreamExt;
use jsonrpsee::{
    core::{
        client::{ClientT, Error as ClientError, SubscriptionClientT},
        params::ArrayParams,
    },
    rpc_params,
    ws_client::{WsClient, WsClientBuilder},
};
use serde::de::DeserializeOwned;

use crate::{
    error::{Result, SdkError, TransportSnafu},
    rpc::{
        Block, Bytes, Connector, Header, Health, NodeRpc, SignedBlock, StorageChangeSet, StorageEntry,
        TxStatus, TxStatusStream,
    },
};

/// Opens WebSocket connections to chain nodes.
#[derive(Debug, Clone)]
pub struct WsConnector {
    request_timeout: Duration,
}

impl WsConnector {
    /// Connector whose nodes give up on a request after `request_timeout`.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str, timeout: Duration) -> Result<Arc<dyn NodeRpc>> {
        let client = WsClientBuilder::default()
            .connection_timeout(timeout)
            .request_timeout(self.request_timeout)
            .build(endpoint)
            .await
            .map_err(|e| TransportSnafu { method: "connect", message: e.to_string() }.build())?;
        tracing::debug!(endpoint, "websocket connected");
        Ok(Arc::new(WsNode { client, endpoint: endpoint.to_owned(), request_timeout: self.request_timeout }))
    }
}

/// One WebSocket connection to a node.
pub struct WsNode {
    client: WsClient,
    endpoint: String,
    request_timeout: Duration,
}

impl fmt::Debug for WsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsNode")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.client.is_connected())
            .finish_non_exhaustive()
    }
}

impl WsNode {
    async fn call<R: DeserializeOwned>(&self, method: &'static str, params: ArrayParams) -> Result<R> {
        self.client.request(method, params).await.map_err(|e| map_error(method, self.request_timeout, e))
    }
}

/// Maps a `jsonrpsee` client error onto the SDK taxonomy.
fn map_error(method: &str, request_timeout: Duration, err: ClientError) -> SdkError {
    match err {
        ClientError::Call(object) => {
            SdkError::Rpc { method: method.to_owned(), code: object.code(), message: object.message().to_owned() }
        },
        ClientError::RequestTimeout => SdkError::timeout(request_timeout),
        ClientError::ParseError(e) => SdkError::Encoding { message: format!("{method} response: {e}") },
        other => TransportSnafu { method, message: other.to_string() }.build(),
    }
}

#[async_trait]
impl NodeRpc for WsNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health(&self) -> Result<Health> {
        self.call("system_health", rpc_params![]).await
    }

    async fn metadata(&self) -> Result<Vec<u8>> {
        let bytes: Bytes = self.call("state_getMetadata", rpc_params![]).await?;
        Ok(bytes.0)
    }

    async fn genesis_hash(&self) -> Result<BlockHash> {
        let hash: Option<BlockHash> = self.call("chain_getBlockHash", rpc_params![0u32]).await?;
        hash.ok_or_else(|| SdkError::Rpc {
            method: "chain_getBlockHash".to_owned(),
            code: 0,
            message: "node has no genesis block".to_owned(),
        })
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion> {
        self.call("state_getRuntimeVersion", rpc_params![]).await
    }

    async fn storage(&self, key: &[u8], at: Option<BlockHash>) -> Result<Option<Vec<u8>>> {
        let value: Option<Bytes> =
            self.call("state_getStorage", rpc_params![cess_types::to_hex(key), at]).await?;
        Ok(value.map(|b| b.0))
    }

    async fn storage_keys_paged(
        &self,
        prefix: &[u8],
        count: u32,
        start_key: Option<&[u8]>,
        at: Option<BlockHash>,
    ) -> Result<Vec<Vec<u8>>> {
        let params = rpc_params![cess_types::to_hex(prefix), count, start_key.map(cess_types::to_hex), at];
        let keys: Vec<Bytes> = self.call("state_getKeysPaged", params).await?;
        Ok(keys.into_iter().map(|b| b.0).collect())
    }

    async fn query_storage_at(&self, keys: &[Vec<u8>], at: Option<BlockHash>) -> Result<Vec<StorageEntry>> {
        let hex_keys: Vec<String> = keys.iter().map(|k| cess_types::to_hex(k)).collect();
        let sets: Vec<StorageChangeSet> = self.call("state_queryStorageAt", rpc_params![hex_keys, at]).await?;
        Ok(sets
            .into_iter()
            .flat_map(|set| set.changes)
            .map(|(key, value)| (key.0, value.map(|v| v.0)))
            .collect())
    }

    async fn block_hash(&self, number: Option<BlockNumber>) -> Result<Option<BlockHash>> {
        self.call("chain_getBlockHash", rpc_params![number]).await
    }

    async fn header(&self, hash: Option<BlockHash>) -> Result<Option<Header>> {
        self.call("chain_getHeader", rpc_params![hash]).await
    }

    async fn block(&self, hash: Option<BlockHash>) -> Result<Option<Block>> {
        let signed: Option<SignedBlock> = self.call("chain_getBlock", rpc_params![hash]).await?;
        Ok(signed.map(|s| s.block))
    }

    async fn finalized_head(&self) -> Result<BlockHash> {
        self.call("chain_getFinalizedHead", rpc_params![]).await
    }

    async fn account_next_index(&self, account: &AccountId) -> Result<Nonce> {
        self.call("system_accountNextIndex", rpc_params![account.to_string()]).await
    }

    async fn submit_and_watch(&self, extrinsic: &[u8]) -> Result<TxStatusStream> {
        const METHOD: &str = "author_submitAndWatchExtrinsic";
        let subscription = self
            .client
            .subscribe::<TxStatus, _>(METHOD, rpc_params![cess_types::to_hex(extrinsic)], "author_unwatchExtrinsic")
            .await
            .map_err(|e| map_error(METHOD, self.request_timeout, e))?;
        Ok(subscription
            .map(|item| item.map_err(|e| SdkError::Encoding { message: format!("{METHOD} notification: {e}") }))
            .boxed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use jsonrpsee::types::ErrorObject;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    #[test]
    fn call_errors_keep_code_and_message() {
        let err = map_error(
            "author_submitAndWatchExtrinsic",
            TIMEOUT,
            ClientError::Call(ErrorObject::owned(1010, "Invalid Transaction", None::<()>)),
        );
        match err {
            SdkError::Rpc { method, code, message } => {
                assert_eq!(method, "author_submitAndWatchExtrinsic");
                assert_eq!(code, 1010);
                assert_eq!(message, "Invalid Transaction");
            },
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn timeouts_and_transport_failures() {
        assert!(matches!(
            map_error("system_health", TIMEOUT, ClientError::RequestTimeout),
            SdkError::Timeout { duration_ms: 3000 }
        ));
        let err = map_error("system_health", TIMEOUT, ClientError::Custom("socket closed".to_owned()));
        assert!(err.is_connection_fault());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let connector = WsConnector::new(TIMEOUT);
        let err = connector.connect("ws://127.0.0.1:1", Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, SdkError::Transport { .. }), "got {err}");
    }
}
