//! Node RPC surface consumed by the engines.
//!
//! [`NodeRpc`] is the narrow interface the connection manager, query engine
//! and transaction engine talk to. [`WsNode`](crate::WsNode) implements it over
//! JSON-RPC on a WebSocket; [`MockNode`](crate::mock::MockNode) implements it in
//! memory for tests.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use cess_types::{AccountId, BlockHash, BlockNumber, Nonce, RuntimeVersion, TxHash};
use futures::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// Stream of status updates for one submitted extrinsic.
///
/// Dropping the stream unsubscribes.
pub type TxStatusStream = BoxStream<'static, Result<TxStatus>>;

/// One key/value pair returned by a bulk storage read. `None` marks an absent key.
pub type StorageEntry = (Vec<u8>, Option<Vec<u8>>);

/// Remote chain node.
#[async_trait]
pub trait NodeRpc: Send + Sync + fmt::Debug {
    /// Endpoint this node was reached at.
    fn endpoint(&self) -> &str;

    /// Lightweight liveness call (`system_health`).
    async fn health(&self) -> Result<Health>;

    /// SCALE-encoded runtime metadata (`state_getMetadata`).
    async fn metadata(&self) -> Result<Vec<u8>>;

    /// Hash of block zero.
    async fn genesis_hash(&self) -> Result<BlockHash>;

    /// Current runtime version.
    async fn runtime_version(&self) -> Result<RuntimeVersion>;

    /// Reads one storage value; `None` when the key is absent.
    async fn storage(&self, key: &[u8], at: Option<BlockHash>) -> Result<Option<Vec<u8>>>;

    /// Lists up to `count` keys under `prefix`, strictly after `start_key`.
    async fn storage_keys_paged(
        &self,
        prefix: &[u8],
        count: u32,
        start_key: Option<&[u8]>,
        at: Option<BlockHash>,
    ) -> Result<Vec<Vec<u8>>>;

    /// Reads many storage values at one block.
    async fn query_storage_at(
        &self,
        keys: &[Vec<u8>],
        at: Option<BlockHash>,
    ) -> Result<Vec<StorageEntry>>;

    /// Hash of the block at `number`, or of the best block when `None`.
    async fn block_hash(&self, number: Option<BlockNumber>) -> Result<Option<BlockHash>>;

    /// Header of the block `hash`, or of the best block when `None`.
    async fn header(&self, hash: Option<BlockHash>) -> Result<Option<Header>>;

    /// Block `hash` with its extrinsics, or the best block when `None`.
    async fn block(&self, hash: Option<BlockHash>) -> Result<Option<Block>>;

    /// Hash of the latest finalized block.
    async fn finalized_head(&self) -> Result<BlockHash>;

    /// Next nonce for `account`, including transactions still in the pool.
    async fn account_next_index(&self, account: &AccountId) -> Result<Nonce>;

    /// Submits a signed extrinsic and subscribes to its status.
    async fn submit_and_watch(&self, extrinsic: &[u8]) -> Result<TxStatusStream>;
}

/// Opens connections to node endpoints.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to `endpoint`, giving up after `timeout`.
    async fn connect(&self, endpoint: &str, timeout: Duration) -> Result<Arc<dyn NodeRpc>>;
}

/// Node health as reported by `system_health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Connected peer count.
    pub peers: u64,
    /// Whether the node is still syncing.
    pub is_syncing: bool,
    /// Whether the node expects to have peers.
    pub should_have_peers: bool,
}

/// Block header fields the SDK uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Parent block hash.
    pub parent_hash: BlockHash,
    /// Block height, hex-encoded on the wire.
    #[serde(with = "hex_number")]
    pub number: BlockNumber,
    /// State trie root.
    pub state_root: BlockHash,
    /// Extrinsics trie root.
    pub extrinsics_root: BlockHash,
}

/// Block body as returned inside `chain_getBlock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Encoded extrinsics, in execution order.
    pub extrinsics: Vec<Bytes>,
}

/// `chain_getBlock` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock {
    /// The block.
    pub block: Block,
}

/// One entry of a `state_queryStorageAt` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageChangeSet {
    /// Block the values were read at.
    pub block: BlockHash,
    /// Key/value pairs; `None` for absent keys.
    pub changes: Vec<(Bytes, Option<Bytes>)>,
}

/// Transaction pool status updates from `author_submitAndWatchExtrinsic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxStatus {
    /// Waiting on an earlier nonce.
    Future,
    /// Ready to be included.
    Ready,
    /// Gossiped to the listed peers.
    Broadcast(Vec<String>),
    /// Included in a block.
    InBlock(BlockHash),
    /// The including block was retracted.
    Retracted(BlockHash),
    /// Included, but finality was not reached in time.
    FinalityTimeout(BlockHash),
    /// Included in a finalized block.
    Finalized(BlockHash),
    /// Replaced by another transaction with the same nonce.
    Usurped(TxHash),
    /// Removed from the pool.
    Dropped,
    /// Declared invalid.
    Invalid,
}

impl TxStatus {
    /// Block hash for statuses that mean the transaction sits in a block.
    #[must_use]
    pub fn included_in(&self) -> Option<BlockHash> {
        match self {
            Self::InBlock(hash) | Self::Finalized(hash) | Self::FinalityTimeout(hash) => {
                Some(*hash)
            },
            _ => None,
        }
    }

    /// True for statuses after which the transaction will never be included.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Usurped(_) | Self::Dropped | Self::Invalid)
    }
}

/// Byte string serialized as `0x` hex.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&cess_types::to_hex(&self.0))
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        cess_types::from_hex(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

/// Serde for block numbers, which the node renders as hex strings.
mod hex_number {
    use cess_types::BlockNumber;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(number: &BlockNumber, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{number:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BlockNumber, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        BlockNumber::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tx_status_wire_forms() {
        let ready: TxStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(ready, TxStatus::Ready);

        let hash = format!("0x{}", "ab".repeat(32));
        let in_block: TxStatus =
            serde_json::from_str(&format!("{{\"inBlock\":\"{hash}\"}}")).unwrap();
        assert_eq!(in_block.included_in(), Some(BlockHash([0xab; 32])));

        let finalized: TxStatus =
            serde_json::from_str(&format!("{{\"finalized\":\"{hash}\"}}")).unwrap();
        assert!(finalized.included_in().is_some());

        let broadcast: TxStatus =
            serde_json::from_str("{\"broadcast\":[\"12D3KooWpeer\"]}").unwrap();
        assert_eq!(broadcast, TxStatus::Broadcast(vec!["12D3KooWpeer".to_owned()]));
        assert!(broadcast.included_in().is_none());

        assert!(serde_json::from_str::<TxStatus>("\"invalid\"").unwrap().is_rejection());
        assert!(serde_json::from_str::<TxStatus>("\"dropped\"").unwrap().is_rejection());
    }

    #[test]
    fn header_number_is_hex() {
        let zero = format!("0x{}", "00".repeat(32));
        let json = format!(
            "{{\"parentHash\":\"{zero}\",\"number\":\"0x1a2b\",\"stateRoot\":\"{zero}\",\
             \"extrinsicsRoot\":\"{zero}\",\"digest\":{{\"logs\":[]}}}}"
        );
        let header: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(header.number, 0x1a2b);
        let back = serde_json::to_value(&header).unwrap();
        assert_eq!(back["number"], "0x1a2b");
    }

    #[test]
    fn storage_change_set_with_absent_value() {
        let block = format!("0x{}", "01".repeat(32));
        let json = format!("{{\"block\":\"{block}\",\"changes\":[[\"0x0102\",\"0x03\"],[\"0x04\",null]]}}");
        let set: StorageChangeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set.changes.len(), 2);
        assert_eq!(set.changes[0].1, Some(Bytes(vec![3])));
        assert_eq!(set.changes[1].1, None);
    }

    #[test]
    fn health_from_node_json() {
        let health: Health =
            serde_json::from_str("{\"peers\":3,\"isSyncing\":false,\"shouldHavePeers\":true}")
                .unwrap();
        assert_eq!(health.peers, 3);
        assert!(!health.is_syncing);
    }
}
