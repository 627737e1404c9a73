//! In-memory chain node for SDK testing.
//!
//! This module provides a controllable [`NodeRpc`] implementation so the
//! engines can be exercised without a running chain.
//!
//! # Features
//!
//! - **Storage**: raw key/value state readable through point reads and paged enumeration
//! - **Blocks**: a growing chain where every accepted extrinsic lands in its own block
//! - **Transaction checks**: submitted extrinsics are decoded, nonce-checked and
//!   signature-verified like a real pool would
//! - **Programmable outcomes**: include with events, fail dispatch, never emit,
//!   reject, break the subscription
//! - **Failure injection**: per-endpoint up/down and stalls, per-method transport errors and delays
//! - **Counters**: connects, probes, metadata fetches, submissions and per-method calls
//! - **Fragments**: [`MemoryTransport`] stores fragments per peer with outage and corruption injection
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cess_sdk::mock::{MockChain, MockCodec, MockConnector, MockEvent, SubmitBehavior};
//! use cess_sdk::{ChainClient, ClientConfig, Ed25519Signer};
//!
//! # async fn example() -> cess_sdk::Result<()> {
//! let chain = MockChain::new();
//! chain.push_behavior(SubmitBehavior::include([MockEvent::new("FileBank", "CreateBucket")]));
//!
//! let config = ClientConfig::builder().with_endpoint("ws://mock:9944").build()?;
//! let client = ChainClient::connect(
//!     config,
//!     Arc::new(MockConnector::new(Arc::clone(&chain))),
//!     Arc::new(MockCodec),
//!     Arc::new(Ed25519Signer::generate()),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cess_types::{AccountId, BlockHash, BlockNumber, Hash256, Nonce, RuntimeVersion, blake2_256};
use futures::{StreamExt, stream};
use parity_scale_codec::{Decode, Encode};
use parking_lot::RwLock;

use crate::{
    error::{FragmentSnafu, Result, SdkError, TransportSnafu},
    events::{DispatchError, EventRecord, Phase},
    extrinsic::{SigningPayload, UncheckedExtrinsic},
    file::FragmentTransport,
    metadata::{IndexedName, Metadata, PalletMetadata, RuntimeCodec, decode_pallet_list},
    rpc::{Block, Bytes, Connector, Header, Health, NodeRpc, StorageEntry, TxStatus, TxStatusStream},
    signer::verify,
    storage::StorageAddress,
};

/// Number of blocks the mock chain starts with, genesis included.
const INITIAL_BLOCKS: BlockNumber = 8;

/// Stand-in for the timestamp inherent that precedes every signed extrinsic.
const INHERENT: [u8; 4] = [0x0c, 0x04, 0x03, 0x00];

/// Event as stored in the mock's `System.Events` blob.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RawEvent {
    /// Emission phase.
    pub phase: Phase,
    /// Pallet index.
    pub pallet_index: u8,
    /// Event index.
    pub variant_index: u8,
    /// Encoded event fields.
    pub fields: Vec<u8>,
    /// Topics.
    pub topics: Vec<[u8; 32]>,
}

/// Event named by pallet and variant, resolved against the mock metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEvent {
    pallet: String,
    variant: String,
    fields: Vec<u8>,
}

impl MockEvent {
    /// Event `pallet.variant` with no fields.
    pub fn new(pallet: impl Into<String>, variant: impl Into<String>) -> Self {
        Self { pallet: pallet.into(), variant: variant.into(), fields: Vec::new() }
    }

    /// Appends one encoded field.
    #[must_use]
    pub fn with_field<T: Encode + ?Sized>(mut self, value: &T) -> Self {
        value.encode_to(&mut self.fields);
        self
    }
}

/// What the mock does with the next accepted extrinsic.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Include it in a new block with these events plus `System.ExtrinsicSuccess`.
    Include(Vec<MockEvent>),
    /// Include it with `System.ExtrinsicFailed` carrying this error.
    Fail(DispatchError),
    /// Include it, but store an events blob that does not decode.
    GarbledEvents,
    /// Report `Ready` and then nothing.
    NeverEmit,
    /// Refuse it with a JSON-RPC error.
    Reject {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
    /// Report `Ready`, then fail the subscription.
    StreamError,
    /// Report `Ready`, then `Dropped`.
    Drop,
    /// Report `Ready`, then close the stream.
    Close,
    /// Panic inside the node call.
    Panic,
}

impl SubmitBehavior {
    /// Include with the given events.
    pub fn include(events: impl IntoIterator<Item = MockEvent>) -> Self {
        Self::Include(events.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
struct MockBlock {
    hash: BlockHash,
    header: Header,
    extrinsics: Vec<Vec<u8>>,
    events: Vec<u8>,
}

#[derive(Debug)]
struct ChainState {
    storage: BTreeMap<Vec<u8>, Vec<u8>>,
    blocks: Vec<MockBlock>,
    nonces: HashMap<AccountId, Nonce>,
    pallets: Vec<PalletMetadata>,
    runtime_version: RuntimeVersion,
    down: HashSet<String>,
    connect_delays: HashMap<String, Duration>,
    delays: HashMap<String, Duration>,
    endpoint_delays: HashMap<String, Duration>,
    failures: HashMap<String, usize>,
    behaviors: VecDeque<SubmitBehavior>,
    default_behavior: SubmitBehavior,
    decoys: Vec<MockEvent>,
    submitted: Vec<UncheckedExtrinsic>,
    calls: HashMap<String, usize>,
}

/// Shared state behind every [`MockNode`] of one test.
#[derive(Debug)]
pub struct MockChain {
    state: RwLock<ChainState>,
    connects: AtomicUsize,
    probes: AtomicUsize,
    metadata_fetches: AtomicUsize,
}

impl MockChain {
    /// Creates a chain with a few blocks and the default pallet layout.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let mut state = ChainState {
            storage: BTreeMap::new(),
            blocks: Vec::new(),
            nonces: HashMap::new(),
            pallets: default_pallets(),
            runtime_version: RuntimeVersion {
                spec_name: "cess-node".to_owned(),
                impl_name: "cess-node".to_owned(),
                spec_version: 100,
                transaction_version: 1,
            },
            down: HashSet::new(),
            connect_delays: HashMap::new(),
            delays: HashMap::new(),
            endpoint_delays: HashMap::new(),
            failures: HashMap::new(),
            behaviors: VecDeque::new(),
            default_behavior: SubmitBehavior::Include(Vec::new()),
            decoys: Vec::new(),
            submitted: Vec::new(),
            calls: HashMap::new(),
        };
        for _ in 0..INITIAL_BLOCKS {
            state.push_block(vec![INHERENT.to_vec()], Vec::<RawEvent>::new().encode());
        }
        Arc::new(Self {
            state: RwLock::new(state),
            connects: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            metadata_fetches: AtomicUsize::new(0),
        })
    }

    // =========================================================================
    // State setup
    // =========================================================================

    /// Stores raw bytes under `key`.
    pub fn put_raw(&self, key: Vec<u8>, value: Vec<u8>) {
        self.state.write().storage.insert(key, value);
    }

    /// Stores the encoding of `value` at `address`.
    pub fn put_value<T: Encode + ?Sized>(&self, address: &StorageAddress, value: &T) {
        self.put_raw(address.derive(), value.encode());
    }

    /// Removes the value at `address`.
    pub fn remove(&self, address: &StorageAddress) {
        self.state.write().storage.remove(&address.derive());
    }

    /// Sets the next nonce of `account`.
    pub fn set_nonce(&self, account: &AccountId, nonce: Nonce) {
        self.state.write().nonces.insert(*account, nonce);
    }

    /// Next nonce the pool expects from `account`.
    #[must_use]
    pub fn nonce(&self, account: &AccountId) -> Nonce {
        self.state.read().nonces.get(account).copied().unwrap_or(0)
    }

    /// Replaces the runtime spec version reported to new connections.
    pub fn set_spec_version(&self, spec_version: u32) {
        self.state.write().runtime_version.spec_version = spec_version;
    }

    /// Appends empty blocks.
    pub fn advance_blocks(&self, count: u32) {
        let mut state = self.state.write();
        for _ in 0..count {
            state.push_block(vec![INHERENT.to_vec()], Vec::<RawEvent>::new().encode());
        }
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Takes an endpoint up or down. A down endpoint refuses connections and
    /// fails every call on nodes already connected to it.
    pub fn set_endpoint_up(&self, endpoint: &str, up: bool) {
        let mut state = self.state.write();
        if up {
            state.down.remove(endpoint);
        } else {
            state.down.insert(endpoint.to_owned());
        }
    }

    /// Delays connection attempts to `endpoint`.
    pub fn set_connect_delay(&self, endpoint: &str, delay: Duration) {
        self.state.write().connect_delays.insert(endpoint.to_owned(), delay);
    }

    /// Delays every call to `method`.
    pub fn set_delay(&self, method: &str, delay: Duration) {
        self.state.write().delays.insert(method.to_owned(), delay);
    }

    /// Delays every call answered by `endpoint`. Connecting is not affected,
    /// so this models a node that accepts sockets but stalls on requests.
    pub fn set_endpoint_delay(&self, endpoint: &str, delay: Duration) {
        self.state.write().endpoint_delays.insert(endpoint.to_owned(), delay);
    }

    /// Fails the next `count` calls to `method` with a transport error.
    pub fn fail_next(&self, method: &str, count: usize) {
        self.state.write().failures.insert(method.to_owned(), count);
    }

    /// Queues the behavior for the next accepted extrinsic.
    pub fn push_behavior(&self, behavior: SubmitBehavior) {
        self.state.write().behaviors.push_back(behavior);
    }

    /// Behavior used when the queue is empty.
    pub fn set_default_behavior(&self, behavior: SubmitBehavior) {
        self.state.write().default_behavior = behavior;
    }

    /// Events emitted by the inherent at index 0 of every new block.
    pub fn set_decoy_events(&self, events: Vec<MockEvent>) {
        self.state.write().decoys = events;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Successful connections.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `system_health` calls.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// `state_getMetadata` calls.
    #[must_use]
    pub fn metadata_fetch_count(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }

    /// Calls to `method`, including failed ones.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.state.read().calls.get(method).copied().unwrap_or(0)
    }

    /// Extrinsics the pool accepted, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<UncheckedExtrinsic> {
        self.state.read().submitted.clone()
    }

    /// Accepted extrinsic count.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.state.read().submitted.len()
    }

    /// Hash of block zero.
    #[must_use]
    pub fn genesis_hash(&self) -> BlockHash {
        self.state.read().blocks[0].hash
    }

    /// Hash of the latest block.
    #[must_use]
    pub fn best_hash(&self) -> BlockHash {
        self.state.read().best().hash
    }

    /// Number of the latest block.
    #[must_use]
    pub fn best_number(&self) -> BlockNumber {
        self.state.read().best().header.number
    }

    /// Metadata the mock serves.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        Metadata::new(self.state.read().pallets.clone())
    }

    // =========================================================================
    // Node internals
    // =========================================================================

    /// Counts the call, applies delays, and fails it if the endpoint is down
    /// or a failure is queued.
    async fn enter(&self, endpoint: &str, method: &str) -> Result<()> {
        let delay = {
            let mut state = self.state.write();
            *state.calls.entry(method.to_owned()).or_default() += 1;
            let by_method = state.delays.get(method).copied().unwrap_or_default();
            let by_endpoint = state.endpoint_delays.get(endpoint).copied().unwrap_or_default();
            Some(by_method + by_endpoint).filter(|delay| !delay.is_zero())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write();
        if state.down.contains(endpoint) {
            return TransportSnafu { method, message: format!("{endpoint} is unreachable") }.fail();
        }
        if let Some(remaining) = state.failures.get_mut(method)
            && *remaining > 0
        {
            *remaining -= 1;
            return TransportSnafu { method, message: "injected transport failure" }.fail();
        }
        Ok(())
    }

    #[allow(clippy::panic)]
    fn accept(&self, bytes: &[u8]) -> Result<TxStatusStream> {
        let behavior = {
            let mut state = self.state.write();
            state.behaviors.pop_front().unwrap_or_else(|| state.default_behavior.clone())
        };
        match &behavior {
            SubmitBehavior::Reject { code, message } => {
                return Err(rpc_error(*code, message));
            },
            SubmitBehavior::Panic => panic!("mock node panicked during submission"),
            _ => {},
        }

        let mut state = self.state.write();
        let xt = UncheckedExtrinsic::decode(bytes).map_err(|e| rpc_error(1002, &format!("Verification Error: {e}")))?;
        let expected = state.nonces.get(&xt.signer).copied().unwrap_or(0);
        if xt.nonce < expected {
            return Err(rpc_error(1010, "Invalid Transaction: Transaction is outdated"));
        }
        if xt.nonce > expected {
            return Err(rpc_error(1010, "Invalid Transaction: Transaction will be valid in the future"));
        }

        let best = u64::from(state.best().header.number);
        let birth = xt.era.birth(best);
        let checkpoint = if xt.era.is_immortal() {
            state.blocks[0].hash
        } else {
            let Some(block) = usize::try_from(birth).ok().and_then(|n| state.blocks.get(n)) else {
                return Err(rpc_error(1010, "Invalid Transaction: AncientBirthBlock"));
            };
            block.hash
        };
        let payload = SigningPayload {
            call: &xt.call,
            era: xt.era,
            nonce: xt.nonce,
            tip: xt.tip,
            spec_version: state.runtime_version.spec_version,
            transaction_version: state.runtime_version.transaction_version,
            genesis_hash: state.blocks[0].hash,
            checkpoint,
        };
        if !verify(&xt.signer, &payload.to_signable(), &xt.signature) {
            return Err(rpc_error(1010, "Invalid Transaction: Transaction has a bad signature"));
        }

        state.nonces.insert(xt.signer, expected + 1);
        state.submitted.push(xt);

        let ready = stream::iter([Ok(TxStatus::Ready), Ok(TxStatus::Broadcast(vec!["12D3KooWMockPeer".to_owned()]))]);
        let statuses: TxStatusStream = match behavior {
            SubmitBehavior::Include(events) => {
                let mut events = state.resolve_events(Phase::ApplyExtrinsic(1), &events)?;
                events.extend(state.resolve_events(Phase::ApplyExtrinsic(1), &[MockEvent::new("System", "ExtrinsicSuccess")])?);
                let hash = state.include(bytes, events)?;
                ready.chain(stream::iter([Ok(TxStatus::InBlock(hash)), Ok(TxStatus::Finalized(hash))])).boxed()
            },
            SubmitBehavior::Fail(error) => {
                let failed = MockEvent::new("System", "ExtrinsicFailed").with_field(&error).with_field(&[0u8; 10]);
                let events = state.resolve_events(Phase::ApplyExtrinsic(1), &[failed])?;
                let hash = state.include(bytes, events)?;
                ready.chain(stream::iter([Ok(TxStatus::InBlock(hash)), Ok(TxStatus::Finalized(hash))])).boxed()
            },
            SubmitBehavior::GarbledEvents => {
                state.push_block(vec![INHERENT.to_vec(), bytes.to_vec()], vec![0xff, 0xff, 0xff]);
                let hash = state.best().hash;
                ready.chain(stream::iter([Ok(TxStatus::InBlock(hash))])).boxed()
            },
            SubmitBehavior::NeverEmit => ready.chain(stream::pending()).boxed(),
            SubmitBehavior::StreamError => ready
                .chain(stream::iter([TransportSnafu {
                    method: "author_submitAndWatchExtrinsic",
                    message: "subscription closed by node",
                }
                .fail()]))
                .boxed(),
            SubmitBehavior::Drop => ready.chain(stream::iter([Ok(TxStatus::Dropped)])).boxed(),
            SubmitBehavior::Close => ready.boxed(),
            SubmitBehavior::Reject { .. } | SubmitBehavior::Panic => ready.boxed(),
        };
        Ok(statuses)
    }
}

impl ChainState {
    fn best(&self) -> &MockBlock {
        // The chain always holds at least genesis.
        &self.blocks[self.blocks.len() - 1]
    }

    fn block_by_hash(&self, hash: BlockHash) -> Option<&MockBlock> {
        self.blocks.iter().rev().find(|block| block.hash == hash)
    }

    fn push_block(&mut self, extrinsics: Vec<Vec<u8>>, events: Vec<u8>) {
        let (number, parent_hash) = match self.blocks.last() {
            Some(parent) => (parent.header.number + 1, parent.hash),
            None => (0, BlockHash::default()),
        };
        let mut seed = number.encode();
        seed.extend_from_slice(parent_hash.as_bytes());
        seed.extend(extrinsics.encode());
        let hash = BlockHash(blake2_256(&seed));
        let header = Header {
            parent_hash,
            number,
            state_root: BlockHash(blake2_256(&hash.0)),
            extrinsics_root: BlockHash(blake2_256(&extrinsics.encode())),
        };
        self.blocks.push(MockBlock { hash, header, extrinsics, events });
    }

    fn include(&mut self, extrinsic: &[u8], events: Vec<RawEvent>) -> Result<BlockHash> {
        let decoys = self.decoys.clone();
        let mut all = self.resolve_events(Phase::ApplyExtrinsic(0), &decoys)?;
        all.extend(events);
        self.push_block(vec![INHERENT.to_vec(), extrinsic.to_vec()], all.encode());
        Ok(self.best().hash)
    }

    fn resolve_events(&self, phase: Phase, events: &[MockEvent]) -> Result<Vec<RawEvent>> {
        events
            .iter()
            .map(|event| {
                let pallet = self.pallets.iter().find(|p| p.name == event.pallet);
                let index = pallet.and_then(|p| p.events.iter().find(|e| e.name == event.variant));
                match (pallet, index) {
                    (Some(pallet), Some(variant)) => Ok(RawEvent {
                        phase,
                        pallet_index: pallet.index,
                        variant_index: variant.index,
                        fields: event.fields.clone(),
                        topics: Vec::new(),
                    }),
                    _ => Err(SdkError::InvalidArgument {
                        message: format!("mock metadata has no event {}.{}", event.pallet, event.variant),
                    }),
                }
            })
            .collect()
    }

    fn read_storage(&self, key: &[u8], at: Option<BlockHash>) -> Option<Vec<u8>> {
        if key == events_key() {
            let block = match at {
                Some(hash) => self.block_by_hash(hash)?,
                None => self.best(),
            };
            return Some(block.events.clone());
        }
        self.storage.get(key).cloned()
    }
}

fn events_key() -> Vec<u8> {
    StorageAddress::new("System", "Events").derive()
}

fn rpc_error(code: i32, message: &str) -> SdkError {
    SdkError::Rpc { method: "author_submitAndWatchExtrinsic".to_owned(), code, message: message.to_owned() }
}

fn pallet(
    name: &str,
    index: u8,
    calls: &[&str],
    storage: &[&str],
    events: &[&str],
    errors: &[&str],
) -> PalletMetadata {
    let indexed = |names: &[&str]| {
        names.iter().zip(0u8..).map(|(name, i)| IndexedName::new(*name, i)).collect::<Vec<_>>()
    };
    PalletMetadata {
        name: name.to_owned(),
        index,
        calls: indexed(calls),
        storage: storage.iter().map(|s| (*s).to_owned()).collect(),
        events: indexed(events),
        errors: indexed(errors),
    }
}

/// Pallet layout served by the mock node.
#[must_use]
pub fn default_pallets() -> Vec<PalletMetadata> {
    vec![
        pallet(
            "System",
            0,
            &["remark"],
            &["Account", "Number", "Events"],
            &["ExtrinsicSuccess", "ExtrinsicFailed"],
            &["InvalidSpecName"],
        ),
        pallet(
            "FileBank",
            11,
            &["upload_declaration", "create_bucket", "delete_bucket"],
            &["Bucket", "UserBucketList", "File"],
            &["UploadDeclaration", "CreateBucket", "DeleteBucket"],
            &["NonExistent", "SameBucketName", "NotEmpty"],
        ),
        pallet(
            "Oss",
            12,
            &["register", "update", "destroy"],
            &["Oss"],
            &["OssRegister", "OssUpdate", "OssDestroy"],
            &["Registered", "UnRegister"],
        ),
        pallet(
            "Sminer",
            13,
            &["regnstk", "increase_collateral"],
            &["MinerItems", "AllMiner"],
            &["Registered", "IncreaseCollateral"],
            &["AlreadyRegistered", "NotMiner"],
        ),
        pallet("TeeWorker", 14, &["register"], &["Workers"], &["RegistrationTeeWorker"], &["NotBond"]),
    ]
}

/// Node connected to a [`MockChain`] at one endpoint.
#[derive(Debug, Clone)]
pub struct MockNode {
    chain: Arc<MockChain>,
    endpoint: String,
}

#[async_trait]
impl NodeRpc for MockNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health(&self) -> Result<Health> {
        self.chain.probes.fetch_add(1, Ordering::SeqCst);
        self.chain.enter(&self.endpoint, "system_health").await?;
        Ok(Health { peers: 3, is_syncing: false, should_have_peers: true })
    }

    async fn metadata(&self) -> Result<Vec<u8>> {
        self.chain.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        self.chain.enter(&self.endpoint, "state_getMetadata").await?;
        Ok(self.chain.state.read().pallets.encode())
    }

    async fn genesis_hash(&self) -> Result<BlockHash> {
        self.chain.enter(&self.endpoint, "chain_getBlockHash").await?;
        Ok(self.chain.genesis_hash())
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion> {
        self.chain.enter(&self.endpoint, "state_getRuntimeVersion").await?;
        Ok(self.chain.state.read().runtime_version.clone())
    }

    async fn storage(&self, key: &[u8], at: Option<BlockHash>) -> Result<Option<Vec<u8>>> {
        self.chain.enter(&self.endpoint, "state_getStorage").await?;
        Ok(self.chain.state.read().read_storage(key, at))
    }

    async fn storage_keys_paged(
        &self,
        prefix: &[u8],
        count: u32,
        start_key: Option<&[u8]>,
        _at: Option<BlockHash>,
    ) -> Result<Vec<Vec<u8>>> {
        self.chain.enter(&self.endpoint, "state_getKeysPaged").await?;
        let state = self.chain.state.read();
        let lower = match start_key {
            Some(start) => Bound::Excluded(start.to_vec()),
            None => Bound::Included(prefix.to_vec()),
        };
        Ok(state
            .storage
            .range((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .skip_while(|key| !key.starts_with(prefix) && key.as_slice() < prefix)
            .take_while(|key| key.starts_with(prefix))
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn query_storage_at(&self, keys: &[Vec<u8>], at: Option<BlockHash>) -> Result<Vec<StorageEntry>> {
        self.chain.enter(&self.endpoint, "state_queryStorageAt").await?;
        let state = self.chain.state.read();
        Ok(keys.iter().map(|key| (key.clone(), state.read_storage(key, at))).collect())
    }

    async fn block_hash(&self, number: Option<BlockNumber>) -> Result<Option<BlockHash>> {
        self.chain.enter(&self.endpoint, "chain_getBlockHash").await?;
        let state = self.chain.state.read();
        Ok(match number {
            Some(n) => usize::try_from(n).ok().and_then(|n| state.blocks.get(n)).map(|b| b.hash),
            None => Some(state.best().hash),
        })
    }

    async fn header(&self, hash: Option<BlockHash>) -> Result<Option<Header>> {
        self.chain.enter(&self.endpoint, "chain_getHeader").await?;
        let state = self.chain.state.read();
        Ok(match hash {
            Some(hash) => state.block_by_hash(hash).map(|b| b.header.clone()),
            None => Some(state.best().header.clone()),
        })
    }

    async fn block(&self, hash: Option<BlockHash>) -> Result<Option<Block>> {
        self.chain.enter(&self.endpoint, "chain_getBlock").await?;
        let state = self.chain.state.read();
        let block = match hash {
            Some(hash) => state.block_by_hash(hash),
            None => Some(state.best()),
        };
        Ok(block.map(|b| Block {
            header: b.header.clone(),
            extrinsics: b.extrinsics.iter().map(|x| Bytes(x.clone())).collect(),
        }))
    }

    async fn finalized_head(&self) -> Result<BlockHash> {
        self.chain.enter(&self.endpoint, "chain_getFinalizedHead").await?;
        Ok(self.chain.best_hash())
    }

    async fn account_next_index(&self, account: &AccountId) -> Result<Nonce> {
        self.chain.enter(&self.endpoint, "system_accountNextIndex").await?;
        Ok(self.chain.nonce(account))
    }

    async fn submit_and_watch(&self, extrinsic: &[u8]) -> Result<TxStatusStream> {
        self.chain.enter(&self.endpoint, "author_submitAndWatchExtrinsic").await?;
        self.chain.accept(extrinsic)
    }
}

/// Connects to a [`MockChain`], honoring its endpoint state and delays.
#[derive(Debug, Clone)]
pub struct MockConnector {
    chain: Arc<MockChain>,
}

impl MockConnector {
    /// Connector for `chain`.
    #[must_use]
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str, _timeout: Duration) -> Result<Arc<dyn NodeRpc>> {
        let (down, delay) = {
            let state = self.chain.state.read();
            (state.down.contains(endpoint), state.connect_delays.get(endpoint).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if down {
            return TransportSnafu { method: "connect", message: format!("{endpoint} refused connection") }
                .fail();
        }
        self.chain.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockNode { chain: Arc::clone(&self.chain), endpoint: endpoint.to_owned() }))
    }
}

/// Codec for the mock's metadata and event encodings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCodec;

impl RuntimeCodec for MockCodec {
    fn decode_metadata(&self, bytes: &[u8]) -> Result<Metadata> {
        decode_pallet_list(bytes)
    }

    fn decode_events(&self, metadata: &Metadata, bytes: &[u8]) -> Result<Vec<EventRecord>> {
        let raw: Vec<RawEvent> = cess_types::decode(bytes)?;
        raw.into_iter()
            .map(|event| {
                let (pallet, variant) = metadata.event_name(event.pallet_index, event.variant_index).ok_or_else(|| {
                    SdkError::Encoding {
                        message: format!("unknown event {}:{}", event.pallet_index, event.variant_index),
                    }
                })?;
                Ok(EventRecord {
                    phase: event.phase,
                    pallet_index: event.pallet_index,
                    variant_index: event.variant_index,
                    pallet: pallet.to_owned(),
                    variant: variant.to_owned(),
                    fields: event.fields,
                    topics: event.topics,
                })
            })
            .collect()
    }
}

// ============================================================================
// Fragment transport
// ============================================================================

/// In-memory [`FragmentTransport`] keyed by peer and fragment hash.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    fragments: RwLock<HashMap<(String, Hash256), Vec<u8>>>,
    down: RwLock<HashSet<String>>,
    failing_writes: RwLock<HashMap<String, usize>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryTransport {
    /// Empty transport with every peer reachable.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every transfer with `peer` fail (or succeed again).
    pub fn set_peer_down(&self, peer: &str, down: bool) {
        let mut set = self.down.write();
        if down {
            set.insert(peer.to_owned());
        } else {
            set.remove(peer);
        }
    }

    /// Fails the next `count` writes to `peer`.
    pub fn fail_next_writes(&self, peer: &str, count: usize) {
        self.failing_writes.write().insert(peer.to_owned(), count);
    }

    /// Flips a byte of a stored fragment.
    pub fn corrupt(&self, peer: &str, hash: &Hash256) {
        if let Some(bytes) = self.fragments.write().get_mut(&(peer.to_owned(), *hash))
            && let Some(first) = bytes.first_mut()
        {
            *first ^= 0xff;
        }
    }

    /// Fragments currently stored.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragments.read().len()
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Read attempts so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_peer(&self, peer: &str) -> Result<()> {
        if self.down.read().contains(peer) {
            return FragmentSnafu { peer, message: "peer unreachable" }.fail();
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentTransport for MemoryTransport {
    async fn write_fragment(&self, peer: &str, hash: &Hash256, data: &[u8]) -> Result<()> {
        self.check_peer(peer)?;
        if let Some(remaining) = self.failing_writes.write().get_mut(peer)
            && *remaining > 0
        {
            *remaining -= 1;
            return FragmentSnafu { peer, message: "write interrupted" }.fail();
        }
        self.fragments.write().insert((peer.to_owned(), *hash), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_fragment(&self, peer: &str, hash: &Hash256) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_peer(peer)?;
        self.fragments
            .read()
            .get(&(peer.to_owned(), *hash))
            .cloned()
            .ok_or_else(|| FragmentSnafu { peer, message: "fragment not found" }.build())
    }
}
