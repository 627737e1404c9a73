//! Client SDK for the CESS storage chain.
//!
//! Turns storage and mining operations (register a role, create a bucket,
//! query balances and miner state) into node interactions, and distributes
//! files as erasure-coded fragments across storage peers.
//!
//! # Features
//!
//! - **Failover**: ordered endpoint list, lock-free health flag, inline reconnect
//! - **Typed storage**: bit-exact storage keys and strict value decoding
//! - **Found vs. not found**: reads tell an absent key apart from a failure
//! - **Confirmed writes**: every submission resolves to exactly one outcome
//!   (matched success event, on-chain failure, or timeout)
//! - **Cancellation**: per-request tokens and client-wide shutdown
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cess_sdk::{ChainClient, ClientConfig, Ed25519Signer};
//!
//! #[tokio::main]
//! async fn main() -> cess_sdk::Result<()> {
//!     let config = ClientConfig::builder()
//!         .with_endpoints(["wss://node-a:9944", "wss://node-b:9944"])
//!         .build()?;
//!
//!     let signer = Arc::new(Ed25519Signer::from_seed_hex(SEED)?);
//!     let client = ChainClient::connect_ws(config, codec, signer).await?;
//!
//!     let account = client.query_account(&client.account_id()).await;
//!     let outcome = client.create_bucket(&client.account_id(), "photos").await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ChainClient (Public API)                   │
//! │  .create_bucket() │ .register() │ .query_account() │ ...   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     TransactionEngine        │         QueryEngine          │
//! │  nonce │ sign │ watch │ events│  get_one │ enumerate │ retry│
//! ├──────────────────────────────┴──────────────────────────────┤
//! │          StorageAddress  │  MetadataCache  │  Signer        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    ConnectionManager                        │
//! │   Endpoint failover │ Health flag │ Handle swap (arc-swap)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │              NodeRpc (jsonrpsee WebSocket / mock)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod connection;
mod error;
mod events;
mod extrinsic;
pub mod file;
mod metadata;
mod metrics;
pub mod mock;
mod ops;
mod query;
mod retry;
mod rpc;
mod signer;
mod storage;
mod tx;
mod ws;

// Public API exports
pub use client::ChainClient;
pub use config::{ClientConfig, ClientConfigBuilder, RetryPolicy, RetryPolicyBuilder};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use error::{Result, SdkError};
pub use events::{DispatchError, EventMatcher, EventRecord, ExpectEvent, ModuleError, Phase};
pub use extrinsic::{CallRequest, Era, SigningPayload, UncheckedExtrinsic, tx_hash};
pub use metadata::{IndexedName, Metadata, MetadataCache, PalletMetadata, RuntimeCodec, decode_pallet_list};
pub use crate::metrics::{ConnectionEvent, MetricsSdkMetrics, NoopSdkMetrics, SdkMetrics};
pub use ops::{
    AccountData, AccountInfo, BucketInfo, FileHash, MinerInfo, OssInfo, PEER_ID_LEN, PeerId, Registration,
};
pub use query::{Enumerated, QueryEngine, QueryResult};
pub use retry::{with_retry, with_retry_cancellable};
pub use rpc::{
    Block, Bytes, Connector, Header, Health, NodeRpc, SignedBlock, StorageChangeSet, StorageEntry, TxStatus,
    TxStatusStream,
};
pub use signer::{Ed25519Signer, MultiSignature, Signer, verify};
pub use storage::{KeyHasher, PREFIX_LEN, StorageAddress, decode_map_key};
pub use tx::{FailureReason, IncludedTx, OutcomeKind, TransactionEngine, TxOptions, TxOutcome};
pub use ws::{WsConnector, WsNode};

// Re-export commonly used types from cess-types
pub use cess_types::{AccountId, Balance, BlockHash, BlockNumber, Hash256, Nonce, Role, RuntimeVersion, TxHash};
