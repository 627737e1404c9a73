//! Storage and mining operations.
//!
//! Thin compositions over [`ChainClient::submit`] and the query engine. Each
//! write validates its arguments, builds the `"Module.method"` call and names
//! the event that proves success; the engine does the rest.

use cess_types::{AccountId, Balance, Nonce, Role, validate_bucket_name, validate_domain};
use parity_scale_codec::{Decode, Encode};

use crate::{
    client::ChainClient,
    error::{InvalidArgumentSnafu, Result},
    events::ExpectEvent,
    extrinsic::CallRequest,
    query::QueryResult,
    storage::{KeyHasher, StorageAddress, decode_map_key},
    tx::TxOutcome,
};

/// Length of a libp2p peer id as stored on chain.
pub const PEER_ID_LEN: usize = 38;

/// Raw libp2p peer id.
pub type PeerId = [u8; PEER_ID_LEN];

/// Hex-encoded file hash as stored on chain.
pub type FileHash = [u8; 64];

// =============================================================================
// Chain Types
// =============================================================================

/// Balances held by an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct AccountData {
    /// Spendable balance.
    pub free: Balance,
    /// Balance reserved by pallets.
    pub reserved: Balance,
    /// Balance that cannot be transferred.
    pub frozen: Balance,
    /// Account flags.
    pub flags: u128,
}

/// `System.Account` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct AccountInfo {
    /// Transactions sent so far.
    pub nonce: Nonce,
    /// Modules depending on this account.
    pub consumers: u32,
    /// Modules allowing this account to exist.
    pub providers: u32,
    /// Self-sufficient references.
    pub sufficients: u32,
    /// Balances.
    pub data: AccountData,
}

/// `FileBank.Bucket` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct BucketInfo {
    /// Files stored in the bucket.
    pub object_list: Vec<FileHash>,
    /// Accounts allowed to operate the bucket.
    pub authority: Vec<AccountId>,
}

/// `Oss.Oss` entry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct OssInfo {
    /// Gateway peer id.
    pub peer_id: PeerId,
    /// Advertised domain, possibly empty.
    pub domain: Vec<u8>,
}

/// `Sminer.MinerItems` entry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MinerInfo {
    /// Account receiving rewards.
    pub beneficiary: AccountId,
    /// Account holding the collateral.
    pub staking_account: AccountId,
    /// Miner peer id.
    pub peer_id: PeerId,
    /// Collateral locked.
    pub collaterals: Balance,
    /// Outstanding penalties.
    pub debt: Balance,
    /// Lifecycle state, e.g. `positive` or `frozen`.
    pub state: Vec<u8>,
    /// Space the miner promised, in bytes.
    pub declaration_space: u128,
    /// Space certified but unused.
    pub idle_space: u128,
    /// Space holding user data.
    pub service_space: u128,
    /// Space locked for pending orders.
    pub lock_space: u128,
}

impl MinerInfo {
    /// Lifecycle state as text.
    #[must_use]
    pub fn state_str(&self) -> &str {
        std::str::from_utf8(&self.state).unwrap_or("<invalid>")
    }
}

/// Arguments for registering a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Register the signer as an object storage gateway.
    Oss {
        /// Gateway peer id.
        peer_id: PeerId,
        /// Domain to advertise; may be empty.
        domain: String,
    },
    /// Register the signer as a storage miner and stake collateral.
    Storage {
        /// Account receiving rewards.
        beneficiary: AccountId,
        /// Miner peer id.
        peer_id: PeerId,
        /// Collateral to stake.
        staking: Balance,
        /// Declared capacity in TiB.
        tib_count: u32,
    },
}

impl Registration {
    /// Role this registration creates.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Oss { .. } => Role::Oss,
            Self::Storage { .. } => Role::Storage,
        }
    }

    fn call(&self) -> Result<(CallRequest, ExpectEvent)> {
        match self {
            Self::Oss { peer_id, domain } => {
                validate_domain(domain)?;
                let call = CallRequest::new("Oss.register").arg(peer_id).arg(domain.as_bytes());
                Ok((call, ExpectEvent::new("Oss", "OssRegister")))
            },
            Self::Storage { beneficiary, peer_id, staking, tib_count } => {
                snafu::ensure!(
                    *tib_count > 0,
                    InvalidArgumentSnafu { message: "tib_count must be positive" }
                );
                let call = CallRequest::new("Sminer.regnstk")
                    .arg(beneficiary)
                    .arg(peer_id)
                    .arg(staking)
                    .arg(tib_count);
                Ok((call, ExpectEvent::new("Sminer", "Registered")))
            },
        }
    }
}

// =============================================================================
// Addresses
// =============================================================================

fn account_address(account: &AccountId) -> StorageAddress {
    StorageAddress::new("System", "Account").with_key(KeyHasher::Blake2_128Concat, account)
}

fn bucket_address(owner: &AccountId, name: &str) -> StorageAddress {
    StorageAddress::new("FileBank", "Bucket")
        .with_key(KeyHasher::Blake2_128Concat, owner)
        .with_key(KeyHasher::Blake2_128Concat, name.as_bytes())
}

fn registration_address(role: Role, account: &AccountId) -> StorageAddress {
    let item = match role {
        Role::Storage => "MinerItems",
        Role::Oss => "Oss",
        Role::Validator => "Workers",
    };
    StorageAddress::new(role.module(), item).with_key(KeyHasher::Blake2_128Concat, account)
}

// =============================================================================
// Operations
// =============================================================================

impl ChainClient {
    /// Reads an account's nonce and balances.
    pub async fn query_account(&self, account: &AccountId) -> QueryResult<AccountInfo> {
        self.get_one(&account_address(account)).await
    }

    /// Reads one bucket.
    pub async fn query_bucket(&self, owner: &AccountId, name: &str) -> QueryResult<BucketInfo> {
        self.get_one(&bucket_address(owner, name)).await
    }

    /// Reads a gateway's registration.
    pub async fn query_oss(&self, account: &AccountId) -> QueryResult<OssInfo> {
        self.get_one(&registration_address(Role::Oss, account)).await
    }

    /// Reads a storage miner's state.
    pub async fn query_miner(&self, account: &AccountId) -> QueryResult<MinerInfo> {
        self.get_one(&registration_address(Role::Storage, account)).await
    }

    /// Lists every storage miner with its account.
    ///
    /// Entries whose value or key does not decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a page read fails.
    pub async fn query_all_miners(&self) -> Result<Vec<(AccountId, MinerInfo)>> {
        let address = StorageAddress::new("Sminer", "MinerItems");
        let enumerated = self.enumerate::<MinerInfo>(&address).await?;
        Ok(enumerated
            .entries
            .into_iter()
            .filter_map(|(key, miner)| {
                let account = address
                    .key_suffix(&key)
                    .and_then(|suffix| decode_map_key(KeyHasher::Blake2_128Concat, suffix).ok());
                if account.is_none() {
                    tracing::warn!(key = %cess_types::to_hex(&key), "skipping miner with undecodable key");
                }
                account.map(|account| (account, miner))
            })
            .collect())
    }

    /// Whether `account` is registered under `role`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn is_registered(&self, role: Role, account: &AccountId) -> Result<bool> {
        let address = registration_address(role, account);
        let raw = self.guarded("is_registered", async { Ok(self.query().get_raw(&address).await) }).await?;
        Ok(raw.into_result()?.is_some())
    }

    /// Creates a bucket owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidArgument`](crate::SdkError::InvalidArgument)
    /// for an invalid name, otherwise see [`ChainClient::submit`].
    pub async fn create_bucket(&self, owner: &AccountId, name: &str) -> Result<TxOutcome> {
        validate_bucket_name(name)?;
        let call = CallRequest::new("FileBank.create_bucket").arg(owner).arg(name.as_bytes());
        self.submit(call, &ExpectEvent::new("FileBank", "CreateBucket")).await
    }

    /// Deletes an empty bucket owned by `owner`.
    ///
    /// # Errors
    ///
    /// Same as [`create_bucket`](Self::create_bucket).
    pub async fn delete_bucket(&self, owner: &AccountId, name: &str) -> Result<TxOutcome> {
        validate_bucket_name(name)?;
        let call = CallRequest::new("FileBank.delete_bucket").arg(owner).arg(name.as_bytes());
        self.submit(call, &ExpectEvent::new("FileBank", "DeleteBucket")).await
    }

    /// Registers the signer in the role `registration` describes.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::InvalidArgument`](crate::SdkError::InvalidArgument)
    /// for invalid arguments, otherwise see [`ChainClient::submit`].
    pub async fn register(&self, registration: &Registration) -> Result<TxOutcome> {
        let (call, matcher) = registration.call()?;
        tracing::debug!(role = %registration.role(), account = %self.account_id(), "registering");
        self.submit(call, &matcher).await
    }

    /// Registers the signer as a gateway.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub async fn register_oss(&self, peer_id: PeerId, domain: &str) -> Result<TxOutcome> {
        self.register(&Registration::Oss { peer_id, domain: domain.to_owned() }).await
    }

    /// Registers the signer as a storage miner.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub async fn register_miner(
        &self,
        beneficiary: AccountId,
        peer_id: PeerId,
        staking: Balance,
        tib_count: u32,
    ) -> Result<TxOutcome> {
        self.register(&Registration::Storage { beneficiary, peer_id, staking, tib_count }).await
    }
}
