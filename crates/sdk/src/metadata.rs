//! Chain schema and the per-connection metadata cache.
//!
//! [`Metadata`] maps human names (`"FileBank.create_bucket"`) to the numeric
//! indices the runtime expects, and numeric event indices back to names.
//! Turning the node's raw metadata blob into a [`Metadata`] is delegated to a
//! [`RuntimeCodec`].
//!
//! A [`MetadataCache`] is fetched once per connection and bundled into the
//! connection snapshot; it is never refreshed in place.

use std::{collections::HashMap, fmt};

use cess_types::{BlockHash, RuntimeVersion};
use parity_scale_codec::{Decode, Encode};

use crate::{
    error::{EncodingSnafu, Result},
    events::EventRecord,
    rpc::NodeRpc,
};

/// Decodes runtime metadata and block events.
///
/// The runtime's type registry determines the exact byte layouts, so both
/// operations are supplied by the caller rather than hard-coded here.
pub trait RuntimeCodec: Send + Sync + fmt::Debug {
    /// Decodes the `state_getMetadata` blob.
    fn decode_metadata(&self, bytes: &[u8]) -> Result<Metadata>;

    /// Decodes the `System.Events` storage value of one block.
    fn decode_events(&self, metadata: &Metadata, bytes: &[u8]) -> Result<Vec<EventRecord>>;
}

/// Named, indexed entry of a pallet (a call, an event or an error).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexedName {
    /// Entry name as declared by the runtime.
    pub name: String,
    /// Index within the pallet.
    pub index: u8,
}

impl IndexedName {
    /// Creates an entry.
    pub fn new(name: impl Into<String>, index: u8) -> Self {
        Self { name: name.into(), index }
    }
}

/// Schema of one pallet (module).
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PalletMetadata {
    /// Pallet name, e.g. `FileBank`.
    pub name: String,
    /// Pallet index used in call and event encoding.
    pub index: u8,
    /// Dispatchable calls.
    pub calls: Vec<IndexedName>,
    /// Storage item names.
    pub storage: Vec<String>,
    /// Events.
    pub events: Vec<IndexedName>,
    /// Dispatch errors.
    pub errors: Vec<IndexedName>,
}

impl PalletMetadata {
    fn find(entries: &[IndexedName], name: &str) -> Option<u8> {
        entries.iter().find(|e| e.name == name).map(|e| e.index)
    }

    fn name_of(entries: &[IndexedName], index: u8) -> Option<&str> {
        entries.iter().find(|e| e.index == index).map(|e| e.name.as_str())
    }

    /// Index of the call named `name`.
    #[must_use]
    pub fn call_index(&self, name: &str) -> Option<u8> {
        Self::find(&self.calls, name)
    }

    /// Name of the event at `index`.
    #[must_use]
    pub fn event_name(&self, index: u8) -> Option<&str> {
        Self::name_of(&self.events, index)
    }

    /// Name of the error at `index`.
    #[must_use]
    pub fn error_name(&self, index: u8) -> Option<&str> {
        Self::name_of(&self.errors, index)
    }

    /// Whether the pallet declares the storage item `item`.
    #[must_use]
    pub fn has_storage(&self, item: &str) -> bool {
        self.storage.iter().any(|s| s == item)
    }
}

/// Decoded chain schema with name and index lookups.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pallets: Vec<PalletMetadata>,
    by_name: HashMap<String, usize>,
    by_index: HashMap<u8, usize>,
}

impl Metadata {
    /// Builds lookups over `pallets`.
    #[must_use]
    pub fn new(pallets: Vec<PalletMetadata>) -> Self {
        let by_name = pallets.iter().enumerate().map(|(i, p)| (p.name.clone(), i)).collect();
        let by_index = pallets.iter().enumerate().map(|(i, p)| (p.index, i)).collect();
        Self { pallets, by_name, by_index }
    }

    /// All pallets, in declaration order.
    #[must_use]
    pub fn pallets(&self) -> &[PalletMetadata] {
        &self.pallets
    }

    /// Looks up a pallet by name.
    #[must_use]
    pub fn pallet(&self, name: &str) -> Option<&PalletMetadata> {
        self.by_name.get(name).map(|&i| &self.pallets[i])
    }

    /// Looks up a pallet by index.
    #[must_use]
    pub fn pallet_by_index(&self, index: u8) -> Option<&PalletMetadata> {
        self.by_index.get(&index).map(|&i| &self.pallets[i])
    }

    /// Resolves a `"Module.method"` descriptor to `(pallet index, call index)`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Encoding`](crate::SdkError::Encoding) if the
    /// descriptor is malformed or names an unknown module or call.
    pub fn call_index(&self, descriptor: &str) -> Result<(u8, u8)> {
        let (module, method) = split_descriptor(descriptor)?;
        let pallet = self
            .pallet(module)
            .ok_or_else(|| EncodingSnafu { message: format!("unknown module '{module}'") }.build())?;
        let call = pallet.call_index(method).ok_or_else(|| {
            EncodingSnafu { message: format!("module '{module}' has no call '{method}'") }.build()
        })?;
        Ok((pallet.index, call))
    }

    /// Resolves event indices to `(module, event)` names.
    #[must_use]
    pub fn event_name(&self, pallet_index: u8, event_index: u8) -> Option<(&str, &str)> {
        let pallet = self.pallet_by_index(pallet_index)?;
        Some((pallet.name.as_str(), pallet.event_name(event_index)?))
    }

    /// Resolves a module error to `(module, error)` names.
    #[must_use]
    pub fn error_name(&self, pallet_index: u8, error_index: u8) -> Option<(&str, &str)> {
        let pallet = self.pallet_by_index(pallet_index)?;
        Some((pallet.name.as_str(), pallet.error_name(error_index)?))
    }
}

/// Splits `"Module.method"` into its two non-empty halves.
pub(crate) fn split_descriptor(descriptor: &str) -> Result<(&str, &str)> {
    match descriptor.split_once('.') {
        Some((module, method))
            if !module.is_empty() && !method.is_empty() && !method.contains('.') =>
        {
            Ok((module, method))
        },
        _ => EncodingSnafu { message: format!("malformed call descriptor '{descriptor}'") }.fail(),
    }
}

/// Schema, genesis hash and runtime version of one connection.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    /// Decoded chain schema.
    pub metadata: Metadata,
    /// Hash of block zero.
    pub genesis_hash: BlockHash,
    /// Runtime version at fetch time.
    pub runtime_version: RuntimeVersion,
}

impl MetadataCache {
    /// Fetches and decodes everything the engines need from `node`.
    ///
    /// # Errors
    ///
    /// Returns the node's error if any of the three fetches fails, or an
    /// encoding error if the metadata blob cannot be decoded.
    pub async fn fetch(node: &dyn NodeRpc, codec: &dyn RuntimeCodec) -> Result<Self> {
        let (raw, genesis_hash, runtime_version) =
            futures::try_join!(node.metadata(), node.genesis_hash(), node.runtime_version())?;
        let metadata = codec.decode_metadata(&raw)?;
        tracing::debug!(
            endpoint = node.endpoint(),
            pallets = metadata.pallets().len(),
            spec_version = runtime_version.spec_version,
            genesis = %genesis_hash,
            "metadata fetched"
        );
        Ok(Self { metadata, genesis_hash, runtime_version })
    }
}

/// Decodes a SCALE `Vec<PalletMetadata>` blob.
///
/// Runtimes that publish their schema in this compact form need no further
/// codec; the mock node uses it too.
///
/// # Errors
///
/// Returns an encoding error if the bytes are not a pallet list.
pub fn decode_pallet_list(bytes: &[u8]) -> Result<Metadata> {
    let pallets: Vec<PalletMetadata> = cess_types::decode(bytes).map_err(|e| {
        EncodingSnafu { message: format!("metadata is not a pallet list: {e}") }.build()
    })?;
    Ok(Metadata::new(pallets))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    fn file_bank() -> PalletMetadata {
        PalletMetadata {
            name: "FileBank".to_owned(),
            index: 11,
            calls: vec![IndexedName::new("create_bucket", 7), IndexedName::new("delete_bucket", 8)],
            storage: vec!["Bucket".to_owned()],
            events: vec![IndexedName::new("CreateBucket", 4)],
            errors: vec![IndexedName::new("NameTooShort", 2)],
        }
    }

    #[test]
    fn call_index_resolves() {
        let md = Metadata::new(vec![file_bank()]);
        assert_eq!(md.call_index("FileBank.create_bucket").unwrap(), (11, 7));
        assert_eq!(md.call_index("FileBank.delete_bucket").unwrap(), (11, 8));
    }

    #[test]
    fn call_index_errors() {
        let md = Metadata::new(vec![file_bank()]);
        for bad in ["Nope.create_bucket", "FileBank.nope", "FileBank", ".x", "FileBank.", "a.b.c"] {
            assert!(
                matches!(md.call_index(bad), Err(SdkError::Encoding { .. })),
                "descriptor {bad} should fail"
            );
        }
    }

    #[test]
    fn event_and_error_names() {
        let md = Metadata::new(vec![file_bank()]);
        assert_eq!(md.event_name(11, 4), Some(("FileBank", "CreateBucket")));
        assert_eq!(md.event_name(11, 5), None);
        assert_eq!(md.event_name(12, 4), None);
        assert_eq!(md.error_name(11, 2), Some(("FileBank", "NameTooShort")));
        assert!(md.pallet("FileBank").unwrap().has_storage("Bucket"));
    }

    #[test]
    fn pallet_list_blob_decodes() {
        let blob = cess_types::encode(&vec![file_bank()]);
        let md = decode_pallet_list(&blob).unwrap();
        assert_eq!(md.pallets().len(), 1);
        assert!(decode_pallet_list(&blob[..blob.len() - 1]).is_err());
    }
}
