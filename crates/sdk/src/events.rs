//! Block events and success matching.
//!
//! After a transaction is included, the engine reads the block's
//! `System.Events`, keeps the records emitted by that transaction's
//! extrinsic, and asks the caller's [`EventMatcher`] which one means success.

use std::fmt;

use parity_scale_codec::{Decode, Encode};

use crate::metadata::Metadata;

/// When an event was emitted within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Phase {
    /// While applying the extrinsic at this index.
    #[codec(index = 0)]
    ApplyExtrinsic(u32),
    /// During block finalization.
    #[codec(index = 1)]
    Finalization,
    /// During block initialization.
    #[codec(index = 2)]
    Initialization,
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Emission phase.
    pub phase: Phase,
    /// Pallet index.
    pub pallet_index: u8,
    /// Event index within the pallet.
    pub variant_index: u8,
    /// Pallet name.
    pub pallet: String,
    /// Event name.
    pub variant: String,
    /// SCALE-encoded event fields.
    pub fields: Vec<u8>,
    /// Indexed topics.
    pub topics: Vec<[u8; 32]>,
}

impl EventRecord {
    /// Whether this is `pallet.variant`.
    #[must_use]
    pub fn is(&self, pallet: &str, variant: &str) -> bool {
        self.pallet == pallet && self.variant == variant
    }

    /// Decodes the leading fields of the event as `T`, ignoring the rest.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the fields are too short for `T`.
    pub fn decode_fields<T: Decode>(&self) -> crate::Result<T> {
        let mut input = self.fields.as_slice();
        Ok(cess_types::decode_prefix(&mut input)?)
    }

    /// Dispatch error carried by `System.ExtrinsicFailed`, if this is one.
    #[must_use]
    pub fn dispatch_error(&self) -> Option<DispatchError> {
        if !self.is("System", "ExtrinsicFailed") {
            return None;
        }
        self.decode_fields().ok()
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pallet, self.variant)
    }
}

/// Decides which event proves a transaction succeeded.
pub trait EventMatcher: Send + Sync {
    /// Returns true if `event` is the expected success event.
    fn matches(&self, event: &EventRecord) -> bool;

    /// Short description used in logs.
    fn describe(&self) -> String {
        "custom matcher".to_owned()
    }
}

impl<F> EventMatcher for F
where
    F: Fn(&EventRecord) -> bool + Send + Sync,
{
    fn matches(&self, event: &EventRecord) -> bool {
        self(event)
    }
}

/// Matches one `pallet.variant` event, optionally checking its fields.
pub struct ExpectEvent {
    pallet: String,
    variant: String,
    fields: Option<Box<dyn Fn(&[u8]) -> bool + Send + Sync>>,
}

impl ExpectEvent {
    /// Matches any `pallet.variant` event.
    pub fn new(pallet: impl Into<String>, variant: impl Into<String>) -> Self {
        Self { pallet: pallet.into(), variant: variant.into(), fields: None }
    }

    /// Additionally requires the encoded fields to satisfy `check`.
    #[must_use]
    pub fn with_fields(mut self, check: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.fields = Some(Box::new(check));
        self
    }
}

impl fmt::Debug for ExpectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectEvent")
            .field("pallet", &self.pallet)
            .field("variant", &self.variant)
            .field("checks_fields", &self.fields.is_some())
            .finish()
    }
}

impl EventMatcher for ExpectEvent {
    fn matches(&self, event: &EventRecord) -> bool {
        event.is(&self.pallet, &self.variant)
            && self.fields.as_ref().is_none_or(|check| check(&event.fields))
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.pallet, self.variant)
    }
}

/// Error index inside a pallet's error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ModuleError {
    /// Pallet index.
    pub index: u8,
    /// Error bytes; the first is the error variant index.
    pub error: [u8; 4],
}

/// Why a dispatched extrinsic failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum DispatchError {
    /// Unspecified error.
    #[codec(index = 0)]
    Other,
    /// Account lookup failed.
    #[codec(index = 1)]
    CannotLookup,
    /// Bad origin.
    #[codec(index = 2)]
    BadOrigin,
    /// Pallet-specific error.
    #[codec(index = 3)]
    Module(ModuleError),
    /// Account still has consumers.
    #[codec(index = 4)]
    ConsumerRemaining,
    /// Account has no providers.
    #[codec(index = 5)]
    NoProviders,
    /// Too many consumers.
    #[codec(index = 6)]
    TooManyConsumers,
    /// Token error, by variant index.
    #[codec(index = 7)]
    Token(u8),
    /// Arithmetic error, by variant index.
    #[codec(index = 8)]
    Arithmetic(u8),
    /// Transactional layer error, by variant index.
    #[codec(index = 9)]
    Transactional(u8),
    /// Resources exhausted.
    #[codec(index = 10)]
    Exhausted,
    /// State corruption.
    #[codec(index = 11)]
    Corruption,
    /// Resource unavailable.
    #[codec(index = 12)]
    Unavailable,
    /// Root origin not allowed.
    #[codec(index = 13)]
    RootNotAllowed,
}

impl DispatchError {
    /// Human-readable description, naming module errors through `metadata`.
    #[must_use]
    pub fn describe(&self, metadata: &Metadata) -> String {
        match self {
            Self::Module(ModuleError { index, error }) => metadata
                .error_name(*index, error[0])
                .map_or_else(
                    || format!("module error {index}:{}", error[0]),
                    |(pallet, name)| format!("{pallet}.{name}"),
                ),
            other => format!("{other:?}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::metadata::{IndexedName, PalletMetadata};

    fn record(pallet: &str, variant: &str, fields: Vec<u8>) -> EventRecord {
        EventRecord {
            phase: Phase::ApplyExtrinsic(1),
            pallet_index: 0,
            variant_index: 0,
            pallet: pallet.to_owned(),
            variant: variant.to_owned(),
            fields,
            topics: vec![],
        }
    }

    #[test]
    fn expect_event_matches_name() {
        let matcher = ExpectEvent::new("FileBank", "CreateBucket");
        assert!(matcher.matches(&record("FileBank", "CreateBucket", vec![])));
        assert!(!matcher.matches(&record("FileBank", "DeleteBucket", vec![])));
        assert!(!matcher.matches(&record("Oss", "CreateBucket", vec![])));
        assert_eq!(matcher.describe(), "FileBank.CreateBucket");
    }

    #[test]
    fn expect_event_checks_fields() {
        let matcher = ExpectEvent::new("Sminer", "Registered").with_fields(|f| f.first() == Some(&9));
        assert!(matcher.matches(&record("Sminer", "Registered", vec![9, 1])));
        assert!(!matcher.matches(&record("Sminer", "Registered", vec![8])));
    }

    #[test]
    fn closures_are_matchers() {
        let matcher = |e: &EventRecord| e.variant.starts_with("Create");
        assert!(matcher.matches(&record("FileBank", "CreateBucket", vec![])));
    }

    #[test]
    fn extrinsic_failed_carries_module_error() {
        let mut fields = DispatchError::Module(ModuleError { index: 11, error: [2, 0, 0, 0] }).encode();
        // trailing dispatch info is ignored
        fields.extend([0u8; 10]);
        let event = record("System", "ExtrinsicFailed", fields);
        let err = event.dispatch_error().unwrap();

        let metadata = Metadata::new(vec![PalletMetadata {
            name: "FileBank".to_owned(),
            index: 11,
            calls: vec![],
            storage: vec![],
            events: vec![],
            errors: vec![IndexedName::new("SameBucketName", 2)],
        }]);
        assert_eq!(err.describe(&metadata), "FileBank.SameBucketName");
        assert_eq!(DispatchError::BadOrigin.describe(&metadata), "BadOrigin");
        assert!(record("System", "ExtrinsicSuccess", vec![]).dispatch_error().is_none());
    }

    #[test]
    fn dispatch_error_indices() {
        assert_eq!(DispatchError::Other.encode(), vec![0]);
        assert_eq!(DispatchError::Token(1).encode(), vec![7, 1]);
        assert_eq!(DispatchError::RootNotAllowed.encode(), vec![13]);
        assert_eq!(Phase::ApplyExtrinsic(2).encode(), vec![0, 2, 0, 0, 0]);
    }
}
