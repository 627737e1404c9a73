//! SDK error types with recovery context.
//!
//! Provides a two-tier error model:
//! - **Transport errors**: connection failures, node RPC failures, timeouts
//! - **Chain errors**: rejected submissions, failed dispatch, undecodable state
//!
//! A storage key that is simply absent is not an error; queries report it as
//! [`QueryResult::NotFound`](crate::QueryResult::NotFound).

use std::time::Duration;

use cess_types::{CodecError, TxHash, ValidationError};
use snafu::{Location, Snafu};

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SdkError {
    /// No endpoint could be reached.
    #[snafu(display("Connection error at {location}: {message}"))]
    Connection {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The transport to the node failed mid-request.
    #[snafu(display("Transport error calling {method} at {location}: {message}"))]
    Transport {
        /// RPC method being called.
        method: String,
        /// Underlying failure.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The node answered with a JSON-RPC error object.
    #[snafu(display("RPC error from {method} (code={code}): {message}"))]
    Rpc {
        /// RPC method being called.
        method: String,
        /// JSON-RPC error code.
        code: i32,
        /// Error message from the node.
        message: String,
    },

    /// Address, call or value encoding and decoding failed.
    #[snafu(display("Encoding error: {message}"))]
    Encoding {
        /// Error description.
        message: String,
    },

    /// The node refused to accept the transaction into its pool.
    #[snafu(display("Submission rejected: {message}"))]
    Submission {
        /// Rejection reason.
        message: String,
    },

    /// The transaction was included but no matching success event was emitted.
    #[snafu(display("Transaction {tx_hash} failed on chain: {reason}"))]
    ChainLogic {
        /// Hash of the failed transaction.
        tx_hash: TxHash,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The status subscription failed before inclusion was observed.
    #[snafu(display("Subscription error: {message}"))]
    Subscription {
        /// Error description.
        message: String,
    },

    /// Operation timed out.
    #[snafu(display("Operation timed out after {duration_ms}ms"))]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Retry attempts exhausted.
    #[snafu(display("Retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
        /// Error message of every attempt, in order.
        attempt_history: Vec<(u32, String)>,
    },

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// URL parsing error.
    #[snafu(display("Invalid URL '{url}': {message}"))]
    InvalidUrl {
        /// The invalid URL.
        url: String,
        /// Parse error description.
        message: String,
    },

    /// A caller-supplied argument was rejected before reaching the chain.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// The signer could not produce a signature.
    #[snafu(display("Signing error: {message}"))]
    Signing {
        /// Error description.
        message: String,
    },

    /// Erasure coding or reconstruction failed.
    #[snafu(display("Erasure coding error: {message}"))]
    Erasure {
        /// Error description.
        message: String,
    },

    /// A fragment could not be written to or read from a peer.
    #[snafu(display("Fragment transfer with {peer} failed: {message}"))]
    Fragment {
        /// Peer address.
        peer: String,
        /// Error description.
        message: String,
    },

    /// The operation was cancelled by its cancellation token.
    #[snafu(display("Operation cancelled"))]
    Cancelled,

    /// Client is shutting down.
    #[snafu(display("Client shutting down"))]
    Shutdown,

    /// An unexpected fault was caught at the client boundary.
    #[snafu(display("Internal error: {message}"))]
    Internal {
        /// Description of the fault.
        message: String,
    },
}

impl SdkError {
    /// A [`Timeout`](Self::Timeout) after `after`, saturating at `u64::MAX` milliseconds.
    pub(crate) fn timeout(after: Duration) -> Self {
        Self::Timeout { duration_ms: duration_ms(after) }
    }

    /// Returns true if the error is transient and the operation should be retried.
    ///
    /// Retryable errors:
    /// - `Transport`: the socket dropped or the request could not be sent
    /// - `Timeout`: the node did not answer in time
    /// - `Fragment`: a peer failed a single transfer
    ///
    /// Non-retryable errors:
    /// - `Connection`: every endpoint was already tried
    /// - `Rpc`: the node understood and refused the request
    /// - `Encoding`, `Submission`, `ChainLogic`: retrying produces the same result
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Timeout { .. } => true,
            Self::Fragment { .. } => true,
            // Non-retryable
            Self::Connection { .. } => false,
            Self::Rpc { .. } => false,
            Self::Encoding { .. } => false,
            Self::Submission { .. } => false,
            Self::ChainLogic { .. } => false,
            Self::Subscription { .. } => false,
            Self::RetryExhausted { .. } => false,
            Self::Config { .. } => false,
            Self::InvalidUrl { .. } => false,
            Self::InvalidArgument { .. } => false,
            Self::Signing { .. } => false,
            Self::Erasure { .. } => false,
            Self::Cancelled => false,
            Self::Shutdown => false,
            Self::Internal { .. } => false,
        }
    }

    /// Returns true if the error means the current connection is unusable.
    ///
    /// The engines clear the health flag when they observe one of these, so
    /// the next call reconnects. A node call that outlives its timeout counts:
    /// a node that accepts sockets but never answers is as unusable as one
    /// that drops them.
    #[must_use]
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Returns a short classification label for metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Transport { .. } => "transport",
            Self::Rpc { .. } => "rpc",
            Self::Encoding { .. } => "encoding",
            Self::Submission { .. } => "submission",
            Self::ChainLogic { .. } => "chain_logic",
            Self::Subscription { .. } => "subscription",
            Self::Timeout { .. } => "timeout",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Config { .. } => "config",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Signing { .. } => "signing",
            Self::Erasure { .. } => "erasure",
            Self::Fragment { .. } => "fragment",
            Self::Cancelled => "cancelled",
            Self::Shutdown => "shutdown",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<CodecError> for SdkError {
    fn from(source: CodecError) -> Self {
        Self::Encoding { message: source.to_string() }
    }
}

impl From<ValidationError> for SdkError {
    fn from(source: ValidationError) -> Self {
        Self::InvalidArgument { message: source.to_string() }
    }
}
