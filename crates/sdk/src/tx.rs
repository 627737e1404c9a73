//! Transaction submission and confirmation.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──► NonceFetched ──► Signed ──► Broadcast ──► Watching ─┬─► Included ──► Success | Failure
//!                                                              ├─► TimedOut
//!                                                              └─► SubscriptionError
//! ```
//!
//! Every submission from one client holds a single write lock from the nonce
//! read until the outcome is known, so nonces are consumed strictly in order.
//! The deadline starts when the call is made, before queuing for the lock,
//! so a caller behind other writers still returns on time. It bounds every
//! stage, and each stage also races the client shutdown token and the
//! optional per-request token.
//!
//! A transaction is never reported as successful unless the caller's
//! [`EventMatcher`] accepted one of the events its extrinsic emitted. If the
//! events cannot be read or decoded, the outcome is a failure.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use cess_types::{Balance, BlockHash, BlockNumber, Nonce, TxHash};
use futures::StreamExt;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ClientConfig,
    connection::{ConnectionHandle, ConnectionManager},
    error::{Result, SdkError, SubmissionSnafu, SubscriptionSnafu},
    events::{DispatchError, EventMatcher, EventRecord, Phase},
    extrinsic::{CallRequest, Era, SigningPayload, UncheckedExtrinsic, tx_hash},
    rpc::TxStatus,
    signer::Signer,
    storage::StorageAddress,
};

/// Per-call overrides for a submission.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct TxOptions {
    /// Priority tip paid to the block author.
    #[builder(default)]
    pub tip: Balance,
    /// Mortality period in blocks; overrides the client default. Zero is immortal.
    pub mortality: Option<u64>,
    /// Deadline for the whole submission; overrides the client default.
    pub timeout: Option<Duration>,
    /// Token that abandons the submission when cancelled.
    pub cancellation: Option<CancellationToken>,
}

/// Terminal result of a submission that reached the pool.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    /// Hash of the submitted extrinsic.
    pub tx_hash: TxHash,
    /// Nonce the extrinsic was signed with.
    pub nonce: Nonce,
    /// Block the extrinsic was included in, if inclusion was observed.
    pub block: Option<BlockHash>,
    /// What happened.
    pub kind: OutcomeKind,
}

/// Exactly one of success, failure or timeout.
#[derive(Debug, Clone)]
pub enum OutcomeKind {
    /// Included, and the matcher accepted this event.
    Success(EventRecord),
    /// Included without an accepted event.
    Failure(FailureReason),
    /// No inclusion before the deadline. The transaction may still land.
    TimedOut {
        /// How long the engine waited.
        waited: Duration,
    },
}

impl OutcomeKind {
    /// Metrics label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// Why an included transaction is not a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The runtime emitted `System.ExtrinsicFailed`.
    Dispatch {
        /// Decoded dispatch error.
        error: DispatchError,
        /// Error named through metadata.
        description: String,
    },
    /// The extrinsic succeeded at the runtime level but emitted no matching event.
    NoMatchingEvent {
        /// What the matcher was looking for.
        expected: String,
        /// Events the extrinsic did emit.
        seen: Vec<String>,
    },
    /// The reported block does not contain the extrinsic.
    ExtrinsicNotFound,
    /// The block's events could not be fetched or decoded.
    EventsUnavailable {
        /// Underlying failure.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch { description, .. } => write!(f, "dispatch failed: {description}"),
            Self::NoMatchingEvent { expected, seen } => {
                write!(f, "expected {expected}, saw [{}]", seen.join(", "))
            },
            Self::ExtrinsicNotFound => write!(f, "extrinsic not found in reported block"),
            Self::EventsUnavailable { message } => write!(f, "events unavailable: {message}"),
        }
    }
}

/// A confirmed successful transaction.
#[derive(Debug, Clone)]
pub struct IncludedTx {
    /// Hash of the extrinsic.
    pub tx_hash: TxHash,
    /// Nonce it was signed with.
    pub nonce: Nonce,
    /// Including block.
    pub block: BlockHash,
    /// The matched success event.
    pub event: EventRecord,
}

impl TxOutcome {
    /// Whether the matcher accepted an event.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success(_))
    }

    /// The matched event, on success.
    #[must_use]
    pub fn event(&self) -> Option<&EventRecord> {
        match &self.kind {
            OutcomeKind::Success(event) => Some(event),
            _ => None,
        }
    }

    /// Converts failure and timeout into errors.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::ChainLogic`] for failures and [`SdkError::Timeout`]
    /// for timeouts.
    pub fn into_result(self) -> Result<IncludedTx> {
        match (self.kind, self.block) {
            (OutcomeKind::Success(event), Some(block)) => {
                Ok(IncludedTx { tx_hash: self.tx_hash, nonce: self.nonce, block, event })
            },
            (OutcomeKind::Success(_), None) => {
                Err(SdkError::Internal { message: "success without an including block".to_owned() })
            },
            (OutcomeKind::Failure(reason), _) => {
                Err(SdkError::ChainLogic { tx_hash: self.tx_hash, reason: reason.to_string() })
            },
            (OutcomeKind::TimedOut { waited }, _) => {
                Err(SdkError::timeout(waited))
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TxStage {
    NonceFetched,
    Signed,
    Broadcast,
    Watching,
    Included,
}

impl TxStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::NonceFetched => "nonce_fetched",
            Self::Signed => "signed",
            Self::Broadcast => "broadcast",
            Self::Watching => "watching",
            Self::Included => "included",
        }
    }
}

/// Signed extrinsic ready for broadcast, plus the connection it was built on.
struct Prepared {
    handle: Arc<ConnectionHandle>,
    nonce: Nonce,
    tx_hash: TxHash,
    extrinsic: Vec<u8>,
}

/// Builds, signs, submits and classifies transactions for one signer.
#[derive(Debug)]
pub struct TransactionEngine {
    connection: Arc<ConnectionManager>,
    config: ClientConfig,
    signer: Arc<dyn Signer>,
    write_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl TransactionEngine {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        config: ClientConfig,
        signer: Arc<dyn Signer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { connection, config, signer, write_lock: Mutex::new(()), shutdown }
    }

    /// The signer every submission uses.
    #[must_use]
    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Submits `call` with default options.
    ///
    /// # Errors
    ///
    /// See [`submit_with`](Self::submit_with).
    pub async fn submit(&self, call: CallRequest, matcher: &dyn EventMatcher) -> Result<TxOutcome> {
        self.submit_with(call, matcher, &TxOptions::default()).await
    }

    /// Submits `call` and waits for its outcome.
    ///
    /// Returns `Ok` once the transaction reached the pool: the outcome says
    /// whether it succeeded, failed on chain or timed out.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Connection`], [`SdkError::Encoding`], [`SdkError::Signing`]
    ///   or [`SdkError::Timeout`] before broadcast
    /// - [`SdkError::Submission`] if the node rejects the transaction
    /// - [`SdkError::Subscription`] if the status stream fails before inclusion
    /// - [`SdkError::Cancelled`] or [`SdkError::Shutdown`] on cancellation
    pub async fn submit_with(
        &self,
        call: CallRequest,
        matcher: &dyn EventMatcher,
        options: &TxOptions,
    ) -> Result<TxOutcome> {
        let started = std::time::Instant::now();
        let result = self.run(&call, matcher, options).await;
        let label = match &result {
            Ok(outcome) => outcome.kind.label(),
            Err(err) => err.error_type(),
        };
        self.config.metrics.record_tx_outcome(call.descriptor(), label, started.elapsed());
        result
    }

    /// Submits `call` and requires a matched success event.
    ///
    /// # Errors
    ///
    /// Everything [`submit_with`](Self::submit_with) returns, plus
    /// [`SdkError::ChainLogic`] for on-chain failures and
    /// [`SdkError::Timeout`] when inclusion was not observed in time.
    pub async fn submit_and_confirm(
        &self,
        call: CallRequest,
        matcher: &dyn EventMatcher,
        options: &TxOptions,
    ) -> Result<IncludedTx> {
        self.submit_with(call, matcher, options).await?.into_result()
    }

    async fn run(&self, call: &CallRequest, matcher: &dyn EventMatcher, options: &TxOptions) -> Result<TxOutcome> {
        let request_token = options.cancellation.as_ref();
        let timeout = options.timeout.unwrap_or(self.config.tx_timeout);
        let deadline = Instant::now() + timeout;

        // Nothing is signed yet, so a deadline here has no transaction to report.
        let _guard = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(SdkError::Shutdown),
            () = cancelled(request_token) => return Err(SdkError::Cancelled),
            () = tokio::time::sleep_until(deadline) => {
                tracing::warn!(call = call.descriptor(), "deadline elapsed waiting for the write lock");
                return Err(SdkError::timeout(timeout));
            }
            guard = self.write_lock.lock() => guard,
        };

        let prepared = self
            .bounded(request_token, deadline, timeout, self.prepare(call, options))
            .await
            .map_err(|err| self.observe_current(err))?;
        let Prepared { handle, nonce, tx_hash, extrinsic } = prepared;
        let descriptor = call.descriptor();

        let submit = async {
            handle.node.submit_and_watch(&extrinsic).await.map_err(|err| match err {
                SdkError::Rpc { code, message, .. } => {
                    SubmissionSnafu { message: format!("{message} (code {code})") }.build()
                },
                other => self.connection.observe(&handle, other),
            })
        };
        let mut stream = self
            .bounded(request_token, deadline, timeout, submit)
            .await
            .map_err(|err| self.connection.observe(&handle, err))?;
        log_stage(TxStage::Broadcast, descriptor, &tx_hash, nonce);

        log_stage(TxStage::Watching, descriptor, &tx_hash, nonce);
        let wait_for_finalization = self.config.wait_for_finalization;
        let block = loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(SdkError::Shutdown),
                () = cancelled(request_token) => return Err(SdkError::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(call = descriptor, tx_hash = %tx_hash, nonce, "no inclusion before deadline");
                    return Ok(TxOutcome { tx_hash, nonce, block: None, kind: OutcomeKind::TimedOut { waited: timeout } });
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(status)) if status.is_rejection() => {
                    return SubmissionSnafu { message: format!("transaction {tx_hash} {status:?}") }.fail();
                },
                Some(Ok(TxStatus::Finalized(hash) | TxStatus::FinalityTimeout(hash))) => break hash,
                Some(Ok(TxStatus::InBlock(hash))) if !wait_for_finalization => break hash,
                Some(Ok(status)) => {
                    tracing::debug!(tx_hash = %tx_hash, status = ?status, "transaction status");
                },
                Some(Err(err)) => {
                    let err = self.connection.observe(&handle, err);
                    return SubscriptionSnafu { message: err.to_string() }.fail();
                },
                None => {
                    return SubscriptionSnafu { message: "status stream closed before inclusion" }.fail();
                },
            }
        };
        drop(stream);
        log_stage(TxStage::Included, descriptor, &tx_hash, nonce);

        let kind = match tokio::time::timeout_at(deadline, self.classify(&handle, block, tx_hash, matcher)).await {
            Ok(Ok(kind)) => kind,
            Ok(Err(err)) => OutcomeKind::Failure(FailureReason::EventsUnavailable { message: err.to_string() }),
            Err(_) => OutcomeKind::Failure(FailureReason::EventsUnavailable {
                message: "deadline elapsed while reading events".to_owned(),
            }),
        };

        match &kind {
            OutcomeKind::Success(event) => {
                tracing::info!(call = descriptor, tx_hash = %tx_hash, nonce, block = %block, event = %event, "transaction succeeded");
            },
            OutcomeKind::Failure(reason) => {
                tracing::warn!(call = descriptor, tx_hash = %tx_hash, nonce, block = %block, reason = %reason, "transaction failed");
            },
            OutcomeKind::TimedOut { .. } => {},
        }

        Ok(TxOutcome { tx_hash, nonce, block: Some(block), kind })
    }

    /// Reads the nonce, encodes the call and signs it.
    async fn prepare(&self, call: &CallRequest, options: &TxOptions) -> Result<Prepared> {
        let handle = self.connection.ensure_healthy().await?;
        let node = handle.node.as_ref();
        let cache = &handle.cache;
        let observe = |err| self.connection.observe(&handle, err);

        let account = self.signer.account_id();
        let nonce = node.account_next_index(&account).await.map_err(observe)?;
        tracing::debug!(stage = TxStage::NonceFetched.as_str(), call = call.descriptor(), nonce, "transaction stage");

        let encoded_call = call.encode_call(&cache.metadata)?;

        let period = options.mortality.unwrap_or(self.config.mortality_period);
        let (era, checkpoint) = if period == 0 {
            (Era::Immortal, cache.genesis_hash)
        } else {
            let finalized = node.finalized_head().await.map_err(observe)?;
            let header = node.header(Some(finalized)).await.map_err(observe)?.ok_or_else(|| {
                SdkError::Internal { message: format!("finalized block {finalized} has no header") }
            })?;
            let era = Era::mortal(period, u64::from(header.number));
            let birth = BlockNumber::try_from(era.birth(u64::from(header.number))).map_err(|_| {
                SdkError::Internal { message: "era birth beyond block number range".to_owned() }
            })?;
            let checkpoint = if birth == header.number {
                finalized
            } else {
                node.block_hash(Some(birth)).await.map_err(observe)?.ok_or_else(|| SdkError::Internal {
                    message: format!("no hash for era birth block {birth}"),
                })?
            };
            (era, checkpoint)
        };

        let payload = SigningPayload {
            call: &encoded_call,
            era,
            nonce,
            tip: options.tip,
            spec_version: cache.runtime_version.spec_version,
            transaction_version: cache.runtime_version.transaction_version,
            genesis_hash: cache.genesis_hash,
            checkpoint,
        };
        let signature = self.signer.sign(&payload.to_signable())?;
        let extrinsic = UncheckedExtrinsic {
            signer: account,
            signature,
            era,
            nonce,
            tip: options.tip,
            call: encoded_call,
        }
        .encode();
        let tx_hash = tx_hash(&extrinsic);
        log_stage(TxStage::Signed, call.descriptor(), &tx_hash, nonce);

        Ok(Prepared { handle, nonce, tx_hash, extrinsic })
    }

    /// Finds the extrinsic in its block and judges its events.
    async fn classify(
        &self,
        handle: &ConnectionHandle,
        block_hash: BlockHash,
        tx: TxHash,
        matcher: &dyn EventMatcher,
    ) -> Result<OutcomeKind> {
        let node = handle.node.as_ref();
        let Some(block) = node.block(Some(block_hash)).await? else {
            return Ok(OutcomeKind::Failure(FailureReason::EventsUnavailable {
                message: format!("block {block_hash} not found"),
            }));
        };
        let Some(index) = block.extrinsics.iter().position(|xt| tx_hash(&xt.0) == tx) else {
            return Ok(OutcomeKind::Failure(FailureReason::ExtrinsicNotFound));
        };
        let index = u32::try_from(index)
            .map_err(|_| SdkError::Internal { message: "extrinsic index overflow".to_owned() })?;

        let events_key = StorageAddress::new("System", "Events").derive();
        let Some(raw) = node.storage(&events_key, Some(block_hash)).await? else {
            return Ok(OutcomeKind::Failure(FailureReason::EventsUnavailable {
                message: format!("no events stored at {block_hash}"),
            }));
        };

        let metadata = &handle.cache.metadata;
        let events: Vec<EventRecord> = self
            .connection
            .codec()
            .decode_events(metadata, &raw)?
            .into_iter()
            .filter(|event| event.phase == Phase::ApplyExtrinsic(index))
            .collect();

        if let Some(event) = events.iter().find(|event| matcher.matches(event)) {
            return Ok(OutcomeKind::Success(event.clone()));
        }
        if let Some(error) = events.iter().find_map(EventRecord::dispatch_error) {
            let description = error.describe(metadata);
            return Ok(OutcomeKind::Failure(FailureReason::Dispatch { error, description }));
        }
        Ok(OutcomeKind::Failure(FailureReason::NoMatchingEvent {
            expected: matcher.describe(),
            seen: events.iter().map(ToString::to_string).collect(),
        }))
    }

    /// Races `fut` against shutdown, the request token and the deadline.
    async fn bounded<T>(
        &self,
        request_token: Option<&CancellationToken>,
        deadline: Instant,
        timeout: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(SdkError::Shutdown),
            () = cancelled(request_token) => Err(SdkError::Cancelled),
            result = tokio::time::timeout_at(deadline, fut) => {
                result.unwrap_or(Err(SdkError::timeout(timeout)))
            }
        }
    }

    /// Reports a fault against whichever handle is active.
    fn observe_current(&self, err: SdkError) -> SdkError {
        match self.connection.current() {
            Some(handle) => self.connection.observe(&handle, err),
            None => err,
        }
    }
}

/// Resolves when `token` is cancelled; never resolves without one.
async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn log_stage(stage: TxStage, call: &str, tx_hash: &TxHash, nonce: Nonce) {
    tracing::debug!(stage = stage.as_str(), call, tx_hash = %tx_hash, nonce, "transaction stage");
}
