//! Collaborator seams and the client that drives them.
//!
//! The [`Ledger`] owns stream state and serializes commands; the
//! [`EventFeed`] replays what happened. Both are awaited exactly once per
//! call. [`StreamClient`] validates every command locally with the pure
//! lifecycle rules before submitting it, so a refused command never reaches
//! the ledger, and a ledger failure is surfaced as-is without retrying.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::error::StreamError;
use crate::history::{self, EventKind, RawEventRecord, Reconciled};
use crate::codec;
use crate::lifecycle::{Acceptance, Cancellation, Claim, Role};
use crate::portfolio::Portfolio;
use crate::{Address, Stream, StreamKey, StreamRecord};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a collaborator. Opaque to the engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("ledger rejected the transaction: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("stream {0} not found on the ledger")]
    NotFound(StreamKey),

    #[error("malformed ledger view: {0}")]
    MalformedView(String),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("stream {0} is not listed for its sender")]
    UnknownStream(StreamKey),
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Receipt of an accepted ledger submission.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: String,
}

/// Source of truth for current stream state.
///
/// Submissions are signed by whoever drives the ledger connection; the
/// engine only names the stream. `submit_cancel` also names the other party,
/// which the ledger needs to locate the stream from either side.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn list_streams_by_sender(&self, sender: &Address) -> Result<Vec<Stream>, LedgerError>;

    async fn list_streams_by_recipient(
        &self,
        recipient: &Address,
    ) -> Result<Vec<Stream>, LedgerError>;

    async fn submit_accept(&self, key: &StreamKey) -> Result<TxReceipt, LedgerError>;

    async fn submit_claim(&self, key: &StreamKey) -> Result<TxReceipt, LedgerError>;

    async fn submit_cancel(
        &self,
        key: &StreamKey,
        counterparty: &Address,
    ) -> Result<TxReceipt, LedgerError>;
}

/// Append-only, at-least-once log of lifecycle events, one store per kind.
#[async_trait]
pub trait EventFeed: Send + Sync {
    async fn fetch_events(&self, kind: EventKind) -> Result<Vec<RawEventRecord>, LedgerError>;
}

// ---------------------------------------------------------------------------
// Ledger views
// ---------------------------------------------------------------------------

/// Decode the ledger's per-participant stream view into [`Stream`]s.
///
/// The senders and receivers views return five parallel columns rather
/// than one object per stream:
///
/// ```json
/// [["0xb0b", "0xc4"], ["0", "1700000000"], ["60", "600"],
///  ["6000000000", "100"], ["0", "1"]]
/// ```
///
/// holding counterparty addresses, start timestamps, durations, amounts
/// and stream ids. `participant` fills the other side: it is the sender
/// when `side` is [`Role::Sender`] and the recipient otherwise. The view
/// carries no claim progress or cancellation flag, so every decoded
/// stream has `already_claimed == 0` and is not cancelled.
pub fn decode_stream_columns(
    participant: &Address,
    side: Role,
    view: &Value,
) -> Result<Vec<Stream>, LedgerError> {
    let columns = view
        .as_array()
        .filter(|columns| columns.len() == 5)
        .ok_or_else(|| LedgerError::MalformedView("expected five parallel columns".into()))?;
    let column = |index: usize, name: &str| {
        columns[index]
            .as_array()
            .ok_or_else(|| LedgerError::MalformedView(format!("`{name}` is not an array")))
    };

    let parties = column(0, "addresses")?;
    let starts = column(1, "start_timestamps")?;
    let durations = column(2, "durations")?;
    let amounts = column(3, "amounts")?;
    let ids = column(4, "stream_ids")?;
    if [starts, durations, amounts, ids]
        .iter()
        .any(|values| values.len() != parties.len())
    {
        return Err(LedgerError::MalformedView("column lengths differ".into()));
    }

    let number = |values: &[Value], index: usize, name: &str| {
        codec::u64_from_value(&values[index])
            .ok_or_else(|| LedgerError::MalformedView(format!("`{name}[{index}]` is not a u64")))
    };

    parties
        .iter()
        .enumerate()
        .map(|(index, party)| {
            let party = party.as_str().map(Address::new).ok_or_else(|| {
                LedgerError::MalformedView(format!("`addresses[{index}]` is not a string"))
            })?;
            let (sender, recipient) = match side {
                Role::Sender => (participant.clone(), party),
                Role::Recipient => (party, participant.clone()),
            };
            let record = StreamRecord {
                stream_id: number(ids, index, "stream_ids")?,
                sender,
                recipient,
                total_amount: number(amounts, index, "amounts")?,
                start_timestamp: number(starts, index, "start_timestamps")?,
                duration_seconds: number(durations, index, "durations")?,
                already_claimed: 0,
                cancelled: false,
            };
            Stream::try_from(record)
                .map_err(|err| LedgerError::MalformedView(format!("stream at {index}: {err}")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A locally validated transition together with the ledger's receipt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Submitted<T> {
    pub outcome: T,
    pub receipt: TxReceipt,
}

pub struct StreamClient<L, F> {
    ledger: L,
    feed: F,
}

impl<L, F> StreamClient<L, F>
where
    L: Ledger,
    F: EventFeed,
{
    pub fn new(ledger: L, feed: F) -> Self {
        StreamClient { ledger, feed }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Load both sides of `participant` and build their portfolio at `now`.
    #[instrument(skip(self, participant), fields(participant = %participant))]
    pub async fn portfolio(&self, participant: &Address, now: u64) -> Result<Portfolio, ClientError> {
        let sending = self.ledger.list_streams_by_sender(participant).await?;
        let receiving = self.ledger.list_streams_by_recipient(participant).await?;
        Ok(Portfolio::build(participant, &sending, &receiving, now))
    }

    /// Current ledger view of the stream behind `key`.
    pub async fn stream(&self, key: &StreamKey) -> Result<Stream, ClientError> {
        self.ledger
            .list_streams_by_sender(&key.sender)
            .await?
            .into_iter()
            .find(|stream| stream.stream_id == key.stream_id)
            .ok_or_else(|| ClientError::UnknownStream(key.clone()))
    }

    /// Accept `key` as `caller`.
    ///
    /// # Errors
    /// - `ClientError::Stream` when the local check refuses; nothing is
    ///   submitted
    /// - `ClientError::Ledger` when the submission fails
    #[instrument(skip(self, caller, key), fields(stream = %key, caller = %caller))]
    pub async fn accept(
        &self,
        caller: &Address,
        key: &StreamKey,
        now: u64,
    ) -> Result<Submitted<Acceptance>, ClientError> {
        let stream = self.stream(key).await?;
        let outcome = stream.accept(caller, now)?;
        let receipt = self
            .ledger
            .submit_accept(key)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "accept submission failed"))?;

        tracing::info!(tx = %receipt.hash, started_at = outcome.started_at, "stream accepted");
        Ok(Submitted { outcome, receipt })
    }

    /// Claim everything currently claimable on `key` as `caller`.
    #[instrument(skip(self, caller, key), fields(stream = %key, caller = %caller))]
    pub async fn claim(
        &self,
        caller: &Address,
        key: &StreamKey,
        now: u64,
    ) -> Result<Submitted<Claim>, ClientError> {
        let stream = self.stream(key).await?;
        let outcome = stream.claim(caller, now)?;
        let receipt = self
            .ledger
            .submit_claim(key)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "claim submission failed"))?;

        tracing::info!(tx = %receipt.hash, amount = outcome.amount, "stream claimed");
        Ok(Submitted { outcome, receipt })
    }

    /// Cancel `key` as `caller`, who may be either party.
    #[instrument(skip(self, caller, key), fields(stream = %key, caller = %caller))]
    pub async fn cancel(
        &self,
        caller: &Address,
        key: &StreamKey,
        now: u64,
    ) -> Result<Submitted<Cancellation>, ClientError> {
        let stream = self.stream(key).await?;
        let outcome = stream.cancel(caller, now)?;
        let counterparty = stream.counterparty(outcome.cancelled_by);
        let receipt = self
            .ledger
            .submit_cancel(key, counterparty)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "cancel submission failed"))?;

        tracing::info!(
            tx = %receipt.hash,
            to_sender = outcome.to_sender,
            to_recipient = outcome.to_recipient,
            "stream cancelled"
        );
        Ok(Submitted { outcome, receipt })
    }

    /// Fetch the four event stores and rebuild the history of `key`.
    #[instrument(skip(self, key), fields(stream = %key))]
    pub async fn history(&self, key: &StreamKey) -> Result<Reconciled, ClientError> {
        let records = self.fetch_all().await?;
        Ok(history::reconcile_history(key, &records))
    }

    /// Histories of several streams from a single fetch of the feed.
    pub async fn histories(
        &self,
        keys: &[StreamKey],
    ) -> Result<BTreeMap<StreamKey, Reconciled>, ClientError> {
        let records = self.fetch_all().await?;
        Ok(history::reconcile_feed(keys, &records))
    }

    async fn fetch_all(&self) -> Result<Vec<RawEventRecord>, ClientError> {
        let mut records = Vec::new();
        for kind in EventKind::ALL {
            let batch = self
                .feed
                .fetch_events(kind)
                .await
                .inspect_err(|err| {
                    tracing::warn!(store = kind.store_name(), error = %err, "event fetch failed")
                })?;
            records.extend(batch);
        }
        Ok(records)
    }
}
