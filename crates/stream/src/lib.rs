pub mod accrual;
mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod ledger;
pub mod lifecycle;
pub mod portfolio;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod units;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::{ConfigError, EngineConfig};
pub use error::StreamError;
pub use history::{
    reconcile_feed, reconcile_history, DropReport, EventKind, HistoryEntry, HistoryEvent,
    RawEventRecord, Reconciled,
};
pub use ledger::{
    decode_stream_columns, ClientError, EventFeed, Ledger, LedgerError, StreamClient, Submitted,
    TxReceipt,
};
pub use lifecycle::{
    claimable, classify, Acceptance, Cancellation, Claim, LifecycleState, Role,
};
pub use portfolio::{aggregate_rate, Buckets, FlowRate, Portfolio};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Opaque participant identifier (an account address).
///
/// Addresses are compared case-insensitively: the value is lower-cased on
/// construction and on deserialization.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Address(address.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd` form for compact listings.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Address::new(value)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique handle for a stream.
///
/// The ledger numbers streams per sender, so a bare `stream_id` is only
/// unique together with the sender that created it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct StreamKey {
    pub sender: Address,
    pub stream_id: u64,
}

impl StreamKey {
    pub fn new(sender: impl Into<Address>, stream_id: u64) -> Self {
        StreamKey {
            sender: sender.into(),
            stream_id,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sender, self.stream_id)
    }
}

/// Parameters a sender supplies when opening a stream.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub recipient: Address,
    pub total_amount: u64,
    pub duration_seconds: u64,
}

/// A continuously-vesting payment stream as recorded by the ledger.
///
/// Lifecycle state is never stored: it is derived from the fields below and
/// the query instant (see [`Stream::classify`]). `cancelled` is the only
/// status flag.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StreamRecord", into = "StreamRecord")]
pub struct Stream {
    pub stream_id: u64,
    pub sender: Address,
    pub recipient: Address,
    /// Deposit in minor units (8 decimals for APT).
    pub total_amount: u64,
    /// `None` until the recipient accepts.
    pub start_timestamp: Option<u64>,
    pub duration_seconds: u64,
    /// Minor units already released to the recipient by claims.
    pub already_claimed: u64,
    pub cancelled: bool,
}

impl Stream {
    /// Build a freshly created (pending) stream.
    ///
    /// # Errors
    /// `InvalidStreamParameters` if
    /// - `total_amount` is zero
    /// - `duration_seconds` is zero
    /// - `sender` and `recipient` are the same address
    pub fn new(stream_id: u64, sender: Address, params: StreamParams) -> Result<Self, StreamError> {
        validate_stream_params(
            &sender,
            &params.recipient,
            params.total_amount,
            params.duration_seconds,
        )?;

        Ok(Stream {
            stream_id,
            sender,
            recipient: params.recipient,
            total_amount: params.total_amount,
            start_timestamp: None,
            duration_seconds: params.duration_seconds,
            already_claimed: 0,
            cancelled: false,
        })
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            sender: self.sender.clone(),
            stream_id: self.stream_id,
        }
    }
}

fn validate_stream_params(
    sender: &Address,
    recipient: &Address,
    total_amount: u64,
    duration_seconds: u64,
) -> Result<(), StreamError> {
    if total_amount == 0 {
        return Err(StreamError::InvalidStreamParameters(
            "total_amount must be positive",
        ));
    }
    if duration_seconds == 0 {
        return Err(StreamError::InvalidStreamParameters(
            "duration_seconds must be positive",
        ));
    }
    if sender == recipient {
        return Err(StreamError::InvalidStreamParameters(
            "sender and recipient must be different",
        ));
    }
    Ok(())
}

/// One-object-per-stream record form of [`Stream`], as indexers and this
/// crate's own `Serialize` produce it. The ledger's view functions return
/// parallel columns instead; see [`decode_stream_columns`].
///
/// `start_timestamp == 0` encodes "not yet accepted"; numeric fields may
/// arrive as strings. A stream accepted at instant 0 therefore reads back
/// as pending. Ledger clocks never report 0, so the record form keeps the
/// sentinel rather than an explicit flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(deserialize_with = "codec::u64_lenient")]
    pub stream_id: u64,
    pub sender: Address,
    pub recipient: Address,
    #[serde(deserialize_with = "codec::u64_lenient")]
    pub total_amount: u64,
    #[serde(default, deserialize_with = "codec::u64_lenient")]
    pub start_timestamp: u64,
    #[serde(deserialize_with = "codec::u64_lenient")]
    pub duration_seconds: u64,
    #[serde(default, deserialize_with = "codec::u64_lenient")]
    pub already_claimed: u64,
    #[serde(default)]
    pub cancelled: bool,
}

impl TryFrom<StreamRecord> for Stream {
    type Error = StreamError;

    fn try_from(record: StreamRecord) -> Result<Self, Self::Error> {
        validate_stream_params(
            &record.sender,
            &record.recipient,
            record.total_amount,
            record.duration_seconds,
        )?;
        if record.already_claimed > record.total_amount {
            return Err(StreamError::InvalidStreamParameters(
                "already_claimed exceeds total_amount",
            ));
        }

        Ok(Stream {
            stream_id: record.stream_id,
            sender: record.sender,
            recipient: record.recipient,
            total_amount: record.total_amount,
            start_timestamp: (record.start_timestamp != 0).then_some(record.start_timestamp),
            duration_seconds: record.duration_seconds,
            already_claimed: record.already_claimed,
            cancelled: record.cancelled,
        })
    }
}

impl From<Stream> for StreamRecord {
    fn from(stream: Stream) -> Self {
        StreamRecord {
            stream_id: stream.stream_id,
            sender: stream.sender,
            recipient: stream.recipient,
            total_amount: stream.total_amount,
            start_timestamp: stream.start_timestamp.unwrap_or(0),
            duration_seconds: stream.duration_seconds,
            already_claimed: stream.already_claimed,
            cancelled: stream.cancelled,
        }
    }
}
