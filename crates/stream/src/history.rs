//! Rebuild a stream's history from the event feed.
//!
//! The feed is non-authoritative and at-least-once: records arrive unordered,
//! may be repeated, may belong to other streams and may be missing fields.
//! Reconciliation never fails on any of that. It filters, validates,
//! de-duplicates and orders, and reports what it dropped as counts.

use std::borrow::Borrow;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec;
use crate::units::TimestampUnit;
use crate::{Address, StreamKey};

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Lifecycle event kinds. The declaration order is the tie-break priority
/// for events sharing a timestamp.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created = 0,
    Accepted = 1,
    Claimed = 2,
    Cancelled = 3,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Accepted,
        EventKind::Claimed,
        EventKind::Cancelled,
    ];

    /// Name of the ledger event handle holding this kind.
    pub fn store_name(self) -> &'static str {
        match self {
            EventKind::Created => "stream_create_events",
            EventKind::Accepted => "stream_accept_events",
            EventKind::Claimed => "stream_claim_events",
            EventKind::Cancelled => "stream_close_events",
        }
    }

    /// Parse a feed type tag such as `0x1::pay_me_a_river::StreamCreateEvent`
    /// or `stream_created`. Only the last `::` segment is considered.
    pub fn from_type_tag(tag: &str) -> Option<EventKind> {
        let name = tag.rsplit("::").next().unwrap_or(tag).trim();
        match name {
            "StreamCreateEvent" | "stream_created" | "created" => Some(EventKind::Created),
            "StreamAcceptEvent" | "stream_accepted" | "accepted" => Some(EventKind::Accepted),
            "StreamClaimEvent" | "stream_claimed" | "claimed" => Some(EventKind::Claimed),
            "StreamCloseEvent" | "stream_cancelled" | "stream_closed" | "cancelled" => {
                Some(EventKind::Cancelled)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Accepted => "accepted",
            EventKind::Claimed => "claimed",
            EventKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw records
// ---------------------------------------------------------------------------

/// One event as delivered by the feed, before any validation.
///
/// Every field is optional; which ones are required depends on `kind`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    #[serde(default)]
    pub kind: Option<EventKind>,
    #[serde(default, deserialize_with = "codec::opt_u64_lenient")]
    pub stream_id: Option<u64>,
    /// Sender scope of `stream_id`, when the feed reports it.
    #[serde(default)]
    pub sender: Option<Address>,
    /// Instant as reported, in `timestamp_unit`.
    #[serde(default, deserialize_with = "codec::opt_u64_lenient")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub timestamp_unit: TimestampUnit,
    #[serde(default, deserialize_with = "codec::opt_u64_lenient")]
    pub amount: Option<u64>,
    #[serde(default, deserialize_with = "codec::opt_u64_lenient")]
    pub amount_to_sender: Option<u64>,
    #[serde(default, deserialize_with = "codec::opt_u64_lenient")]
    pub amount_to_recipient: Option<u64>,
}

impl RawEventRecord {
    pub fn created(stream_id: u64, timestamp: u64, amount: u64) -> Self {
        RawEventRecord {
            kind: Some(EventKind::Created),
            stream_id: Some(stream_id),
            timestamp: Some(timestamp),
            amount: Some(amount),
            ..Default::default()
        }
    }

    pub fn accepted(stream_id: u64, timestamp: u64) -> Self {
        RawEventRecord {
            kind: Some(EventKind::Accepted),
            stream_id: Some(stream_id),
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn claimed(stream_id: u64, timestamp: u64, amount: u64) -> Self {
        RawEventRecord {
            kind: Some(EventKind::Claimed),
            stream_id: Some(stream_id),
            timestamp: Some(timestamp),
            amount: Some(amount),
            ..Default::default()
        }
    }

    pub fn cancelled(stream_id: u64, timestamp: u64, to_sender: u64, to_recipient: u64) -> Self {
        RawEventRecord {
            kind: Some(EventKind::Cancelled),
            stream_id: Some(stream_id),
            timestamp: Some(timestamp),
            amount_to_sender: Some(to_sender),
            amount_to_recipient: Some(to_recipient),
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<Address>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Decode one element of a ledger event handle listing:
    ///
    /// ```json
    /// {
    ///   "type": "0x..::pay_me_a_river::StreamClaimEvent",
    ///   "data": { "stream_id": "3", "timestamp": "1700000500",
    ///             "amount": "5000000000", "sender_address": "0x.." }
    /// }
    /// ```
    ///
    /// `kind` is the handle the element was fetched from; a type tag naming a
    /// different or unknown kind leaves `kind` unset. The timestamp is kept
    /// as reported, in `unit`. Fields are decoded one by one, so a bad payload
    /// field never loses the record's `stream_id` or `sender`; whatever does
    /// not decode is left unset for reconciliation to count as malformed.
    pub fn from_feed_json(kind: EventKind, value: &Value, unit: TimestampUnit) -> Self {
        let kind = match value.get("type") {
            None | Some(Value::Null) => Some(kind),
            Some(tag) => tag
                .as_str()
                .and_then(EventKind::from_type_tag)
                .filter(|tagged| *tagged == kind),
        };
        let data = value.get("data").filter(|data| data.is_object());
        let field = |name: &'static str| -> Option<u64> {
            let raw = data.and_then(|data| data.get(name)).filter(|raw| !raw.is_null())?;
            let decoded = codec::u64_from_value(raw);
            if decoded.is_none() {
                tracing::debug!(field = name, value = %raw, "undecodable feed event field");
            }
            decoded
        };
        let sender = data
            .and_then(|data| data.get("sender").or_else(|| data.get("sender_address")))
            .and_then(Value::as_str)
            .map(Address::new);

        RawEventRecord {
            kind,
            stream_id: field("stream_id"),
            sender,
            timestamp: field("timestamp"),
            timestamp_unit: unit,
            amount: field("amount"),
            amount_to_sender: field("amount_to_sender"),
            amount_to_recipient: field("amount_to_recipient"),
        }
    }

    /// Reported instant as `(whole seconds, sub-second microseconds)`.
    fn instant(&self) -> Option<(u64, u64)> {
        self.timestamp.map(|ts| {
            (
                self.timestamp_unit.to_seconds(ts),
                self.timestamp_unit.subsec_micros(ts),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// History entries
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Deposit locked by the sender.
    Created { amount: u64 },
    Accepted,
    /// Amount released to the recipient by this claim.
    Claimed { amount: u64 },
    Cancelled { to_sender: u64, to_recipient: u64 },
}

impl HistoryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HistoryEvent::Created { .. } => EventKind::Created,
            HistoryEvent::Accepted => EventKind::Accepted,
            HistoryEvent::Claimed { .. } => EventKind::Claimed,
            HistoryEvent::Cancelled { .. } => EventKind::Cancelled,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stream_id: u64,
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

impl HistoryEntry {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// Why a feed record could not become a [`HistoryEntry`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MalformedEvent {
    #[error("event kind is missing or unknown")]
    UnknownKind,

    #[error("{kind} event is missing `{field}`")]
    MissingField { kind: EventKind, field: &'static str },
}

impl TryFrom<&RawEventRecord> for HistoryEntry {
    type Error = MalformedEvent;

    fn try_from(record: &RawEventRecord) -> Result<Self, Self::Error> {
        let kind = record.kind.ok_or(MalformedEvent::UnknownKind)?;
        let require = |value: Option<u64>, field: &'static str| {
            value.ok_or(MalformedEvent::MissingField { kind, field })
        };

        let stream_id = require(record.stream_id, "stream_id")?;
        let timestamp = require(record.timestamp, "timestamp")?;
        let timestamp = record.timestamp_unit.to_seconds(timestamp);
        let event = match kind {
            EventKind::Created => HistoryEvent::Created {
                amount: require(record.amount, "amount")?,
            },
            EventKind::Accepted => HistoryEvent::Accepted,
            EventKind::Claimed => HistoryEvent::Claimed {
                amount: require(record.amount, "amount")?,
            },
            EventKind::Cancelled => HistoryEvent::Cancelled {
                to_sender: require(record.amount_to_sender, "amount_to_sender")?,
                to_recipient: require(record.amount_to_recipient, "amount_to_recipient")?,
            },
        };

        Ok(HistoryEntry {
            stream_id,
            timestamp,
            event,
        })
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Soft diagnostics: records left out of a reconciled history.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DropReport {
    /// Records about another stream.
    pub foreign: usize,
    /// Records of this stream missing a kind or a required field.
    pub malformed: usize,
    /// Repeated `(kind, stream, timestamp)` deliveries collapsed into one.
    pub duplicates: usize,
}

impl DropReport {
    pub fn total(&self) -> usize {
        self.foreign + self.malformed + self.duplicates
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reconciled {
    pub key: StreamKey,
    /// Ordered by timestamp, ties by [`EventKind`] priority.
    pub entries: Vec<HistoryEntry>,
    pub dropped: DropReport,
}

impl Reconciled {
    pub fn is_cancelled(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind() == EventKind::Cancelled)
    }

    pub fn accepted_at(&self) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.kind() == EventKind::Accepted)
            .map(|entry| entry.timestamp)
    }

    /// Sum of all claimed amounts (cancellation payouts excluded).
    pub fn total_claimed(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|entry| match entry.event {
                HistoryEvent::Claimed { amount } => Some(amount),
                _ => None,
            })
            .fold(0u64, u64::saturating_add)
    }
}

/// Ordered, de-duplicated history of the stream identified by `key`.
///
/// A record belongs to the stream when its `stream_id` matches and, if it
/// names a sender, that sender matches too. Identical
/// `(kind, stream_id, timestamp)` deliveries collapse to one entry, compared
/// at the precision the feed reported, before seconds truncation; when
/// their payloads disagree the smaller payload is kept, so the output does
/// not depend on input order.
pub fn reconcile_history<I, R>(key: &StreamKey, records: I) -> Reconciled
where
    I: IntoIterator<Item = R>,
    R: Borrow<RawEventRecord>,
{
    // Keyed by the reported instant, so events in the same second but at
    // different sub-second instants stay distinct.
    let mut timeline: BTreeMap<((u64, u64), EventKind), HistoryEvent> = BTreeMap::new();
    let mut dropped = DropReport::default();

    for record in records {
        let record = record.borrow();

        let other_stream = record.stream_id.is_some_and(|id| id != key.stream_id);
        let other_sender = record
            .sender
            .as_ref()
            .is_some_and(|sender| *sender != key.sender);
        if other_stream || other_sender {
            dropped.foreign += 1;
            continue;
        }

        let entry = match HistoryEntry::try_from(record) {
            Ok(entry) => entry,
            Err(reason) => {
                tracing::debug!(stream = %key, %reason, "dropping malformed event");
                dropped.malformed += 1;
                continue;
            }
        };

        let instant = record.instant().unwrap_or((entry.timestamp, 0));
        match timeline.entry((instant, entry.kind())) {
            Entry::Vacant(slot) => {
                slot.insert(entry.event);
            }
            Entry::Occupied(mut slot) => {
                dropped.duplicates += 1;
                if entry.event != *slot.get() {
                    tracing::debug!(
                        stream = %key,
                        timestamp = entry.timestamp,
                        kind = %entry.kind(),
                        "duplicate events disagree on payload"
                    );
                    if entry.event < *slot.get() {
                        slot.insert(entry.event);
                    }
                }
            }
        }
    }

    if dropped.malformed > 0 {
        tracing::warn!(
            stream = %key,
            malformed = dropped.malformed,
            "malformed events dropped from history"
        );
    }

    let entries = timeline
        .into_iter()
        .map(|(((timestamp, _), _), event)| HistoryEntry {
            stream_id: key.stream_id,
            timestamp,
            event,
        })
        .collect();

    Reconciled {
        key: key.clone(),
        entries,
        dropped,
    }
}

/// Reconcile many streams from one shared feed.
///
/// Records are bucketed per stream in a single pass, then each bucket is
/// reconciled on its own; buckets share nothing, so callers may also fan
/// them out across threads. Records that match none of `keys`, including
/// those without a `stream_id`, are not attributed to any stream.
pub fn reconcile_feed(
    keys: &[StreamKey],
    records: &[RawEventRecord],
) -> BTreeMap<StreamKey, Reconciled> {
    let mut by_id: HashMap<u64, Vec<usize>> = HashMap::new();
    for (index, key) in keys.iter().enumerate() {
        by_id.entry(key.stream_id).or_default().push(index);
    }

    let mut buckets: Vec<Vec<&RawEventRecord>> = vec![Vec::new(); keys.len()];
    for record in records {
        let Some(candidates) = record.stream_id.and_then(|id| by_id.get(&id)) else {
            continue;
        };
        for &index in candidates {
            let sender_matches = record
                .sender
                .as_ref()
                .map_or(true, |sender| *sender == keys[index].sender);
            if sender_matches {
                buckets[index].push(record);
            }
        }
    }

    keys.iter()
        .zip(buckets)
        .map(|(key, bucket)| (key.clone(), reconcile_history(key, bucket)))
        .collect()
}
