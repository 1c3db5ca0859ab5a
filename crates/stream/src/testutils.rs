//! In-memory [`Ledger`] and [`EventFeed`] for tests.
//!
//! `MemoryLedger` keeps streams and events behind one shared lock and
//! applies submissions with the same lifecycle rules the client checks
//! locally. Its clock only moves through [`MemoryLedger::set_timestamp`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StreamError;
use crate::history::{EventKind, RawEventRecord};
use crate::ledger::{EventFeed, Ledger, LedgerError, TxReceipt};
use crate::{Address, Stream, StreamKey, StreamParams};

/// One submission the ledger has seen, applied or not.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Submission {
    pub kind: EventKind,
    pub key: StreamKey,
    pub applied: bool,
}

#[derive(Default)]
struct LedgerState {
    now: u64,
    streams: BTreeMap<StreamKey, Stream>,
    next_ids: HashMap<Address, u64>,
    events: Vec<RawEventRecord>,
    submissions: Vec<Submission>,
    fail_read: Option<LedgerError>,
    fail_submission: Option<LedgerError>,
    tx_count: u64,
}

impl LedgerState {
    fn check_read(&mut self) -> Result<(), LedgerError> {
        self.fail_read.take().map_or(Ok(()), Err)
    }

    fn check_submission(&mut self) -> Result<(), LedgerError> {
        self.fail_submission.take().map_or(Ok(()), Err)
    }

    fn receipt(&mut self) -> TxReceipt {
        self.tx_count += 1;
        TxReceipt {
            hash: format!("0x{:064x}", self.tx_count),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timestamp(&self, now: u64) {
        self.lock().now = now;
    }

    pub fn timestamp(&self) -> u64 {
        self.lock().now
    }

    /// Open a pending stream from `sender` and record its creation event.
    pub fn create_stream(
        &self,
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        total_amount: u64,
        duration_seconds: u64,
    ) -> Result<Stream, StreamError> {
        let sender = sender.into();
        let params = StreamParams {
            recipient: recipient.into(),
            total_amount,
            duration_seconds,
        };

        let mut state = self.lock();
        let next_id = state.next_ids.get(&sender).copied().unwrap_or(0);
        let stream = Stream::new(next_id, sender.clone(), params)?;
        state.next_ids.insert(sender.clone(), next_id + 1);

        let created = RawEventRecord::created(stream.stream_id, state.now, total_amount)
            .with_sender(sender);
        state.events.push(created);
        state.streams.insert(stream.key(), stream.clone());
        Ok(stream)
    }

    /// Store `stream` as-is, without emitting any event.
    pub fn insert_stream(&self, stream: Stream) {
        self.lock().streams.insert(stream.key(), stream);
    }

    pub fn stream(&self, key: &StreamKey) -> Option<Stream> {
        self.lock().streams.get(key).cloned()
    }

    /// Append a raw record to the feed, e.g. a redelivery or noise.
    pub fn push_event(&self, record: RawEventRecord) {
        self.lock().events.push(record);
    }

    pub fn events(&self) -> Vec<RawEventRecord> {
        self.lock().events.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// Make the next listing or event fetch fail with `err`.
    pub fn fail_next_read(&self, err: LedgerError) {
        self.lock().fail_read = Some(err);
    }

    /// Make the next submission fail with `err` before it is applied.
    pub fn fail_next_submission(&self, err: LedgerError) {
        self.lock().fail_submission = Some(err);
    }

    pub fn event_feed(&self) -> MemoryEventFeed {
        MemoryEventFeed {
            state: Arc::clone(&self.state),
        }
    }

    fn apply<T>(&self, kind: EventKind, key: &StreamKey, transition: T) -> Result<TxReceipt, LedgerError>
    where
        T: FnOnce(&Stream, u64) -> Result<(Stream, RawEventRecord), StreamError>,
    {
        let mut state = self.lock();
        state.check_submission()?;

        let result = match state.streams.get(key) {
            None => Err(LedgerError::NotFound(key.clone())),
            Some(stream) => transition(stream, state.now)
                .map_err(|err| LedgerError::Rejected(err.to_string())),
        };

        state.submissions.push(Submission {
            kind,
            key: key.clone(),
            applied: result.is_ok(),
        });

        let (stream, event) = result?;
        state.streams.insert(key.clone(), stream);
        state.events.push(event.with_sender(key.sender.clone()));
        Ok(state.receipt())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn list_streams_by_sender(&self, sender: &Address) -> Result<Vec<Stream>, LedgerError> {
        let mut state = self.lock();
        state.check_read()?;
        Ok(state
            .streams
            .values()
            .filter(|stream| stream.sender == *sender)
            .cloned()
            .collect())
    }

    async fn list_streams_by_recipient(
        &self,
        recipient: &Address,
    ) -> Result<Vec<Stream>, LedgerError> {
        let mut state = self.lock();
        state.check_read()?;
        Ok(state
            .streams
            .values()
            .filter(|stream| stream.recipient == *recipient)
            .cloned()
            .collect())
    }

    async fn submit_accept(&self, key: &StreamKey) -> Result<TxReceipt, LedgerError> {
        self.apply(EventKind::Accepted, key, |stream, now| {
            let outcome = stream.accept(&stream.recipient, now)?;
            let event = RawEventRecord::accepted(stream.stream_id, now);
            Ok((outcome.stream, event))
        })
    }

    async fn submit_claim(&self, key: &StreamKey) -> Result<TxReceipt, LedgerError> {
        self.apply(EventKind::Claimed, key, |stream, now| {
            let outcome = stream.claim(&stream.recipient, now)?;
            let event = RawEventRecord::claimed(stream.stream_id, now, outcome.amount);
            Ok((outcome.stream, event))
        })
    }

    async fn submit_cancel(
        &self,
        key: &StreamKey,
        counterparty: &Address,
    ) -> Result<TxReceipt, LedgerError> {
        self.apply(EventKind::Cancelled, key, |stream, now| {
            // The signer is whichever party the counterparty is not.
            let caller = if *counterparty == stream.recipient {
                stream.sender.clone()
            } else if *counterparty == stream.sender {
                stream.recipient.clone()
            } else {
                return Err(StreamError::NotAuthorized {
                    caller: counterparty.clone(),
                });
            };
            let outcome = stream.cancel(&caller, now)?;
            let event = RawEventRecord::cancelled(
                stream.stream_id,
                now,
                outcome.to_sender,
                outcome.to_recipient,
            );
            Ok((outcome.stream, event))
        })
    }
}

/// Feed view over a [`MemoryLedger`]'s event log.
#[derive(Clone)]
pub struct MemoryEventFeed {
    state: Arc<Mutex<LedgerState>>,
}

#[async_trait]
impl EventFeed for MemoryEventFeed {
    async fn fetch_events(&self, kind: EventKind) -> Result<Vec<RawEventRecord>, LedgerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.check_read()?;
        Ok(state
            .events
            .iter()
            .filter(|record| record.kind == Some(kind))
            .cloned()
            .collect())
    }
}
