//! Participant-wide views over many streams: display buckets and the net
//! flow rate.
//!
//! Every stream is classified through [`Stream::classify`], so buckets and
//! rates can never disagree about which state a stream is in.

use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::lifecycle::{LifecycleState, Role};
use crate::{Address, Stream};

/// Fixed-point scale of [`FlowRate`]: one minor unit per second is
/// `RATE_SCALE`.
pub const RATE_SCALE: i128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// FlowRate
// ---------------------------------------------------------------------------

/// Signed streaming rate in minor units per second, fixed-point scaled by
/// [`RATE_SCALE`].
///
/// Positive is net inflow, negative net outflow, zero balanced.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FlowRate(i128);

impl FlowRate {
    pub const ZERO: FlowRate = FlowRate(0);

    /// `amount / duration_seconds`, truncated at the fixed-point scale.
    ///
    /// A zero duration cannot come out of a validated [`Stream`]; it yields a
    /// zero rate rather than a division failure.
    pub fn per_second(amount: u64, duration_seconds: u64) -> FlowRate {
        if duration_seconds == 0 {
            return FlowRate::ZERO;
        }
        FlowRate(amount as i128 * RATE_SCALE / duration_seconds as i128)
    }

    pub fn from_scaled(scaled: i128) -> FlowRate {
        FlowRate(scaled)
    }

    pub fn as_scaled(self) -> i128 {
        self.0
    }

    /// Whole minor units per second, truncated toward zero.
    pub fn minor_units_per_second(self) -> i128 {
        self.0 / RATE_SCALE
    }

    pub fn is_inflow(self) -> bool {
        self.0 > 0
    }

    pub fn is_outflow(self) -> bool {
        self.0 < 0
    }
}

impl Add for FlowRate {
    type Output = FlowRate;

    fn add(self, rhs: FlowRate) -> FlowRate {
        FlowRate(self.0.saturating_add(rhs.0))
    }
}

impl Sub for FlowRate {
    type Output = FlowRate;

    fn sub(self, rhs: FlowRate) -> FlowRate {
        FlowRate(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for FlowRate {
    type Output = FlowRate;

    fn neg(self) -> FlowRate {
        FlowRate(self.0.saturating_neg())
    }
}

impl Sum for FlowRate {
    fn sum<I: Iterator<Item = FlowRate>>(iter: I) -> FlowRate {
        iter.fold(FlowRate::ZERO, Add::add)
    }
}

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

/// Streams grouped by display state. Cancelled streams are closed and
/// belong to no bucket.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Buckets {
    pub pending: Vec<Stream>,
    pub active: Vec<Stream>,
    pub completed: Vec<Stream>,
}

impl Buckets {
    /// Partition `streams` at `now`, returning the buckets and the number of
    /// cancelled streams left out.
    pub fn partition<'a, I>(streams: I, now: u64) -> (Buckets, usize)
    where
        I: IntoIterator<Item = &'a Stream>,
    {
        let mut buckets = Buckets::default();
        let mut cancelled = 0;
        for stream in streams {
            match stream.classify(now) {
                LifecycleState::Pending => buckets.pending.push(stream.clone()),
                LifecycleState::Active => buckets.active.push(stream.clone()),
                LifecycleState::Completed => buckets.completed.push(stream.clone()),
                LifecycleState::Cancelled => cancelled += 1,
            }
        }
        (buckets, cancelled)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.active.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of nominal rates over the pending and active buckets.
    pub fn open_rate(&self) -> FlowRate {
        self.pending
            .iter()
            .chain(self.active.iter())
            .map(Stream::rate)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Sum of nominal rates of the streams that are still open at `now`.
fn open_rate(streams: &[Stream], now: u64) -> FlowRate {
    streams
        .iter()
        .filter(|stream| stream.classify(now).is_open())
        .map(Stream::rate)
        .sum()
}

/// Net flow rate of a participant at `now`.
///
/// Incoming: every recipient stream that is `Pending` or `Active`.
/// Outgoing: every sender stream that is `Pending` or `Active`.
/// `Completed` and `Cancelled` streams contribute nothing on either side.
///
/// Pending streams count at their full rate even though they have not been
/// accepted and nothing vests yet. The figure is the *expected* rate once
/// every open stream runs, not the rate vesting at this instant.
///
/// # Examples
/// - Receiving 60 APT over 60 s (pending) and sending 120 APT over 60 s
///   (active): `1 - 2 = -1` APT/s
pub fn aggregate_rate(sender_streams: &[Stream], recipient_streams: &[Stream], now: u64) -> FlowRate {
    open_rate(recipient_streams, now) - open_rate(sender_streams, now)
}

/// Everything a participant's dashboard shows, computed at `as_of`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub participant: Address,
    pub as_of: u64,
    /// Streams the participant receives.
    pub incoming: Buckets,
    /// Streams the participant funds.
    pub outgoing: Buckets,
    pub incoming_rate: FlowRate,
    pub outgoing_rate: FlowRate,
    pub net_flow_rate: FlowRate,
    /// Cancelled streams excluded from the buckets.
    pub cancelled: usize,
    /// Streams handed in on the wrong side for `participant`, ignored.
    pub mismatched: usize,
}

impl Portfolio {
    /// Build the portfolio of `participant`.
    ///
    /// Each list must hold streams where `participant` plays the matching
    /// role; any stream that does not is skipped and counted in
    /// `mismatched`.
    pub fn build(
        participant: &Address,
        sender_streams: &[Stream],
        recipient_streams: &[Stream],
        now: u64,
    ) -> Portfolio {
        let (sending, sending_mismatched) = split_by_role(participant, Role::Sender, sender_streams);
        let (receiving, receiving_mismatched) =
            split_by_role(participant, Role::Recipient, recipient_streams);
        let mismatched = sending_mismatched + receiving_mismatched;
        if mismatched > 0 {
            tracing::warn!(
                %participant,
                mismatched,
                "ignoring streams that do not belong to the participant"
            );
        }

        let (incoming, incoming_cancelled) = Buckets::partition(receiving.iter().copied(), now);
        let (outgoing, outgoing_cancelled) = Buckets::partition(sending.iter().copied(), now);

        let incoming_rate = incoming.open_rate();
        let outgoing_rate = outgoing.open_rate();

        Portfolio {
            participant: participant.clone(),
            as_of: now,
            incoming,
            outgoing,
            incoming_rate,
            outgoing_rate,
            net_flow_rate: incoming_rate - outgoing_rate,
            cancelled: incoming_cancelled + outgoing_cancelled,
            mismatched,
        }
    }
}

fn split_by_role<'a>(
    participant: &Address,
    role: Role,
    streams: &'a [Stream],
) -> (Vec<&'a Stream>, usize) {
    let matching: Vec<&Stream> = streams
        .iter()
        .filter(|stream| stream.role_of(participant) == Some(role))
        .collect();
    let mismatched = streams.len() - matching.len();
    (matching, mismatched)
}
