//! Single-stream state machine.
//!
//! ```text
//!            accept               time passes
//!  Pending ──────────▶ Active ─────────────────▶ Completed
//!     │                 │  ▲                          │
//!     │ cancel          │  │ claim                    │ final claim
//!     ▼                 ▼  │                          ▼
//!  Cancelled ◀──────── cancel                     (drained)
//! ```
//!
//! Transitions take the prior [`Stream`] by reference and return the next
//! one inside a typed outcome. Nothing is mutated in place, so a refused
//! transition leaves the caller's value exactly as it was and the same
//! transition applied to the same state and instant always computes the same
//! result. The ledger remains the authority that serializes and persists
//! them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::accrual::{self, VestedFraction};
use crate::error::StreamError;
use crate::portfolio::FlowRate;
use crate::{Address, Stream};

// ---------------------------------------------------------------------------
// States and roles
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending = 0,
    Active = 1,
    Completed = 2,
    Cancelled = 3,
}

impl LifecycleState {
    /// `Pending` or `Active`: the stream still moves funds or is expected to.
    pub fn is_open(self) -> bool {
        matches!(self, LifecycleState::Pending | LifecycleState::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Active => "active",
            LifecycleState::Completed => "completed",
            LifecycleState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The side of a stream a participant is on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Recipient,
}

// ---------------------------------------------------------------------------
// Transition outcomes
// ---------------------------------------------------------------------------

/// Result of `Pending --accept--> Active`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Acceptance {
    pub started_at: u64,
    pub stream: Stream,
}

/// Result of a claim: `amount` moves to the recipient.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Claim {
    pub amount: u64,
    pub claimed_at: u64,
    /// True once the whole deposit has been released.
    pub drained: bool,
    pub stream: Stream,
}

/// Result of a cancellation and the deterministic split it settles.
///
/// `to_sender + to_recipient` always equals the deposit minus whatever was
/// claimed before the cancellation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cancellation {
    pub to_sender: u64,
    pub to_recipient: u64,
    pub cancelled_at: u64,
    pub cancelled_by: Role,
    /// State the stream was cancelled from (`Pending` or `Active`).
    pub from_state: LifecycleState,
    pub stream: Stream,
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Classify `stream` at `now`. Pure; equal inputs give equal outputs.
pub fn classify(stream: &Stream, now: u64) -> LifecycleState {
    stream.classify(now)
}

/// Vested amount the recipient has not yet withdrawn at `now`.
pub fn claimable(stream: &Stream, now: u64) -> u64 {
    stream.claimable(now)
}

impl Stream {
    /// Derive the lifecycle state at `now`.
    ///
    /// | Condition                              | State       |
    /// |----------------------------------------|-------------|
    /// | `cancelled`                            | `Cancelled` |
    /// | no `start_timestamp`                   | `Pending`   |
    /// | `now < start + duration`               | `Active`    |
    /// | `now >= start + duration`              | `Completed` |
    pub fn classify(&self, now: u64) -> LifecycleState {
        if self.cancelled {
            return LifecycleState::Cancelled;
        }
        match self.start_timestamp {
            None => LifecycleState::Pending,
            Some(_) if self.vested_fraction(now).is_complete() => LifecycleState::Completed,
            Some(_) => LifecycleState::Active,
        }
    }

    pub fn end_timestamp(&self) -> Option<u64> {
        self.start_timestamp
            .map(|start| accrual::end_timestamp(start, self.duration_seconds))
    }

    pub fn vested_fraction(&self, now: u64) -> VestedFraction {
        accrual::vested_fraction(self.start_timestamp, self.duration_seconds, now)
    }

    /// Total vested at `now`, including anything already claimed.
    pub fn vested_amount(&self, now: u64) -> u64 {
        accrual::claimable_amount(
            self.total_amount,
            self.start_timestamp,
            self.duration_seconds,
            now,
        )
    }

    /// Vested but not yet claimed at `now`. Zero once cancelled: the
    /// cancellation settles the recipient's share.
    pub fn claimable(&self, now: u64) -> u64 {
        if self.cancelled {
            return 0;
        }
        self.vested_amount(now).saturating_sub(self.already_claimed)
    }

    /// Deposit not yet released to the recipient.
    pub fn remaining(&self) -> u64 {
        self.total_amount.saturating_sub(self.already_claimed)
    }

    /// Vesting progress in `[0, 100]` for progress bars.
    pub fn progress_percent(&self, now: u64) -> f64 {
        self.vested_fraction(now).as_f64() * 100.0
    }

    /// Nominal rate `total_amount / duration_seconds`, independent of state.
    pub fn rate(&self) -> FlowRate {
        FlowRate::per_second(self.total_amount, self.duration_seconds)
    }

    pub fn role_of(&self, participant: &Address) -> Option<Role> {
        if *participant == self.sender {
            Some(Role::Sender)
        } else if *participant == self.recipient {
            Some(Role::Recipient)
        } else {
            None
        }
    }

    pub fn counterparty(&self, role: Role) -> &Address {
        match role {
            Role::Sender => &self.recipient,
            Role::Recipient => &self.sender,
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

impl Stream {
    /// Accept a pending stream, starting vesting at `now`.
    ///
    /// `now == 0` is accepted here, but [`StreamRecord`](crate::StreamRecord)
    /// cannot tell that start apart from pending.
    ///
    /// # Errors
    /// - `NotAuthorized` if `caller` is not the recipient
    /// - `StreamTerminated` if the stream is cancelled or completed
    /// - `AlreadyAccepted` if the stream is already active
    pub fn accept(&self, caller: &Address, now: u64) -> Result<Acceptance, StreamError> {
        self.require_recipient(caller)?;

        match self.classify(now) {
            LifecycleState::Pending => {}
            LifecycleState::Active => return Err(StreamError::AlreadyAccepted),
            state => return Err(StreamError::StreamTerminated(state)),
        }

        let mut stream = self.clone();
        stream.start_timestamp = Some(now);

        tracing::debug!(
            stream_id = self.stream_id,
            sender = %self.sender,
            started_at = now,
            "stream accepted"
        );

        Ok(Acceptance {
            started_at: now,
            stream,
        })
    }

    /// Release everything vested and unclaimed at `now` to the recipient.
    ///
    /// On a `Completed` stream this is the final claim and releases exactly
    /// `total_amount - already_claimed`. Once that balance is zero the stream
    /// is drained and further claims are refused as terminated.
    ///
    /// # Errors
    /// - `NotAuthorized` if `caller` is not the recipient
    /// - `StreamTerminated` if the stream is cancelled, or completed and drained
    /// - `NothingToClaim` if the stream is pending or nothing new has vested
    ///
    /// # Examples
    /// - Stream: 1000 units over 1000 s, accepted at t=0
    /// - At t=300: claims 300
    /// - At t=300 (again): `NothingToClaim`
    /// - At t=800: claims 500
    /// - At t=1200: claims 200, stream drained
    pub fn claim(&self, caller: &Address, now: u64) -> Result<Claim, StreamError> {
        self.require_recipient(caller)?;

        let state = self.classify(now);
        if state == LifecycleState::Cancelled {
            return Err(StreamError::StreamTerminated(state));
        }

        let amount = self.claimable(now);
        if amount == 0 {
            return Err(match state {
                LifecycleState::Completed => StreamError::StreamTerminated(state),
                _ => StreamError::NothingToClaim,
            });
        }

        let mut stream = self.clone();
        stream.already_claimed += amount;
        let drained = stream.already_claimed == stream.total_amount;

        tracing::debug!(
            stream_id = self.stream_id,
            sender = %self.sender,
            amount,
            already_claimed = stream.already_claimed,
            drained,
            "stream claimed"
        );

        Ok(Claim {
            amount,
            claimed_at: now,
            drained,
            stream,
        })
    }

    /// Terminate the stream early and settle both sides.
    ///
    /// | From      | To recipient                  | To sender               |
    /// |-----------|-------------------------------|-------------------------|
    /// | `Pending` | 0                             | `total_amount`          |
    /// | `Active`  | `vested(now) - already_claimed` | `total_amount - vested(now)` |
    ///
    /// # Errors
    /// - `NotAuthorized` if `caller` is neither sender nor recipient
    /// - `StreamTerminated` if the stream is already completed or cancelled
    ///
    /// # Examples
    /// - 100 APT over 1000 s, cancelled 300 s after acceptance: 30 APT to the
    ///   recipient, 70 APT back to the sender
    pub fn cancel(&self, caller: &Address, now: u64) -> Result<Cancellation, StreamError> {
        let cancelled_by = self
            .role_of(caller)
            .ok_or_else(|| StreamError::NotAuthorized {
                caller: caller.clone(),
            })?;

        let from_state = self.classify(now);
        if from_state.is_terminal() {
            return Err(StreamError::StreamTerminated(from_state));
        }

        // Pending streams have vested nothing, so the same split gives the
        // whole deposit back to the sender.
        let remaining = self.remaining();
        let to_recipient = self.claimable(now);
        let to_sender = remaining - to_recipient;

        let mut stream = self.clone();
        stream.cancelled = true;
        stream.already_claimed += to_recipient;

        tracing::debug!(
            stream_id = self.stream_id,
            sender = %self.sender,
            ?cancelled_by,
            %from_state,
            to_sender,
            to_recipient,
            "stream cancelled"
        );

        Ok(Cancellation {
            to_sender,
            to_recipient,
            cancelled_at: now,
            cancelled_by,
            from_state,
            stream,
        })
    }

    fn require_recipient(&self, caller: &Address) -> Result<(), StreamError> {
        if *caller != self.recipient {
            return Err(StreamError::NotAuthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }
}
