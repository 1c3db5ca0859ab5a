//! Linear vesting math.
//!
//! All functions are pure over `(total_amount, start_timestamp,
//! duration_seconds, now)`. Amounts are integer minor units and the
//! multiplication is widened to `u128`, so no intermediate can overflow and
//! every result truncates toward zero.

use std::cmp::Ordering;

/// Exact vested proportion of a stream at one instant.
///
/// Kept as the rational `elapsed / duration` so that no floating error can
/// leak into amount math. Values are always within `[0, 1]`.
#[derive(Clone, Copy, Debug)]
pub struct VestedFraction {
    elapsed: u64,
    duration: u64,
}

impl VestedFraction {
    pub const ZERO: VestedFraction = VestedFraction {
        elapsed: 0,
        duration: 1,
    };

    pub const ONE: VestedFraction = VestedFraction {
        elapsed: 1,
        duration: 1,
    };

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn is_zero(&self) -> bool {
        self.elapsed == 0
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Apply the fraction to `amount`, truncating toward zero.
    pub fn apply(&self, amount: u64) -> u64 {
        if self.is_complete() {
            return amount;
        }
        // elapsed < duration, so the quotient is strictly below `amount`
        // and the narrowing cast cannot truncate.
        ((amount as u128 * self.elapsed as u128) / self.duration as u128) as u64
    }

    /// Lossy view for progress displays only.
    pub fn as_f64(&self) -> f64 {
        self.elapsed as f64 / self.duration as f64
    }
}

impl PartialEq for VestedFraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VestedFraction {}

impl PartialOrd for VestedFraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VestedFraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.elapsed as u128 * other.duration as u128;
        let rhs = other.elapsed as u128 * self.duration as u128;
        lhs.cmp(&rhs)
    }
}

/// Instant at which a stream started at `start` finishes vesting.
///
/// Saturates at `u64::MAX` instead of wrapping.
pub fn end_timestamp(start: u64, duration_seconds: u64) -> u64 {
    start.saturating_add(duration_seconds)
}

/// Proportion of the total unlocked at `now`.
///
/// - `start_timestamp == None` (not accepted) or `now <= start`: zero.
///   Clock skew where `now` precedes the start never goes negative.
/// - `now >= start + duration`: one.
/// - otherwise `(now - start) / duration`.
///
/// A zero duration is rejected when a stream is built; if one reaches this
/// function anyway the stream counts as fully vested once started.
pub fn vested_fraction(
    start_timestamp: Option<u64>,
    duration_seconds: u64,
    now: u64,
) -> VestedFraction {
    let Some(start) = start_timestamp else {
        return VestedFraction::ZERO;
    };
    if now <= start {
        return if duration_seconds == 0 {
            VestedFraction::ONE
        } else {
            VestedFraction::ZERO
        };
    }

    let elapsed = now - start;
    if elapsed >= duration_seconds {
        return VestedFraction::ONE;
    }

    VestedFraction {
        elapsed,
        duration: duration_seconds,
    }
}

/// Amount vested at `now`: `total_amount × vested_fraction(now)`, truncated.
///
/// Never exceeds `total_amount` and is non-decreasing in `now`, so the sum
/// of successive claim deltas can never ask for more than was deposited.
///
/// # Examples
/// - 100 APT (`100_00000000` minor units) over 1000 s, started at `T`
///   - at `T`: 0
///   - at `T + 500`: `50_00000000`
///   - at `T + 1000` and later: `100_00000000`
pub fn claimable_amount(
    total_amount: u64,
    start_timestamp: Option<u64>,
    duration_seconds: u64,
    now: u64,
) -> u64 {
    vested_fraction(start_timestamp, duration_seconds, now).apply(total_amount)
}

pub fn is_complete(start_timestamp: Option<u64>, duration_seconds: u64, now: u64) -> bool {
    vested_fraction(start_timestamp, duration_seconds, now).is_complete()
}
