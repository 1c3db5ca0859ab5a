//! The one place where integer minor units and whole seconds meet display
//! units.
//!
//! Everything else in the crate works in minor units and seconds. The float
//! conversions below are lossy and meant for presentation only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::portfolio::{FlowRate, RATE_SCALE};

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Unit an upstream source reports instants in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    #[default]
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimestampUnit {
    /// Normalize `value` to whole seconds, truncating.
    pub fn to_seconds(self, value: u64) -> u64 {
        match self {
            TimestampUnit::Seconds => value,
            TimestampUnit::Milliseconds => value / 1_000,
            TimestampUnit::Microseconds => value / 1_000_000,
        }
    }

    /// The part of `value` that [`TimestampUnit::to_seconds`] truncates, in
    /// microseconds.
    pub fn subsec_micros(self, value: u64) -> u64 {
        match self {
            TimestampUnit::Seconds => 0,
            TimestampUnit::Milliseconds => value % 1_000 * 1_000,
            TimestampUnit::Microseconds => value % 1_000_000,
        }
    }
}

impl FromStr for TimestampUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "seconds" => Ok(TimestampUnit::Seconds),
            "ms" | "milliseconds" => Ok(TimestampUnit::Milliseconds),
            "us" | "microseconds" => Ok(TimestampUnit::Microseconds),
            other => Err(format!("unknown timestamp unit: {other}")),
        }
    }
}

pub fn seconds_to_millis(seconds: u64) -> u64 {
    seconds.saturating_mul(1_000)
}

pub fn millis_to_seconds(millis: u64) -> u64 {
    millis / 1_000
}

// ---------------------------------------------------------------------------
// Asset amounts
// ---------------------------------------------------------------------------

/// Display metadata of the streamed coin.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    pub symbol: String,
    pub decimals: u8,
}

impl Default for Asset {
    fn default() -> Self {
        Asset {
            symbol: "APT".to_string(),
            decimals: 8,
        }
    }
}

impl Asset {
    /// Minor units in one whole coin (`10^decimals`).
    pub fn minor_per_unit(&self) -> u64 {
        10u64
            .checked_pow(u32::from(self.decimals))
            .unwrap_or(u64::MAX)
    }

    pub fn to_display(&self, amount: u64) -> f64 {
        amount as f64 / self.minor_per_unit() as f64
    }

    /// Whole-coin value back to minor units, truncating toward zero.
    ///
    /// Returns `None` for negative, non-finite or out-of-range input.
    pub fn from_display(&self, value: f64) -> Option<u64> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = (value * self.minor_per_unit() as f64).trunc();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(scaled as u64)
    }

    /// `12.5 APT`, with every decimal the asset carries, trailing zeros
    /// trimmed.
    pub fn format_amount(&self, amount: u64) -> String {
        let per_unit = self.minor_per_unit();
        let whole = amount / per_unit;
        let frac = amount % per_unit;
        if frac == 0 || self.decimals == 0 {
            return format!("{whole} {}", self.symbol);
        }
        let digits = format!("{frac:0width$}", width = self.decimals as usize);
        format!("{whole}.{} {}", digits.trim_end_matches('0'), self.symbol)
    }

    /// Rate in whole coins per second.
    pub fn rate_to_display(&self, rate: FlowRate) -> f64 {
        rate.as_scaled() as f64 / RATE_SCALE as f64 / self.minor_per_unit() as f64
    }

    /// Render `rate` in the smallest time unit where its magnitude reaches
    /// one whole coin, e.g. `1.5 APT / s`, `-3 APT / hr`, `0.25 APT / year`.
    pub fn format_rate(&self, rate: FlowRate) -> String {
        let mut value = self.rate_to_display(rate);
        if value == 0.0 {
            return format!("0 {} / s", self.symbol);
        }

        for (factor, label) in RATE_LADDER {
            value *= factor;
            if value.abs() >= 1.0 {
                return format!("{} {} / {label}", trim_decimals(value, 3), self.symbol);
            }
        }
        // The ladder ends at years; anything smaller still prints per year.
        format!("{} {} / year", trim_decimals(value, 3), self.symbol)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} decimals)", self.symbol, self.decimals)
    }
}

/// Multiplier from the previous rung, and the rung's label.
const RATE_LADDER: [(f64, &str); 7] = [
    (1.0, "s"),
    (60.0, "min"),
    (60.0, "hr"),
    (24.0, "day"),
    (7.0, "week"),
    (4.0, "month"),
    (12.0, "year"),
];

fn trim_decimals(value: f64, max_decimals: usize) -> String {
    let fixed = format!("{value:.max_decimals$}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Compact duration label with two decimals in the largest fitting unit:
/// `seconds`, `minutes`, `hours`, `days` or `years`.
///
/// A year here is 12 four-week months (336 days), matching the rate ladder.
pub fn format_duration_short(duration_seconds: u64) -> String {
    let seconds = duration_seconds as f64;
    let minutes = seconds / 60.0;
    let hours = minutes / 60.0;
    let days = hours / 24.0;
    let years = days / 7.0 / 4.0 / 12.0;

    if years >= 1.0 {
        format!("{years:.2} years")
    } else if days >= 1.0 {
        format!("{days:.2} days")
    } else if hours >= 1.0 {
        format!("{hours:.2} hours")
    } else if minutes >= 1.0 {
        format!("{minutes:.2} minutes")
    } else {
        format!("{seconds:.2} seconds")
    }
}
