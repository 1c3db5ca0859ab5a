//! Serde helpers for ledger and feed payloads.
//!
//! The ledger's JSON view encodes `u64` values as decimal strings, while
//! hand-built fixtures and some indexers use plain numbers. Both are
//! accepted wherever an amount, id or timestamp is read.

use serde::{de, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientU64 {
    Number(u64),
    Text(String),
}

impl LenientU64 {
    fn into_u64<E: de::Error>(self) -> Result<u64, E> {
        match self {
            LenientU64::Number(n) => Ok(n),
            LenientU64::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("invalid u64 string: {s:?}"))),
        }
    }
}

pub(crate) fn u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    LenientU64::deserialize(deserializer)?.into_u64()
}

pub(crate) fn opt_u64_lenient<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<LenientU64>::deserialize(deserializer)?
        .map(LenientU64::into_u64)
        .transpose()
}

/// Read a lenient `u64` out of an already parsed JSON value. `None` unless
/// the value is a `u64` number or a decimal `u64` string.
pub(crate) fn u64_from_value(value: &serde_json::Value) -> Option<u64> {
    LenientU64::deserialize(value)
        .ok()?
        .into_u64::<serde_json::Error>()
        .ok()
}
