//! Engine configuration.
//!
//! Loaded from TOML, then optionally overridden from the environment:
//!
//! ```toml
//! [asset]
//! symbol = "APT"
//! decimals = 8
//!
//! [feed]
//! timestamp_unit = "seconds"
//! ```
//!
//! | Variable                    | Overrides             |
//! |-----------------------------|-----------------------|
//! | `RIVER_ASSET_SYMBOL`        | `asset.symbol`        |
//! | `RIVER_ASSET_DECIMALS`      | `asset.decimals`      |
//! | `RIVER_FEED_TIMESTAMP_UNIT` | `feed.timestamp_unit` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units::{Asset, TimestampUnit};

/// Largest decimal count whose `10^decimals` still fits a `u64` minor-unit
/// amount with room for whole coins.
pub const MAX_DECIMALS: u8 = 18;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Unit raw event timestamps arrive in; normalized to seconds on decode.
    pub timestamp_unit: TimestampUnit,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub asset: Asset,
    pub feed: FeedConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults with the process environment applied on top.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; `with_env_overrides` passes the
    /// process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(symbol) = lookup("RIVER_ASSET_SYMBOL") {
            self.asset.symbol = symbol.trim().to_string();
        }
        if let Some(raw) = lookup("RIVER_ASSET_DECIMALS") {
            self.asset.decimals = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "asset.decimals",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("RIVER_FEED_TIMESTAMP_UNIT") {
            self.feed.timestamp_unit = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "feed.timestamp_unit",
                value: raw.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.asset.symbol.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "asset.symbol",
                value: self.asset.symbol.clone(),
            });
        }
        if self.asset.decimals > MAX_DECIMALS {
            return Err(ConfigError::InvalidValue {
                key: "asset.decimals",
                value: self.asset.decimals.to_string(),
            });
        }
        Ok(())
    }
}
