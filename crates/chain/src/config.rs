//! Sequencer configuration.

use entrychain_core::{Hash, EC_CHAIN_ID, MINUTES_PER_BLOCK};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("minutes_per_period must be in 1..=10, got {0}")]
    InvalidMinutes(u8),
}

/// Sequencer configuration.
///
/// Missing fields in a config file fall back to [`SequencerConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Initial entry capacity reserved for each new entry block.
    pub block_capacity: usize,
    /// Chain id written into every entry-credit block header.
    #[serde(with = "hex_hash")]
    pub ec_chain_id: Hash,
    /// Directory block height of the first period on an empty store.
    pub start_db_height: u32,
    /// Number of minute markers that make up one period.
    pub minutes_per_period: u8,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            block_capacity: 64,
            ec_chain_id: EC_CHAIN_ID,
            start_db_height: 0,
            minutes_per_period: MINUTES_PER_BLOCK,
        }
    }
}

impl SequencerConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MINUTES_PER_BLOCK).contains(&self.minutes_per_period) {
            return Err(ConfigError::InvalidMinutes(self.minutes_per_period));
        }
        Ok(())
    }
}

/// Hashes as hex strings, with or without a `0x` prefix.
mod hex_hash {
    use entrychain_core::Hash;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hash.to_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Hash, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        Hash::from_hex(s).map_err(de::Error::custom)
    }
}
