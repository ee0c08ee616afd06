//! Pool configuration types

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity and emergency settings for one pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Entries pre-warmed when the pool is created
    pub capacity_default: usize,
    /// Hard cap on simultaneously alive entries
    pub capacity_max: usize,
    /// Ask active entries to hurry when free supply runs low
    pub hurry_enabled: bool,
    /// Free count at or below which hurry is triggered
    pub hurry_threshold: usize,
    /// Maximum entries hurried per trigger
    pub hurry_batch_size: usize,
    /// Force-release the oldest active entry when starved
    pub evict_oldest_when_starved: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity_default: 5,
            capacity_max: 30,
            hurry_enabled: true,
            hurry_threshold: 5,
            hurry_batch_size: 5,
            evict_oldest_when_starved: true,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_max == 0 {
            return Err(Error::configuration("capacity_max must be greater than 0"));
        }
        if self.capacity_default > self.capacity_max {
            return Err(Error::configuration(format!(
                "capacity_default ({}) must not exceed capacity_max ({})",
                self.capacity_default, self.capacity_max
            )));
        }
        Ok(())
    }

    /// Settings with the emergency tactics switched off.
    #[must_use]
    pub fn without_emergency(capacity_default: usize, capacity_max: usize) -> Self {
        Self {
            capacity_default,
            capacity_max,
            hurry_enabled: false,
            hurry_threshold: 0,
            hurry_batch_size: 0,
            evict_oldest_when_starved: false,
        }
    }
}

/// Settings for a set of pools, keyed by pool identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolsConfig {
    /// Per-pool settings
    pub pools: BTreeMap<String, PoolConfig>,
}

impl PoolsConfig {
    /// Parse from a JSON document of the form `{"pools": {"id": {...}}}`.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid pools config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML document with the same shape as [`from_json`](Self::from_json).
    #[cfg(feature = "serde")]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("invalid pools config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every pool's settings.
    pub fn validate(&self) -> Result<()> {
        for (id, config) in &self.pools {
            config
                .validate()
                .map_err(|e| Error::configuration(format!("pool '{id}': {e}")))?;
        }
        Ok(())
    }
}
