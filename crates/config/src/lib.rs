//! Protocol settings.
//!
//! Everything here is fixed for the lifetime of the process. Parameters that
//! can change at runtime live in the policy contract and are read through the
//! DAO, not from this crate.

use std::collections::HashMap;

use neo3_core::constants::MAX_VALID_UNTIL_BLOCK_INCREMENT;
use neo3_core::ECPoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn default_seconds_per_block() -> u32 {
    15
}

fn default_mem_pool_size() -> usize {
    50_000
}

fn default_max_traceable_blocks() -> u32 {
    2_102_400
}

fn default_true() -> bool {
    true
}

/// Network-wide protocol parameters, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProtocolSettings {
    /// Network identifier mixed into every signature.
    pub magic: u32,
    /// How many blocks back state queries may reach.
    #[serde(default = "default_max_traceable_blocks")]
    pub max_traceable_blocks: u32,
    /// Target block interval.
    #[serde(default = "default_seconds_per_block")]
    pub seconds_per_block: u32,
    /// Mempool capacity in transactions.
    #[serde(default = "default_mem_pool_size")]
    pub mem_pool_size: usize,
    /// Committee members, as hex-encoded compressed public keys.
    pub standby_committee: Vec<ECPoint>,
    /// How many of the committee act as block validators.
    pub validators_count: usize,
    /// Whether incoming blocks are verified before acceptance.
    #[serde(default = "default_true")]
    pub verify_blocks: bool,
    /// Whether relayed transactions are verified before pooling.
    #[serde(default = "default_true")]
    pub verify_transactions: bool,
    /// Gates the NotValidBefore/Conflicts/NotaryAssisted attributes.
    #[serde(default)]
    pub p2p_sig_extensions: bool,
    /// Native contract name to the heights its upgrades activate at.
    #[serde(default)]
    pub native_activations: HashMap<String, Vec<u32>>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            magic: 0x334F454E, // "NEO3"
            max_traceable_blocks: default_max_traceable_blocks(),
            seconds_per_block: default_seconds_per_block(),
            mem_pool_size: default_mem_pool_size(),
            standby_committee: Vec::new(),
            validators_count: 0,
            verify_blocks: true,
            verify_transactions: true,
            p2p_sig_extensions: false,
            native_activations: HashMap::new(),
        }
    }
}

impl ProtocolSettings {
    /// Loads settings from their JSON form.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.validators_count > self.standby_committee.len() {
            return Err(ConfigError::Invalid(format!(
                "validators count {} exceeds committee size {}",
                self.validators_count,
                self.standby_committee.len()
            )));
        }
        if self.seconds_per_block == 0 {
            return Err(ConfigError::Invalid("seconds per block is zero".into()));
        }
        if self.mem_pool_size == 0 {
            return Err(ConfigError::Invalid("mempool size is zero".into()));
        }
        Ok(())
    }

    /// The standby validators: the first `validators_count` committee keys.
    pub fn standby_validators(&self) -> Vec<ECPoint> {
        self.standby_committee
            .iter()
            .take(self.validators_count)
            .copied()
            .collect()
    }

    /// Block interval in milliseconds.
    pub fn milliseconds_per_block(&self) -> u64 {
        u64::from(self.seconds_per_block) * 1000
    }

    /// Window during which a submitted transaction may be included.
    pub fn max_valid_until_block_increment(&self) -> u32 {
        MAX_VALID_UNTIL_BLOCK_INCREMENT
    }

    /// The activation or upgrade wave of the named native contract in
    /// effect at `height`: the greatest configured height not above it.
    ///
    /// Returns `None` while the contract is not yet active. Names with no
    /// configured entry activate at genesis.
    pub fn native_activation_height(&self, name: &str, height: u32) -> Option<u32> {
        match self.native_activations.get(name) {
            None => Some(0),
            Some(heights) if heights.is_empty() => Some(0),
            Some(heights) => heights.iter().copied().filter(|h| *h <= height).max(),
        }
    }

    /// Whether the named native contract is active at `height`.
    pub fn is_native_active(&self, name: &str, height: u32) -> bool {
        self.native_activation_height(name, height).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ProtocolSettings::default().validate().is_ok());
    }

    #[test]
    fn loads_from_json() {
        let settings = ProtocolSettings::from_json(
            r#"{
                "Magic": 860833102,
                "SecondsPerBlock": 15,
                "MemPoolSize": 50000,
                "StandbyCommittee": [],
                "ValidatorsCount": 0,
                "P2PSigExtensions": true,
                "NativeActivations": {"OracleContract": [0]}
            }"#,
        )
        .unwrap();
        assert_eq!(settings.magic, 860_833_102);
        assert!(settings.p2p_sig_extensions);
        assert_eq!(settings.native_activation_height("OracleContract", 0), Some(0));
        assert_eq!(settings.native_activation_height("NeoToken", 0), Some(0));
    }

    #[test]
    fn activation_waves_resolve_to_latest_applicable() {
        let mut settings = ProtocolSettings::default();
        settings
            .native_activations
            .insert("OracleContract".into(), vec![10, 100, 50]);

        // Not yet active before its first configured height.
        assert_eq!(settings.native_activation_height("OracleContract", 9), None);
        assert!(!settings.is_native_active("OracleContract", 9));

        // The greatest configured height not above the query wins,
        // regardless of configuration order.
        assert_eq!(
            settings.native_activation_height("OracleContract", 10),
            Some(10)
        );
        assert_eq!(
            settings.native_activation_height("OracleContract", 60),
            Some(50)
        );
        assert_eq!(
            settings.native_activation_height("OracleContract", 200),
            Some(100)
        );

        // Unlisted names activate at genesis.
        assert_eq!(settings.native_activation_height("GasToken", 0), Some(0));
    }

    #[test]
    fn validator_count_bound() {
        let mut settings = ProtocolSettings::default();
        settings.validators_count = 1;
        assert!(settings.validate().is_err());
    }
}
