//! Signing flow configuration

use crate::address::Ss58Prefix;
use crate::error::SignerError;
use crate::transport::TransportConfig;
use crate::types::{deserialize_u128, serialize_u128, Balance, CryptoType, Weight};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a signing flow. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignerConfig {
    pub transport: TransportConfig,
    /// QR lifetime before transport is regenerated
    pub countdown_secs: u64,
    /// Pause between submission acknowledgement and reset
    pub settle_delay_ms: u64,
    /// Mortal era length in blocks
    pub era_period: u64,
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub tip: Balance,
    /// `max_weight` passed to `multisig.as_multi`
    pub max_weight: Weight,
    pub crypto_type: CryptoType,
    /// Address format signers are displayed in
    pub ss58_prefix: Ss58Prefix,
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            transport: TransportConfig::default(),
            countdown_secs: 300,
            settle_delay_ms: 2000,
            era_period: 64,
            tip: 0,
            max_weight: Weight {
                ref_time: 5_000_000_000,
                proof_size: 100_000,
            },
            crypto_type: CryptoType::Sr25519,
            ss58_prefix: Ss58Prefix::POLKADOT,
        }
    }
}

impl SignerConfig {
    pub fn from_json(json: &str) -> Result<Self, SignerError> {
        serde_json::from_str(json)
            .map_err(|e| SignerError::InvalidInput(format!("Invalid config: {}", e)))
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
