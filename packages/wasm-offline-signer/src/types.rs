//! Shared types for signing

use crate::address::decode_ss58;
use crate::error::SignerError;
use parity_scale_codec::{Compact, Decode, Encode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Amount in the chain's smallest unit (planck)
pub type Balance = u128;

/// Wallet identifier in the external wallet store
pub type WalletId = u32;

/// Asset identifier on a chain (0 is the native token)
pub type AssetId = u32;

pub const NATIVE_ASSET: AssetId = 0;

/// 32-byte account identifier (public key)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Default)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from `0x` hex or an SS58 address
    pub fn parse(s: &str) -> Result<Self, SignerError> {
        if let Some(hex_str) = s.strip_prefix("0x") {
            return Ok(AccountId(parse_hex_32(hex_str)?));
        }
        decode_ss58(s).map(|(account, _)| account)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}…", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AccountId::parse(&s).map_err(de::Error::custom)
    }
}

/// Chain identifier (genesis hash)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Default)]
pub struct ChainId(pub [u8; 32]);

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}…", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        parse_hex_32(s).map(ChainId).map_err(de::Error::custom)
    }
}

/// Transaction era (mortal or immortal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Era {
    /// Immortal transaction (never expires)
    Immortal,
    /// Mortal transaction with period and phase
    Mortal { period: u64, phase: u64 },
}

impl Era {
    /// Mortal era starting at `current_block`. Period is rounded to a power
    /// of two in `4..=65536`.
    pub fn mortal(period: u64, current_block: u64) -> Self {
        let period = period.next_power_of_two().clamp(4, 1 << 16);
        let phase = current_block % period;
        let quantize_factor = (period >> 12).max(1);
        Era::Mortal {
            period,
            phase: phase / quantize_factor * quantize_factor,
        }
    }

    /// Check if this is an immortal era
    pub fn is_immortal(&self) -> bool {
        matches!(self, Era::Immortal)
    }

    /// SCALE encode the era
    pub fn encode_era(&self) -> Vec<u8> {
        match self {
            Era::Immortal => vec![0x00],
            Era::Mortal { period, phase } => {
                let quantize_factor = (*period >> 12).max(1);
                let encoded_period = (period.trailing_zeros().saturating_sub(1)).clamp(1, 15) as u16;
                let quantized_phase = (*phase / quantize_factor) as u16;
                (encoded_period | (quantized_phase << 4)).to_le_bytes().to_vec()
            }
        }
    }
}

/// Dispatch weight, as taken by `multisig.as_multi`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weight {
    pub ref_time: u64,
    pub proof_size: u64,
}

impl Encode for Weight {
    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        Compact(self.ref_time).encode_to(dest);
        Compact(self.proof_size).encode_to(dest);
    }
}

/// Reference block for mortality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub hash: [u8; 32],
    pub number: u64,
}

/// Runtime versions that go into the signed extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
    pub spec_version: u32,
    pub tx_version: u32,
}

/// Chain state a batch of signing payloads is built against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub genesis_hash: ChainId,
    pub block: BlockRef,
    pub runtime: RuntimeVersion,
}

/// Chain snapshot plus the next nonce of every signer in the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainContext {
    pub snapshot: ChainSnapshot,
    pub nonces: BTreeMap<AccountId, u32>,
}

/// Multisig deposit constants (`multisig.depositBase`, `multisig.depositFactor`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositConstants {
    pub deposit_base: Balance,
    pub deposit_factor: Balance,
}

/// Signature scheme of the air-gapped signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CryptoType {
    Ed25519,
    #[default]
    Sr25519,
    Ecdsa,
}

impl CryptoType {
    /// Crypto byte of the Vault QR prelude
    pub fn vault_code(self) -> u8 {
        match self {
            CryptoType::Ed25519 => 0x00,
            CryptoType::Sr25519 => 0x01,
            CryptoType::Ecdsa => 0x02,
        }
    }
}

/// Parse hex string to 32-byte array
pub fn parse_hex_32(hex_str: &str) -> Result<[u8; 32], SignerError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str)
        .map_err(|e| SignerError::InvalidInput(format!("Invalid hex: {}", e)))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        SignerError::InvalidInput(format!("Hash must be 32 bytes, got {}", v.len()))
    })
}

/// Deserialize u128 from either a number or string
pub fn deserialize_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    struct U128Visitor;

    impl<'de> de::Visitor<'de> for U128Visitor {
        type Value = u128;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a u128 as number or string")
        }

        fn visit_u64<E>(self, value: u64) -> Result<u128, E>
        where
            E: de::Error,
        {
            Ok(value as u128)
        }

        fn visit_u128<E>(self, value: u128) -> Result<u128, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<u128, E>
        where
            E: de::Error,
        {
            if value >= 0 {
                Ok(value as u128)
            } else {
                Err(E::custom("negative values not allowed"))
            }
        }

        fn visit_str<E>(self, value: &str) -> Result<u128, E>
        where
            E: de::Error,
        {
            value.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(U128Visitor)
}

/// Serialize u128 as a decimal string (BigInt-safe for JS)
pub fn serialize_u128<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Serialize bytes as `0x`-prefixed hex
pub fn serialize_hex<S: Serializer, T: AsRef<[u8]>>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes.as_ref())))
}

/// Deserialize bytes from hex, with or without the `0x` prefix
pub fn deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str = String::deserialize(deserializer)?;
    hex::decode(hex_str.strip_prefix("0x").unwrap_or(&hex_str)).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_era_is_immortal() {
        assert!(Era::Immortal.is_immortal());
        assert!(!Era::mortal(64, 1000).is_immortal());
    }

    #[test]
    fn test_mortal_era_encoding() {
        // period 64, phase 1000 % 64 = 40 -> (40 << 4) | 5
        let era = Era::mortal(64, 1000);
        assert_eq!(era, Era::Mortal { period: 64, phase: 40 });
        assert_eq!(era.encode_era(), ((40u16 << 4) | 5).to_le_bytes().to_vec());
        assert_eq!(Era::Immortal.encode_era(), vec![0x00]);
    }

    #[test]
    fn test_account_id_parse_hex_and_ss58() {
        let from_ss58 = AccountId::parse("5EGoFA95omzemRssELLDjVenNZ68aXyUeqtKQScXSEBvVJkr").unwrap();
        let from_hex =
            AccountId::parse("0x61b18c6dc02ddcabdeac56cb4f21a971cc41cc97640f6f85b073480008c53a0d")
                .unwrap();
        assert_eq!(from_ss58, from_hex);
    }

    #[test]
    fn test_account_id_serde_hex() {
        let account = AccountId([7u8; 32]);
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "07".repeat(32)));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn test_weight_encodes_compact() {
        let weight = Weight {
            ref_time: 1,
            proof_size: 2,
        };
        assert_eq!(weight.encode(), vec![0x04, 0x08]);
    }
}
