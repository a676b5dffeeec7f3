//! SS58 addresses
//!
//! Destinations typed by the user arrive as SS58 strings. Signers are shown
//! back in the network's own format, picked by [`Ss58Prefix`].

use crate::error::SignerError;
use crate::types::AccountId;
use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

const CHECKSUM_CONTEXT: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;
/// Prefixes of `16384` and above are reserved
const PREFIX_LIMIT: u16 = 1 << 14;

/// Network identifier of an SS58 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Ss58Prefix(u16);

impl Ss58Prefix {
    /// Addresses starting with `1`
    pub const POLKADOT: Ss58Prefix = Ss58Prefix(0);
    pub const KUSAMA: Ss58Prefix = Ss58Prefix(2);
    /// Generic Substrate, addresses starting with `5`
    pub const SUBSTRATE: Ss58Prefix = Ss58Prefix(42);

    pub fn value(self) -> u16 {
        self.0
    }

    /// Prefix for a chain by its display name, generic Substrate if unknown
    pub fn for_chain(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "polkadot" | "statemint" | "polkadot asset hub" => Ss58Prefix::POLKADOT,
            "kusama" | "statemine" | "kusama asset hub" => Ss58Prefix::KUSAMA,
            _ => Ss58Prefix::SUBSTRATE,
        }
    }

    /// One byte below 64, two bytes above
    fn write(self, out: &mut Vec<u8>) {
        let id = self.0;
        if id < 64 {
            out.push(id as u8);
        } else {
            out.push(0b0100_0000 | ((id & 0b1111_1100) >> 2) as u8);
            out.push((id >> 8) as u8 | ((id & 0b11) as u8) << 6);
        }
    }

    /// Prefix and its length in bytes
    fn read(bytes: &[u8]) -> Result<(Self, usize), SignerError> {
        match bytes {
            [first @ 0..=63, ..] => Ok((Ss58Prefix(u16::from(*first)), 1)),
            [first @ 64..=127, second, ..] => {
                let lower = ((first & 0b0011_1111) << 2) | (second >> 6);
                let upper = second & 0b0011_1111;
                Ok((Ss58Prefix(u16::from(upper) << 8 | u16::from(lower)), 2))
            }
            [first, ..] => Err(SignerError::InvalidAddress(format!(
                "Reserved prefix byte {}",
                first
            ))),
            [] => Err(SignerError::InvalidAddress("Empty address".to_string())),
        }
    }
}

impl Default for Ss58Prefix {
    fn default() -> Self {
        Ss58Prefix::POLKADOT
    }
}

impl TryFrom<u16> for Ss58Prefix {
    type Error = SignerError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value < PREFIX_LIMIT {
            Ok(Ss58Prefix(value))
        } else {
            Err(SignerError::InvalidAddress(format!(
                "SS58 prefix {} is reserved",
                value
            )))
        }
    }
}

impl From<Ss58Prefix> for u16 {
    fn from(prefix: Ss58Prefix) -> u16 {
        prefix.0
    }
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = Blake2b512::new()
        .chain_update(CHECKSUM_CONTEXT)
        .chain_update(body)
        .finalize();
    [hash[0], hash[1]]
}

/// SS58 address of `account` on the network identified by `prefix`
pub fn encode_ss58(account: &AccountId, prefix: Ss58Prefix) -> String {
    let mut body = Vec::with_capacity(2 + 32 + CHECKSUM_LEN);
    prefix.write(&mut body);
    body.extend_from_slice(account.as_bytes());
    let sum = checksum(&body);
    body.extend_from_slice(&sum);
    bs58::encode(body).into_string()
}

/// Account and network prefix of an SS58 address
pub fn decode_ss58(address: &str) -> Result<(AccountId, Ss58Prefix), SignerError> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| SignerError::InvalidAddress(format!("Invalid base58: {}", e)))?;
    let (prefix, prefix_len) = Ss58Prefix::read(&raw)?;

    let body_len = raw.len().saturating_sub(CHECKSUM_LEN);
    let key: [u8; 32] = raw
        .get(prefix_len..body_len)
        .and_then(|key| key.try_into().ok())
        .ok_or_else(|| {
            SignerError::InvalidAddress(format!("Address of {} bytes holds no account", raw.len()))
        })?;
    if raw[body_len..] != checksum(&raw[..body_len]) {
        return Err(SignerError::InvalidAddress("Invalid checksum".to_string()));
    }

    Ok((AccountId(key), prefix))
}
