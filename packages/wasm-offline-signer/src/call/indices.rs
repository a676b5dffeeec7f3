//! Pallet/call index resolution
//!
//! Live chains resolve indices from runtime metadata through subxt; tests and
//! offline tooling use a fixed table.

use crate::error::EncodeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use subxt_core::metadata::Metadata;

/// Resolves `(pallet, method)` names to their on-chain `(pallet_index, call_index)`
pub trait CallIndexResolver {
    fn call_index(&self, pallet: &str, method: &str) -> Result<(u8, u8), EncodeError>;
}

impl CallIndexResolver for Metadata {
    fn call_index(&self, pallet: &str, method: &str) -> Result<(u8, u8), EncodeError> {
        let p = self
            .pallet_by_name(pallet)
            .ok_or_else(|| EncodeError::UnknownPallet(pallet.to_string()))?;
        let c = p
            .call_variant_by_name(method)
            .ok_or_else(|| EncodeError::UnknownCall(pallet.to_string(), method.to_string()))?;
        Ok((p.index(), c.index))
    }
}

/// Decode SCALE runtime metadata (as returned by `state_getMetadata`)
pub fn metadata_from_bytes(bytes: &[u8]) -> Result<Metadata, EncodeError> {
    subxt_core::metadata::decode_from(bytes)
        .map_err(|e| EncodeError::InvalidMetadata(e.to_string()))
}

/// Fixed index table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownCallIndices {
    #[serde(flatten)]
    pallets: BTreeMap<String, KnownPallet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KnownPallet {
    index: u8,
    calls: BTreeMap<String, u8>,
}

impl KnownCallIndices {
    /// Polkadot relay chain indices
    pub fn polkadot() -> Self {
        let table: [(&str, u8, &[(&str, u8)]); 6] = [
            (
                "Balances",
                5,
                &[
                    ("transfer_allow_death", 0),
                    ("transfer_keep_alive", 3),
                    ("transfer_all", 4),
                ],
            ),
            (
                "Staking",
                7,
                &[
                    ("bond", 0),
                    ("bond_extra", 1),
                    ("unbond", 2),
                    ("withdraw_unbonded", 3),
                    ("nominate", 5),
                    ("chill", 6),
                    ("set_payee", 7),
                    ("rebond", 19),
                ],
            ),
            (
                "ConvictionVoting",
                20,
                &[
                    ("vote", 0),
                    ("delegate", 1),
                    ("undelegate", 2),
                    ("remove_vote", 4),
                ],
            ),
            ("Utility", 26, &[("batch", 0), ("batch_all", 2)]),
            (
                "Proxy",
                29,
                &[("proxy", 0), ("add_proxy", 1), ("remove_proxy", 2)],
            ),
            (
                "Multisig",
                30,
                &[
                    ("as_multi_threshold_1", 0),
                    ("as_multi", 1),
                    ("approve_as_multi", 2),
                    ("cancel_as_multi", 3),
                ],
            ),
        ];

        let pallets = table
            .into_iter()
            .map(|(name, index, calls)| {
                let calls = calls.iter().map(|(c, i)| (c.to_string(), *i)).collect();
                (name.to_string(), KnownPallet { index, calls })
            })
            .collect();
        KnownCallIndices { pallets }
    }
}

impl CallIndexResolver for KnownCallIndices {
    fn call_index(&self, pallet: &str, method: &str) -> Result<(u8, u8), EncodeError> {
        let p = self
            .pallets
            .get(pallet)
            .ok_or_else(|| EncodeError::UnknownPallet(pallet.to_string()))?;
        let c = p
            .calls
            .get(method)
            .ok_or_else(|| EncodeError::UnknownCall(pallet.to_string(), method.to_string()))?;
        Ok((p.index, *c))
    }
}

impl<R: CallIndexResolver + ?Sized> CallIndexResolver for std::sync::Arc<R> {
    fn call_index(&self, pallet: &str, method: &str) -> Result<(u8, u8), EncodeError> {
        (**self).call_index(pallet, method)
    }
}
