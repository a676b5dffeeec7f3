//! Runtime call encoding
//!
//! A closed set of the calls the wallet builds, wraps and signs. Encoding is
//! plain SCALE with indices looked up through a [`CallIndexResolver`], so the
//! same `Call` value produces byte-identical call data every time.

pub mod args;
pub mod indices;

use crate::error::EncodeError;
use crate::types::{deserialize_hex, serialize_hex, AccountId, Balance, Weight};
use blake2::{digest::consts::U32, Blake2b, Digest};
use parity_scale_codec::{Compact, Encode};
use serde::{Deserialize, Serialize};

pub use args::{AccountVote, Conviction, ProxyType, RewardDestination, Timepoint};
pub use indices::{metadata_from_bytes, CallIndexResolver, KnownCallIndices};

/// A runtime call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum Call {
    TransferAllowDeath {
        dest: AccountId,
        value: Balance,
    },
    TransferKeepAlive {
        dest: AccountId,
        value: Balance,
    },
    TransferAll {
        dest: AccountId,
        keep_alive: bool,
    },
    Bond {
        value: Balance,
        payee: RewardDestination,
    },
    BondExtra {
        max_additional: Balance,
    },
    Unbond {
        value: Balance,
    },
    Rebond {
        value: Balance,
    },
    WithdrawUnbonded {
        num_slashing_spans: u32,
    },
    Nominate {
        targets: Vec<AccountId>,
    },
    Chill,
    SetPayee {
        payee: RewardDestination,
    },
    Vote {
        poll_index: u32,
        vote: AccountVote,
    },
    RemoveVote {
        class: Option<u16>,
        index: u32,
    },
    Delegate {
        class: u16,
        to: AccountId,
        conviction: Conviction,
        balance: Balance,
    },
    Undelegate {
        class: u16,
    },
    AddProxy {
        delegate: AccountId,
        proxy_type: ProxyType,
        delay: u32,
    },
    RemoveProxy {
        delegate: AccountId,
        proxy_type: ProxyType,
        delay: u32,
    },
    Proxy {
        real: AccountId,
        force_proxy_type: Option<ProxyType>,
        call: Box<Call>,
    },
    AsMulti {
        threshold: u16,
        other_signatories: Vec<AccountId>,
        maybe_timepoint: Option<Timepoint>,
        call: Box<Call>,
        max_weight: Weight,
    },
    ApproveAsMulti {
        threshold: u16,
        other_signatories: Vec<AccountId>,
        maybe_timepoint: Option<Timepoint>,
        call_hash: [u8; 32],
        max_weight: Weight,
    },
    CancelAsMulti {
        threshold: u16,
        other_signatories: Vec<AccountId>,
        timepoint: Timepoint,
        call_hash: [u8; 32],
    },
    Batch {
        calls: Vec<Call>,
        atomic: bool,
    },
    /// Call data taken from chain as-is, e.g. a pending multisig call
    #[serde(rename_all = "camelCase")]
    Encoded {
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        call_data: Vec<u8>,
    },
}

impl Call {
    /// Runtime pallet and method name; `None` for already encoded calls
    pub fn method(&self) -> Option<(&'static str, &'static str)> {
        let method = match self {
            Call::TransferAllowDeath { .. } => ("Balances", "transfer_allow_death"),
            Call::TransferKeepAlive { .. } => ("Balances", "transfer_keep_alive"),
            Call::TransferAll { .. } => ("Balances", "transfer_all"),
            Call::Bond { .. } => ("Staking", "bond"),
            Call::BondExtra { .. } => ("Staking", "bond_extra"),
            Call::Unbond { .. } => ("Staking", "unbond"),
            Call::Rebond { .. } => ("Staking", "rebond"),
            Call::WithdrawUnbonded { .. } => ("Staking", "withdraw_unbonded"),
            Call::Nominate { .. } => ("Staking", "nominate"),
            Call::Chill => ("Staking", "chill"),
            Call::SetPayee { .. } => ("Staking", "set_payee"),
            Call::Vote { .. } => ("ConvictionVoting", "vote"),
            Call::RemoveVote { .. } => ("ConvictionVoting", "remove_vote"),
            Call::Delegate { .. } => ("ConvictionVoting", "delegate"),
            Call::Undelegate { .. } => ("ConvictionVoting", "undelegate"),
            Call::AddProxy { .. } => ("Proxy", "add_proxy"),
            Call::RemoveProxy { .. } => ("Proxy", "remove_proxy"),
            Call::Proxy { .. } => ("Proxy", "proxy"),
            Call::AsMulti { .. } => ("Multisig", "as_multi"),
            Call::ApproveAsMulti { .. } => ("Multisig", "approve_as_multi"),
            Call::CancelAsMulti { .. } => ("Multisig", "cancel_as_multi"),
            Call::Batch { atomic: true, .. } => ("Utility", "batch_all"),
            Call::Batch { atomic: false, .. } => ("Utility", "batch"),
            Call::Encoded { .. } => return None,
        };
        Some(method)
    }

    /// Amount moved out of the origin's transferable balance, if any
    pub fn spent_amount(&self) -> Balance {
        match self {
            Call::TransferAllowDeath { value, .. } | Call::TransferKeepAlive { value, .. } => {
                *value
            }
            Call::Bond { value, .. } => *value,
            Call::BondExtra { max_additional } => *max_additional,
            Call::Batch { calls, .. } => calls.iter().map(Call::spent_amount).sum(),
            Call::Proxy { call, .. } | Call::AsMulti { call, .. } => call.spent_amount(),
            _ => 0,
        }
    }

    /// SCALE-encode to call data: `[pallet][method][args...]`
    pub fn encode<R: CallIndexResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Result<Vec<u8>, EncodeError> {
        let Some((pallet, method)) = self.method() else {
            return match self {
                Call::Encoded { call_data } if call_data.len() >= 2 => Ok(call_data.clone()),
                _ => Err(EncodeError::InvalidOperation(
                    "Call data is shorter than its index".to_string(),
                )),
            };
        };
        let (pallet_idx, call_idx) = resolver.call_index(pallet, method)?;
        let mut out = vec![pallet_idx, call_idx];

        match self {
            Call::TransferAllowDeath { dest, value } | Call::TransferKeepAlive { dest, value } => {
                multi_address(dest, &mut out);
                Compact(*value).encode_to(&mut out);
            }
            Call::TransferAll { dest, keep_alive } => {
                multi_address(dest, &mut out);
                keep_alive.encode_to(&mut out);
            }
            Call::Bond { value, payee } => {
                Compact(*value).encode_to(&mut out);
                payee.encode_to(&mut out);
            }
            Call::BondExtra {
                max_additional: value,
            }
            | Call::Unbond { value }
            | Call::Rebond { value } => {
                Compact(*value).encode_to(&mut out);
            }
            Call::WithdrawUnbonded { num_slashing_spans } => {
                num_slashing_spans.encode_to(&mut out);
            }
            Call::Nominate { targets } => {
                Compact(targets.len() as u32).encode_to(&mut out);
                for target in targets {
                    multi_address(target, &mut out);
                }
            }
            Call::Chill => {}
            Call::SetPayee { payee } => payee.encode_to(&mut out),
            Call::Vote { poll_index, vote } => {
                Compact(*poll_index).encode_to(&mut out);
                vote.encode_to(&mut out);
            }
            Call::RemoveVote { class, index } => {
                class.encode_to(&mut out);
                index.encode_to(&mut out);
            }
            Call::Delegate {
                class,
                to,
                conviction,
                balance,
            } => {
                class.encode_to(&mut out);
                multi_address(to, &mut out);
                conviction.encode_to(&mut out);
                balance.encode_to(&mut out);
            }
            Call::Undelegate { class } => class.encode_to(&mut out),
            Call::AddProxy {
                delegate,
                proxy_type,
                delay,
            }
            | Call::RemoveProxy {
                delegate,
                proxy_type,
                delay,
            } => {
                multi_address(delegate, &mut out);
                proxy_type.encode_to(&mut out);
                delay.encode_to(&mut out);
            }
            Call::Proxy {
                real,
                force_proxy_type,
                call,
            } => {
                multi_address(real, &mut out);
                force_proxy_type.encode_to(&mut out);
                out.extend(call.encode(resolver)?);
            }
            Call::AsMulti {
                threshold,
                other_signatories,
                maybe_timepoint,
                call,
                max_weight,
            } => {
                threshold.encode_to(&mut out);
                other_signatories.encode_to(&mut out);
                maybe_timepoint.encode_to(&mut out);
                out.extend(call.encode(resolver)?);
                max_weight.encode_to(&mut out);
            }
            Call::ApproveAsMulti {
                threshold,
                other_signatories,
                maybe_timepoint,
                call_hash,
                max_weight,
            } => {
                threshold.encode_to(&mut out);
                other_signatories.encode_to(&mut out);
                maybe_timepoint.encode_to(&mut out);
                call_hash.encode_to(&mut out);
                max_weight.encode_to(&mut out);
            }
            Call::CancelAsMulti {
                threshold,
                other_signatories,
                timepoint,
                call_hash,
            } => {
                threshold.encode_to(&mut out);
                other_signatories.encode_to(&mut out);
                timepoint.encode_to(&mut out);
                call_hash.encode_to(&mut out);
            }
            Call::Batch { calls, .. } => {
                if calls.is_empty() {
                    return Err(EncodeError::EmptyBatch);
                }
                if calls.iter().any(|c| matches!(c, Call::Batch { .. })) {
                    return Err(EncodeError::NestedBatch);
                }
                Compact(calls.len() as u32).encode_to(&mut out);
                for call in calls {
                    out.extend(call.encode(resolver)?);
                }
            }
            Call::Encoded { .. } => {}
        }

        Ok(out)
    }
}

/// MultiAddress::Id
fn multi_address(account: &AccountId, out: &mut Vec<u8>) {
    out.push(0x00);
    out.extend_from_slice(account.as_bytes());
}

/// Multisig call hash (Blake2-256 of the call data)
pub fn call_hash(call_data: &[u8]) -> [u8; 32] {
    blake2_256(call_data)
}

/// Blake2-256 hash
pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}
