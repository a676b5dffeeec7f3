//! Operations built from user input
//!
//! The flow collects a [`TargetSelection`] and [`FormValues`] and turns them
//! into one [`Operation`] per selected shard.

use crate::call::{AccountVote, Call, Conviction, ProxyType, RewardDestination, Timepoint};
use crate::error::EncodeError;
use crate::types::{
    deserialize_hex, deserialize_u128, serialize_hex, serialize_u128, AccountId, Balance, ChainId,
};
use serde::{Deserialize, Serialize};

/// Kind of operation a flow builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Transfer,
    TransferAll,
    Bond,
    BondExtra,
    Unbond,
    Rebond,
    WithdrawUnbonded,
    Nominate,
    SetPayee,
    Vote,
    RemoveVote,
    Delegate,
    Undelegate,
    AddProxy,
    RemoveProxy,
    /// Add this signatory's approval to a pending multisig call
    ApproveMultisig,
    /// Cancel a pending multisig call this signatory initiated
    RejectMultisig,
}

impl OperationKind {
    /// Whether the target step must supply something other than [`Target::None`]
    pub fn needs_target(self) -> bool {
        !matches!(
            self,
            OperationKind::Bond
                | OperationKind::BondExtra
                | OperationKind::Unbond
                | OperationKind::Rebond
                | OperationKind::WithdrawUnbonded
                | OperationKind::SetPayee
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Transfer => "Transfer",
            OperationKind::TransferAll => "Transfer all",
            OperationKind::Bond => "Start staking",
            OperationKind::BondExtra => "Stake more",
            OperationKind::Unbond => "Unstake",
            OperationKind::Rebond => "Restake",
            OperationKind::WithdrawUnbonded => "Withdraw",
            OperationKind::Nominate => "Change validators",
            OperationKind::SetPayee => "Change rewards destination",
            OperationKind::Vote => "Vote",
            OperationKind::RemoveVote => "Remove vote",
            OperationKind::Delegate => "Delegate",
            OperationKind::Undelegate => "Undelegate",
            OperationKind::AddProxy => "Add proxy",
            OperationKind::RemoveProxy => "Remove proxy",
            OperationKind::ApproveMultisig => "Approve multisig transaction",
            OperationKind::RejectMultisig => "Reject multisig transaction",
        }
    }

    /// Whether the operation acts on a call already pending on chain
    pub fn acts_on_pending(self) -> bool {
        matches!(self, OperationKind::ApproveMultisig | OperationKind::RejectMultisig)
    }
}

/// A bare call from one origin, before any wrapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: OperationKind,
    pub chain_id: ChainId,
    pub origin: AccountId,
    pub call: Call,
    pub description: String,
    /// Set when approving or rejecting a call already pending on chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMultisig>,
}

/// On-chain state of a multisig call awaiting approvals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMultisig {
    /// Block and extrinsic of the first approval
    pub timepoint: Timepoint,
    /// Approvals already recorded
    pub approvals: u16,
}

/// What the operation acts on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Target {
    #[default]
    None,
    /// Transfer destination
    Account { account: AccountId },
    Validators { validators: Vec<AccountId> },
    Delegation { target: AccountId, tracks: Vec<u16> },
    Tracks { tracks: Vec<u16> },
    Referendum { index: u32, track: Option<u16> },
    #[serde(rename_all = "camelCase")]
    ProxyDelegate {
        delegate: AccountId,
        proxy_type: ProxyType,
    },
    /// A multisig call already on chain
    #[serde(rename_all = "camelCase")]
    PendingMultisig {
        #[serde(serialize_with = "serialize_hex", deserialize_with = "deserialize_hex")]
        call_data: Vec<u8>,
        timepoint: Timepoint,
        approvals: u16,
    },
}

/// Input of the target step: shards to act from and the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelection {
    pub shards: Vec<AccountId>,
    #[serde(default)]
    pub target: Target,
}

/// Input of the form step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormValues {
    #[serde(
        deserialize_with = "deserialize_u128",
        serialize_with = "serialize_u128"
    )]
    pub amount: Balance,
    pub keep_alive: bool,
    pub payee: RewardDestination,
    pub aye: bool,
    pub conviction: Conviction,
    pub num_slashing_spans: u32,
    /// Preferred multisig signatory
    pub signatory: Option<AccountId>,
    pub description: Option<String>,
}

impl Default for FormValues {
    fn default() -> Self {
        FormValues {
            amount: 0,
            keep_alive: true,
            payee: RewardDestination::Staked,
            aye: true,
            conviction: Conviction::None,
            num_slashing_spans: 0,
            signatory: None,
            description: None,
        }
    }
}

/// Check that `target` is the kind of target `kind` takes
pub fn check_target(kind: OperationKind, target: &Target) -> Result<(), EncodeError> {
    let ok = match (kind, target) {
        (OperationKind::Transfer | OperationKind::TransferAll, Target::Account { .. }) => true,
        (OperationKind::Bond, Target::None | Target::Validators { .. }) => true,
        (OperationKind::Nominate, Target::Validators { validators }) => !validators.is_empty(),
        (OperationKind::Vote | OperationKind::RemoveVote, Target::Referendum { .. }) => true,
        (OperationKind::Delegate, Target::Delegation { tracks, .. }) => !tracks.is_empty(),
        (OperationKind::Undelegate, Target::Tracks { tracks }) => !tracks.is_empty(),
        (OperationKind::AddProxy | OperationKind::RemoveProxy, Target::ProxyDelegate { .. }) => {
            true
        }
        (
            OperationKind::ApproveMultisig | OperationKind::RejectMultisig,
            Target::PendingMultisig { call_data, .. },
        ) => call_data.len() >= 2,
        (kind, Target::None) => !kind.needs_target(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(EncodeError::InvalidOperation(format!(
            "{} cannot act on {:?}",
            kind.label(),
            target
        )))
    }
}

/// Build one operation per selected shard
pub fn build_operations(
    kind: OperationKind,
    chain_id: ChainId,
    selection: &TargetSelection,
    form: &FormValues,
) -> Result<Vec<Operation>, EncodeError> {
    if selection.shards.is_empty() {
        return Err(EncodeError::InvalidOperation(
            "No shards selected".to_string(),
        ));
    }
    check_target(kind, &selection.target)?;

    let call = build_call(kind, &selection.target, form)?;
    let description = form
        .description
        .clone()
        .unwrap_or_else(|| kind.label().to_string());
    let pending = match &selection.target {
        Target::PendingMultisig {
            timepoint,
            approvals,
            ..
        } => Some(PendingMultisig {
            timepoint: *timepoint,
            approvals: *approvals,
        }),
        _ => None,
    };

    Ok(selection
        .shards
        .iter()
        .map(|shard| Operation {
            kind,
            chain_id,
            origin: *shard,
            call: call.clone(),
            description: description.clone(),
            pending,
        })
        .collect())
}

fn build_call(kind: OperationKind, target: &Target, form: &FormValues) -> Result<Call, EncodeError> {
    let call = match (kind, target) {
        (OperationKind::Transfer, Target::Account { account }) => {
            if form.amount == 0 {
                return Err(EncodeError::InvalidOperation(
                    "Amount must be positive".to_string(),
                ));
            }
            if form.keep_alive {
                Call::TransferKeepAlive {
                    dest: *account,
                    value: form.amount,
                }
            } else {
                Call::TransferAllowDeath {
                    dest: *account,
                    value: form.amount,
                }
            }
        }
        (OperationKind::TransferAll, Target::Account { account }) => Call::TransferAll {
            dest: *account,
            keep_alive: form.keep_alive,
        },
        (OperationKind::Bond, target) => {
            let bond = Call::Bond {
                value: form.amount,
                payee: form.payee,
            };
            match target {
                Target::Validators { validators } if !validators.is_empty() => Call::Batch {
                    calls: vec![
                        bond,
                        Call::Nominate {
                            targets: validators.clone(),
                        },
                    ],
                    atomic: true,
                },
                _ => bond,
            }
        }
        (OperationKind::BondExtra, _) => Call::BondExtra {
            max_additional: form.amount,
        },
        (OperationKind::Unbond, _) => Call::Unbond { value: form.amount },
        (OperationKind::Rebond, _) => Call::Rebond { value: form.amount },
        (OperationKind::WithdrawUnbonded, _) => Call::WithdrawUnbonded {
            num_slashing_spans: form.num_slashing_spans,
        },
        (OperationKind::Nominate, Target::Validators { validators }) => Call::Nominate {
            targets: validators.clone(),
        },
        (OperationKind::SetPayee, _) => Call::SetPayee { payee: form.payee },
        (OperationKind::Vote, Target::Referendum { index, .. }) => Call::Vote {
            poll_index: *index,
            vote: AccountVote::Standard {
                aye: form.aye,
                conviction: form.conviction,
                balance: form.amount,
            },
        },
        (OperationKind::RemoveVote, Target::Referendum { index, track }) => Call::RemoveVote {
            class: *track,
            index: *index,
        },
        (OperationKind::Delegate, Target::Delegation { target, tracks }) => {
            per_track(tracks, |class| Call::Delegate {
                class,
                to: *target,
                conviction: form.conviction,
                balance: form.amount,
            })
        }
        (OperationKind::Undelegate, Target::Tracks { tracks }) => {
            per_track(tracks, |class| Call::Undelegate { class })
        }
        (
            OperationKind::AddProxy,
            Target::ProxyDelegate {
                delegate,
                proxy_type,
            },
        ) => Call::AddProxy {
            delegate: *delegate,
            proxy_type: *proxy_type,
            delay: 0,
        },
        (
            OperationKind::RemoveProxy,
            Target::ProxyDelegate {
                delegate,
                proxy_type,
            },
        ) => Call::RemoveProxy {
            delegate: *delegate,
            proxy_type: *proxy_type,
            delay: 0,
        },
        (
            OperationKind::ApproveMultisig | OperationKind::RejectMultisig,
            Target::PendingMultisig { call_data, .. },
        ) => Call::Encoded {
            call_data: call_data.clone(),
        },
        (kind, target) => {
            return Err(EncodeError::InvalidOperation(format!(
                "{} cannot act on {:?}",
                kind.label(),
                target
            )))
        }
    };
    Ok(call)
}

/// One call per governance track, batched atomically when more than one
fn per_track(tracks: &[u16], make: impl Fn(u16) -> Call) -> Call {
    match tracks {
        [single] => make(*single),
        _ => Call::Batch {
            calls: tracks.iter().map(|t| make(*t)).collect(),
            atomic: true,
        },
    }
}
