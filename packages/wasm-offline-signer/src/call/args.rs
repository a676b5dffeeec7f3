//! Argument types shared by runtime calls

use crate::types::Balance;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Proxy permission type (Polkadot relay chain variant order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProxyType {
    Any,
    NonTransfer,
    Governance,
    Staking,
    CancelProxy,
    Auction,
    NominationPools,
}

impl ProxyType {
    /// Variant index in the runtime's `ProxyType` enum
    pub fn index(self) -> u8 {
        match self {
            ProxyType::Any => 0,
            ProxyType::NonTransfer => 1,
            ProxyType::Governance => 2,
            ProxyType::Staking => 3,
            // 4 is the retired IdentityJudgement slot
            ProxyType::CancelProxy => 5,
            ProxyType::Auction => 6,
            ProxyType::NominationPools => 7,
        }
    }
}

impl Encode for ProxyType {
    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        dest.push_byte(self.index());
    }
}

/// Vote lock multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub enum Conviction {
    #[default]
    None,
    Locked1x,
    Locked2x,
    Locked3x,
    Locked4x,
    Locked5x,
    Locked6x,
}

/// Referendum vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AccountVote {
    Standard {
        aye: bool,
        conviction: Conviction,
        balance: Balance,
    },
    Split {
        aye: Balance,
        nay: Balance,
    },
    SplitAbstain {
        aye: Balance,
        nay: Balance,
        abstain: Balance,
    },
}

impl Encode for AccountVote {
    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        match self {
            AccountVote::Standard {
                aye,
                conviction,
                balance,
            } => {
                dest.push_byte(0);
                let vote = (*conviction as u8) | if *aye { 0x80 } else { 0 };
                dest.push_byte(vote);
                balance.encode_to(dest);
            }
            AccountVote::Split { aye, nay } => {
                dest.push_byte(1);
                aye.encode_to(dest);
                nay.encode_to(dest);
            }
            AccountVote::SplitAbstain { aye, nay, abstain } => {
                dest.push_byte(2);
                aye.encode_to(dest);
                nay.encode_to(dest);
                abstain.encode_to(dest);
            }
        }
    }
}

/// Staking reward destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RewardDestination {
    /// Compound rewards (re-stake)
    #[default]
    Staked,
    /// Send to stash account
    Stash,
    /// Send to controller account
    Controller,
    /// Send to specific account
    Account { address: crate::types::AccountId },
    /// Do not pay out rewards
    None,
}

impl Encode for RewardDestination {
    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        match self {
            RewardDestination::Staked => dest.push_byte(0),
            RewardDestination::Stash => dest.push_byte(1),
            RewardDestination::Controller => dest.push_byte(2),
            RewardDestination::Account { address } => {
                dest.push_byte(3);
                address.encode_to(dest);
            }
            RewardDestination::None => dest.push_byte(4),
        }
    }
}

/// Block height and extrinsic index of the first multisig approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Timepoint {
    pub height: u32,
    pub index: u32,
}
