//! Balance checks before confirmation
//!
//! The signer of the outermost call pays the fee and, while a multisig call
//! is short of its threshold, reserves the deposit. The origin only needs to
//! cover the amount the call moves.

use crate::error::ValidationError;
use crate::types::{AccountId, Balance};
use crate::wrapper::WrappedTransaction;
use std::collections::BTreeMap;

/// Transferable balances relevant to one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardBalances {
    pub origin: Balance,
    /// Fee payer, when it differs from the origin
    pub payer: Option<Balance>,
}

pub fn validate_shard(
    balances: ShardBalances,
    amount: Balance,
    fee: Balance,
    deposit: Balance,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match balances.payer {
        None => {
            let available = balances.origin;
            let with_fee = amount.saturating_add(fee);
            let with_deposit = with_fee.saturating_add(deposit);
            if available < amount {
                errors.push(ValidationError::InsufficientBalance {
                    required: amount,
                    available,
                });
            } else if available < with_fee {
                errors.push(ValidationError::InsufficientBalanceForFee {
                    required: with_fee,
                    available,
                });
            } else if available < with_deposit {
                errors.push(ValidationError::InsufficientBalanceForDeposit {
                    required: with_deposit,
                    available,
                });
            }
        }
        Some(payer) => {
            if balances.origin < amount {
                errors.push(ValidationError::InsufficientBalance {
                    required: amount,
                    available: balances.origin,
                });
            }
            let with_deposit = fee.saturating_add(deposit);
            if payer < fee {
                errors.push(ValidationError::InsufficientBalanceForFee {
                    required: fee,
                    available: payer,
                });
            } else if payer < with_deposit {
                errors.push(ValidationError::InsufficientBalanceForDeposit {
                    required: with_deposit,
                    available: payer,
                });
            }
        }
    }

    errors
}

/// Validate one wrapped transaction against a balance map
///
/// Accounts missing from `balances` count as empty.
pub fn validate_transaction(
    tx: &WrappedTransaction,
    balances: &BTreeMap<AccountId, Balance>,
    fee: Balance,
    deposit: Balance,
) -> Vec<ValidationError> {
    let balance_of = |account: &AccountId| balances.get(account).copied().unwrap_or(0);
    let origin = tx.core.origin;
    let shard = ShardBalances {
        origin: balance_of(&origin),
        payer: (tx.signer != origin).then(|| balance_of(&tx.signer)),
    };
    let deposit = match &tx.multisig {
        Some(envelope) if envelope.deposit_required => deposit,
        _ => 0,
    };
    validate_shard(shard, tx.core.call.spent_amount(), fee, deposit)
}
