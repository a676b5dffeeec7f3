//! Which operations a wallet may start
//!
//! Watch-only wallets can do nothing. Proxied wallets are limited by the
//! proxy type their delegate holds.

use crate::call::ProxyType;
use crate::operation::OperationKind;
use crate::wallet::Wallet;

pub fn can_transfer(wallet: &Wallet) -> bool {
    proxy_allows(wallet, &[ProxyType::Any])
}

pub fn can_stake(wallet: &Wallet) -> bool {
    proxy_allows(
        wallet,
        &[ProxyType::Any, ProxyType::NonTransfer, ProxyType::Staking],
    )
}

pub fn can_vote(wallet: &Wallet) -> bool {
    can_use_governance(wallet)
}

pub fn can_delegate(wallet: &Wallet) -> bool {
    can_use_governance(wallet)
}

pub fn can_create_any_proxy(wallet: &Wallet) -> bool {
    proxy_allows(wallet, &[ProxyType::Any])
}

pub fn can_create_non_any_proxy(wallet: &Wallet) -> bool {
    proxy_allows(wallet, &[ProxyType::Any, ProxyType::NonTransfer])
}

pub fn can_remove_proxy(wallet: &Wallet) -> bool {
    proxy_allows(wallet, &[ProxyType::Any, ProxyType::NonTransfer])
}

/// Whether the wallet can initiate a multisig call as a signatory
pub fn can_create_multisig_tx(wallet: &Wallet) -> bool {
    if wallet.is_multisig() {
        return false;
    }
    proxy_allows(wallet, &[ProxyType::Any, ProxyType::NonTransfer])
}

/// Whether the wallet can approve or reject a call pending on its multisig
pub fn can_approve_multisig_tx(wallet: &Wallet) -> bool {
    wallet.is_multisig()
}

/// Permission gate for starting a flow of `kind`
pub fn permits(kind: OperationKind, wallet: &Wallet) -> bool {
    match kind {
        OperationKind::Transfer | OperationKind::TransferAll => can_transfer(wallet),
        OperationKind::Bond
        | OperationKind::BondExtra
        | OperationKind::Unbond
        | OperationKind::Rebond
        | OperationKind::WithdrawUnbonded
        | OperationKind::Nominate
        | OperationKind::SetPayee => can_stake(wallet),
        OperationKind::Vote | OperationKind::RemoveVote => can_vote(wallet),
        OperationKind::Delegate | OperationKind::Undelegate => can_delegate(wallet),
        // Any-proxy creation is checked again once the proxy type is known
        OperationKind::AddProxy => can_create_non_any_proxy(wallet),
        OperationKind::RemoveProxy => can_remove_proxy(wallet),
        OperationKind::ApproveMultisig | OperationKind::RejectMultisig => {
            can_approve_multisig_tx(wallet)
        }
    }
}

/// Permission gate for adding a proxy of a given type
pub fn permits_add_proxy(proxy_type: ProxyType, wallet: &Wallet) -> bool {
    match proxy_type {
        ProxyType::Any => can_create_any_proxy(wallet),
        _ => can_create_non_any_proxy(wallet),
    }
}

fn can_use_governance(wallet: &Wallet) -> bool {
    proxy_allows(
        wallet,
        &[ProxyType::Any, ProxyType::Governance, ProxyType::NonTransfer],
    )
}

fn proxy_allows(wallet: &Wallet, allowed: &[ProxyType]) -> bool {
    if wallet.is_watch_only() {
        return false;
    }
    match wallet.proxy_type() {
        Some(proxy_type) => allowed.contains(&proxy_type),
        None => true,
    }
}
