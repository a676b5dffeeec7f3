use super::{MultisigWrapper, ProxyWrapper, WrapperChain};
use crate::error::CompositionError;
use crate::permission::can_create_multisig_tx;
use crate::types::AccountId;
use crate::wallet::{Wallet, WalletKind, WalletStore};

/// Work out the wrappers an operation from `origin` in `wallet` needs
///
/// `signatory_hint` picks the multisig member that initiates; it is used when
/// it is a signable member, otherwise the first signable member in the
/// wallet's signatory order is taken.
pub fn resolve_wrappers<S: WalletStore + ?Sized>(
    store: &S,
    wallet: &Wallet,
    origin: AccountId,
    signatory_hint: Option<AccountId>,
) -> Result<WrapperChain, CompositionError> {
    if wallet.is_watch_only() {
        return Err(CompositionError::UnresolvableSignatory);
    }
    if !wallet.holds(&origin) {
        return Err(CompositionError::OriginMismatch);
    }

    let mut builder = WrapperChain::builder();
    let mut outer = origin;

    if let WalletKind::Proxied {
        proxied_account,
        proxy_account,
        proxy_type,
    } = &wallet.kind
    {
        if *proxied_account != origin {
            return Err(CompositionError::OriginMismatch);
        }
        builder = builder.proxy(ProxyWrapper {
            proxied: *proxied_account,
            delegate: *proxy_account,
            proxy_type: *proxy_type,
        })?;
        outer = *proxy_account;
    }

    let multisig_wallet = if wallet.is_multisig() {
        Some(wallet)
    } else {
        store.multisig_wallet(&outer)
    };

    match multisig_wallet.map(|w| &w.kind) {
        Some(WalletKind::Multisig {
            threshold,
            signatories,
        }) => {
            let signatory = pick_signatory(store, signatories, signatory_hint)?;
            builder = builder.multisig(MultisigWrapper {
                account: outer,
                threshold: *threshold,
                signatories: signatories.clone(),
                signatory,
            })?;
        }
        _ => {
            if store.signing_wallet(&outer).is_none() && !wallet_signs(wallet, &outer) {
                if store.proxied_wallet(&outer).is_some() {
                    return Err(CompositionError::ProxyOfProxy);
                }
                return Err(CompositionError::UnresolvableSignatory);
            }
        }
    }

    builder.build()
}

fn wallet_signs(wallet: &Wallet, account: &AccountId) -> bool {
    wallet.is_signable() && wallet.holds(account)
}

fn pick_signatory<S: WalletStore + ?Sized>(
    store: &S,
    signatories: &[AccountId],
    hint: Option<AccountId>,
) -> Result<AccountId, CompositionError> {
    let signable = |account: &AccountId| {
        store
            .signing_wallet(account)
            .is_some_and(can_create_multisig_tx)
    };

    if let Some(hint) = hint.filter(|h| signatories.contains(h) && signable(h)) {
        return Ok(hint);
    }
    if let Some(first) = signatories.iter().find(|s| signable(s)) {
        return Ok(*first);
    }
    if signatories
        .iter()
        .any(|s| store.multisig_wallet(s).is_some())
    {
        return Err(CompositionError::MultisigOfMultisig);
    }
    Err(CompositionError::UnresolvableSignatory)
}
