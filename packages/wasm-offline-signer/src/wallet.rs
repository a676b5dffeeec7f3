//! Wallets and accounts as seen by the signing pipeline
//!
//! Storage lives outside this crate. The pipeline only needs to look wallets
//! up and ask what kind they are, which is what [`WalletStore`] provides.

use crate::call::ProxyType;
use crate::types::{AccountId, WalletId};
use serde::{Deserialize, Serialize};

/// An account held by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: AccountId,
    #[serde(default)]
    pub name: String,
}

/// How a wallet signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WalletKind {
    /// Polkadot Vault with dynamic derivations
    PolkadotVault,
    /// Legacy multi-shard Parity Signer
    MultiShard,
    SingleParitySigner,
    WatchOnly,
    /// Account is the multisig address derived from the signatories
    #[serde(rename_all = "camelCase")]
    Multisig {
        threshold: u16,
        signatories: Vec<AccountId>,
    },
    /// Account is the proxied account, controlled by `proxy_account`
    #[serde(rename_all = "camelCase")]
    Proxied {
        proxied_account: AccountId,
        proxy_account: AccountId,
        proxy_type: ProxyType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: WalletId,
    pub name: String,
    pub kind: WalletKind,
    pub accounts: Vec<Account>,
}

impl Wallet {
    pub fn is_watch_only(&self) -> bool {
        matches!(self.kind, WalletKind::WatchOnly)
    }

    pub fn is_multisig(&self) -> bool {
        matches!(self.kind, WalletKind::Multisig { .. })
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self.kind, WalletKind::Proxied { .. })
    }

    /// Whether the wallet holds keys on an air-gapped signer
    pub fn is_signable(&self) -> bool {
        matches!(
            self.kind,
            WalletKind::PolkadotVault | WalletKind::MultiShard | WalletKind::SingleParitySigner
        )
    }

    pub fn holds(&self, account: &AccountId) -> bool {
        self.accounts.iter().any(|a| &a.account_id == account)
    }

    /// Proxy type of a proxied wallet
    pub fn proxy_type(&self) -> Option<ProxyType> {
        match &self.kind {
            WalletKind::Proxied { proxy_type, .. } => Some(*proxy_type),
            _ => None,
        }
    }
}

/// Read access to the wallet store
pub trait WalletStore {
    fn wallets(&self) -> &[Wallet];

    fn wallet(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets().iter().find(|w| w.id == id)
    }

    /// First wallet holding `account`
    fn wallet_by_account(&self, account: &AccountId) -> Option<&Wallet> {
        self.wallets().iter().find(|w| w.holds(account))
    }

    /// Multisig wallet whose multisig address is `account`
    fn multisig_wallet(&self, account: &AccountId) -> Option<&Wallet> {
        self.wallets()
            .iter()
            .find(|w| w.is_multisig() && w.holds(account))
    }

    /// Signable wallet holding the key for `account`
    fn signing_wallet(&self, account: &AccountId) -> Option<&Wallet> {
        self.wallets()
            .iter()
            .find(|w| w.is_signable() && w.holds(account))
    }

    /// Proxied wallet whose proxied account is `account`
    fn proxied_wallet(&self, account: &AccountId) -> Option<&Wallet> {
        self.wallets().iter().find(|w| {
            matches!(&w.kind, WalletKind::Proxied { proxied_account, .. } if proxied_account == account)
        })
    }

    fn is_watch_only(&self, id: WalletId) -> bool {
        self.wallet(id).is_some_and(Wallet::is_watch_only)
    }

    fn is_multisig(&self, id: WalletId) -> bool {
        self.wallet(id).is_some_and(Wallet::is_multisig)
    }

    fn is_proxied(&self, id: WalletId) -> bool {
        self.wallet(id).is_some_and(Wallet::is_proxied)
    }
}

/// In-memory wallet store, loaded once from the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticWalletStore {
    wallets: Vec<Wallet>,
}

impl StaticWalletStore {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        StaticWalletStore { wallets }
    }

    pub fn insert(&mut self, wallet: Wallet) {
        self.wallets.retain(|w| w.id != wallet.id);
        self.wallets.push(wallet);
    }

    pub fn remove(&mut self, id: WalletId) -> Option<Wallet> {
        let pos = self.wallets.iter().position(|w| w.id == id)?;
        Some(self.wallets.remove(pos))
    }
}

impl WalletStore for StaticWalletStore {
    fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }
}
