//! Shared fixtures and in-memory collaborators for tests

use crate::basket::{BasketEntry, BasketEntryId};
use crate::call::{CallIndexResolver, KnownCallIndices, ProxyType};
use crate::chain::{BalanceService, BasketStorage, ChainClient, SubmissionReceipt};
use crate::error::{ChainError, SubmissionError};
use crate::types::{
    AccountId, AssetId, Balance, BlockRef, ChainId, DepositConstants, RuntimeVersion,
};
use crate::wallet::{Account, StaticWalletStore, Wallet, WalletKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const CHAIN: ChainId = ChainId([0x91; 32]);

pub const ALICE: AccountId = AccountId([0x01; 32]);
pub const BOB: AccountId = AccountId([0x02; 32]);
pub const CHARLIE: AccountId = AccountId([0x03; 32]);
pub const DAVE: AccountId = AccountId([0x04; 32]);
pub const MULTISIG: AccountId = AccountId([0x4d; 32]);
pub const NESTED_MULTISIG: AccountId = AccountId([0x4e; 32]);
pub const ORPHAN_MULTISIG: AccountId = AccountId([0x4f; 32]);
pub const PROXIED: AccountId = AccountId([0x50; 32]);
pub const PROXIED_MS: AccountId = AccountId([0x51; 32]);
pub const PROXY_OF_PROXY: AccountId = AccountId([0x52; 32]);

pub const VAULT: u32 = 1;
pub const MULTISHARD: u32 = 2;
pub const WATCH_ONLY: u32 = 3;
pub const MULTISIG_WALLET: u32 = 4;
pub const PROXIED_WALLET: u32 = 5;
pub const PROXIED_MULTISIG_WALLET: u32 = 6;
pub const PROXY_OF_PROXY_WALLET: u32 = 7;
pub const NESTED_MULTISIG_WALLET: u32 = 8;
pub const ORPHAN_MULTISIG_WALLET: u32 = 9;

fn wallet(id: u32, kind: WalletKind, accounts: &[AccountId]) -> Wallet {
    Wallet {
        id,
        name: format!("wallet {}", id),
        kind,
        accounts: accounts
            .iter()
            .map(|a| Account {
                account_id: *a,
                name: String::new(),
            })
            .collect(),
    }
}

/// Vault, multi-shard, watch-only, multisig and proxied wallets, plus the
/// unsupported nestings
pub fn fixture_store() -> StaticWalletStore {
    StaticWalletStore::new(vec![
        wallet(VAULT, WalletKind::PolkadotVault, &[ALICE]),
        wallet(MULTISHARD, WalletKind::MultiShard, &[BOB, CHARLIE]),
        wallet(WATCH_ONLY, WalletKind::WatchOnly, &[DAVE]),
        wallet(
            MULTISIG_WALLET,
            WalletKind::Multisig {
                threshold: 2,
                signatories: vec![DAVE, BOB, ALICE],
            },
            &[MULTISIG],
        ),
        wallet(
            PROXIED_WALLET,
            WalletKind::Proxied {
                proxied_account: PROXIED,
                proxy_account: ALICE,
                proxy_type: ProxyType::Any,
            },
            &[PROXIED],
        ),
        wallet(
            PROXIED_MULTISIG_WALLET,
            WalletKind::Proxied {
                proxied_account: PROXIED_MS,
                proxy_account: MULTISIG,
                proxy_type: ProxyType::Staking,
            },
            &[PROXIED_MS],
        ),
        wallet(
            PROXY_OF_PROXY_WALLET,
            WalletKind::Proxied {
                proxied_account: PROXY_OF_PROXY,
                proxy_account: PROXIED,
                proxy_type: ProxyType::Any,
            },
            &[PROXY_OF_PROXY],
        ),
        wallet(
            NESTED_MULTISIG_WALLET,
            WalletKind::Multisig {
                threshold: 2,
                signatories: vec![MULTISIG, DAVE],
            },
            &[NESTED_MULTISIG],
        ),
        wallet(
            ORPHAN_MULTISIG_WALLET,
            WalletKind::Multisig {
                threshold: 2,
                signatories: vec![AccountId([0xa1; 32]), AccountId([0xa2; 32])],
            },
            &[ORPHAN_MULTISIG],
        ),
    ])
}

pub fn indices() -> Arc<dyn CallIndexResolver + Send + Sync> {
    Arc::new(KnownCallIndices::polkadot())
}

pub const FEE: Balance = 15_000_000;
pub const DEPOSIT_BASE: Balance = 200_880_000_000;
pub const DEPOSIT_FACTOR: Balance = 320_000_000;

/// In-memory node
#[derive(Default)]
pub struct MockChainClient {
    pub block_number: Mutex<u64>,
    pub nonces: Mutex<BTreeMap<AccountId, u32>>,
    pub fee_by_len: Mutex<Option<fn(usize) -> Balance>>,
    pub fail_fees: Mutex<bool>,
    pub reject_submit: Mutex<Option<String>>,
    pub fee_queries: Mutex<usize>,
    pub submitted: Mutex<Vec<Vec<u8>>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        MockChainClient {
            block_number: Mutex::new(1000),
            ..Default::default()
        }
    }

    pub fn set_nonce(&self, account: AccountId, nonce: u32) {
        self.nonces.lock().unwrap().insert(account, nonce);
    }

    pub fn set_block(&self, number: u64) {
        *self.block_number.lock().unwrap() = number;
    }

    pub fn fail_fees(&self, fail: bool) {
        *self.fail_fees.lock().unwrap() = fail;
    }

    pub fn fee_queries(&self) -> usize {
        *self.fee_queries.lock().unwrap()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn genesis_hash(&self) -> Result<ChainId, ChainError> {
        Ok(CHAIN)
    }

    async fn latest_block(&self) -> Result<BlockRef, ChainError> {
        let number = *self.block_number.lock().unwrap();
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&number.to_le_bytes());
        Ok(BlockRef { hash, number })
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion, ChainError> {
        Ok(RuntimeVersion {
            spec_version: 1_002_000,
            tx_version: 26,
        })
    }

    async fn metadata(&self) -> Result<Arc<dyn CallIndexResolver + Send + Sync>, ChainError> {
        Ok(indices())
    }

    async fn next_nonce(&self, account: &AccountId) -> Result<u32, ChainError> {
        Ok(self
            .nonces
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0))
    }

    async fn query_fee(&self, extrinsic: &[u8]) -> Result<Balance, ChainError> {
        *self.fee_queries.lock().unwrap() += 1;
        if *self.fail_fees.lock().unwrap() {
            return Err(ChainError::Unreachable("node offline".to_string()));
        }
        Ok(match *self.fee_by_len.lock().unwrap() {
            Some(f) => f(extrinsic.len()),
            None => FEE,
        })
    }

    async fn multisig_deposit_constants(&self) -> Result<DepositConstants, ChainError> {
        Ok(DepositConstants {
            deposit_base: DEPOSIT_BASE,
            deposit_factor: DEPOSIT_FACTOR,
        })
    }

    async fn submit(&self, extrinsic: &[u8]) -> Result<SubmissionReceipt, SubmissionError> {
        if let Some(reason) = self.reject_submit.lock().unwrap().clone() {
            return Err(SubmissionError::Rejected(reason));
        }
        self.submitted.lock().unwrap().push(extrinsic.to_vec());
        Ok(SubmissionReceipt {
            extrinsic_hash: crate::call::blake2_256(extrinsic),
            block_hash: None,
        })
    }
}

/// Fixed transferable balances
#[derive(Default)]
pub struct MockBalances {
    pub balances: Mutex<BTreeMap<AccountId, Balance>>,
}

impl MockBalances {
    pub fn with(entries: &[(AccountId, Balance)]) -> Self {
        MockBalances {
            balances: Mutex::new(entries.iter().copied().collect()),
        }
    }

    pub fn set(&self, account: AccountId, balance: Balance) {
        self.balances.lock().unwrap().insert(account, balance);
    }
}

#[async_trait]
impl BalanceService for MockBalances {
    async fn transferable(
        &self,
        account: &AccountId,
        _chain: &ChainId,
        _asset: AssetId,
    ) -> Result<Balance, ChainError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0))
    }
}

/// Basket storage backed by a vector
#[derive(Default)]
pub struct MemoryBasketStorage {
    entries: Mutex<Vec<BasketEntry>>,
    next_id: Mutex<BasketEntryId>,
    held: AtomicBool,
}

impl MemoryBasketStorage {
    /// While held, inserts stay in flight instead of completing
    pub fn hold_inserts(&self, held: bool) {
        self.held.store(held, Ordering::SeqCst);
    }
}

#[async_trait]
impl BasketStorage for MemoryBasketStorage {
    async fn insert(&self, entries: Vec<BasketEntry>) -> Result<Vec<BasketEntryId>, ChainError> {
        while self.held.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let mut stored = self.entries.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut ids = Vec::with_capacity(entries.len());
        for mut entry in entries {
            *next_id += 1;
            entry.id = *next_id;
            ids.push(entry.id);
            stored.push(entry);
        }
        Ok(ids)
    }

    async fn update(&self, entry: BasketEntry) -> Result<(), ChainError> {
        let mut stored = self.entries.lock().unwrap();
        let slot = stored
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| ChainError::Storage(format!("no entry {}", entry.id)))?;
        *slot = entry;
        Ok(())
    }

    async fn remove(&self, id: BasketEntryId) -> Result<bool, ChainError> {
        let mut stored = self.entries.lock().unwrap();
        let before = stored.len();
        stored.retain(|e| e.id != id);
        Ok(stored.len() != before)
    }

    async fn all(&self) -> Result<Vec<BasketEntry>, ChainError> {
        Ok(self.entries.lock().unwrap().clone())
    }
}
