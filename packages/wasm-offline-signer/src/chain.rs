//! Collaborators provided by the host
//!
//! Node RPC, balance subscriptions and basket persistence live outside this
//! crate. These traits are what the flow driver and the basket queue call.

use crate::basket::{BasketEntry, BasketEntryId};
use crate::call::CallIndexResolver;
use crate::error::{ChainError, SubmissionError};
use crate::types::{
    AccountId, AssetId, Balance, BlockRef, ChainContext, ChainId, ChainSnapshot, DepositConstants,
    RuntimeVersion,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Node acknowledgement of a submitted extrinsic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub extrinsic_hash: [u8; 32],
    pub block_hash: Option<[u8; 32]>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn genesis_hash(&self) -> Result<ChainId, ChainError>;

    async fn latest_block(&self) -> Result<BlockRef, ChainError>;

    async fn runtime_version(&self) -> Result<RuntimeVersion, ChainError>;

    /// Call indices of the current runtime
    async fn metadata(&self) -> Result<Arc<dyn CallIndexResolver + Send + Sync>, ChainError>;

    async fn next_nonce(&self, account: &AccountId) -> Result<u32, ChainError>;

    /// Partial fee of a (dummy-signed) extrinsic
    async fn query_fee(&self, extrinsic: &[u8]) -> Result<Balance, ChainError>;

    async fn multisig_deposit_constants(&self) -> Result<DepositConstants, ChainError>;

    async fn submit(&self, extrinsic: &[u8]) -> Result<SubmissionReceipt, SubmissionError>;
}

#[async_trait]
pub trait BalanceService: Send + Sync {
    async fn transferable(
        &self,
        account: &AccountId,
        chain: &ChainId,
        asset: AssetId,
    ) -> Result<Balance, ChainError>;
}

/// Persistent basket storage
///
/// `insert` assigns ids; the `id` of the entries passed in is ignored.
/// `all` returns entries in storage order.
#[async_trait]
pub trait BasketStorage: Send + Sync {
    async fn insert(&self, entries: Vec<BasketEntry>) -> Result<Vec<BasketEntryId>, ChainError>;

    async fn update(&self, entry: BasketEntry) -> Result<(), ChainError>;

    async fn remove(&self, id: BasketEntryId) -> Result<bool, ChainError>;

    async fn all(&self) -> Result<Vec<BasketEntry>, ChainError>;
}

/// Fetch the chain head and the next nonce of every signer
pub async fn fetch_chain_context<C: ChainClient + ?Sized>(
    client: &C,
    signers: &[AccountId],
) -> Result<ChainContext, ChainError> {
    let genesis_hash = client.genesis_hash().await?;
    let block = client.latest_block().await?;
    let runtime = client.runtime_version().await?;

    let mut nonces = BTreeMap::new();
    for signer in signers {
        if !nonces.contains_key(signer) {
            nonces.insert(*signer, client.next_nonce(signer).await?);
        }
    }

    Ok(ChainContext {
        snapshot: ChainSnapshot {
            genesis_hash,
            block,
            runtime,
        },
        nonces,
    })
}

/// Transferable balance of each account, native asset
pub async fn fetch_balances<B: BalanceService + ?Sized>(
    service: &B,
    chain: &ChainId,
    accounts: &[AccountId],
) -> Result<BTreeMap<AccountId, Balance>, ChainError> {
    let mut balances = BTreeMap::new();
    for account in accounts {
        if !balances.contains_key(account) {
            let balance = service
                .transferable(account, chain, crate::types::NATIVE_ASSET)
                .await?;
            balances.insert(*account, balance);
        }
    }
    Ok(balances)
}
