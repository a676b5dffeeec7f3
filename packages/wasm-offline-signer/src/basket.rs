//! Deferred transactions
//!
//! A confirmed batch can be parked instead of signed. Entries keep the bare
//! operation and the wrapper chain it was confirmed with; before signing they
//! are re-resolved against the current wallets and balances.

use crate::call::CallIndexResolver;
use crate::chain::{fetch_balances, BalanceService, BasketStorage, ChainClient};
use crate::error::{SignerError, ValidationError};
use crate::fee::{estimate_deposit, estimate_fee, FeeData, FeeParams};
use crate::operation::Operation;
use crate::permission::permits;
use crate::types::{deserialize_u128, serialize_u128, Balance, WalletId, Weight};
use crate::validation::validate_transaction;
use crate::wallet::WalletStore;
use crate::wrapper::{resolve_wrappers, wrap, WrapContext, WrappedTransaction, WrapperChain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub type BasketEntryId = u64;

/// Outcome of the last revalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ValidationStatus {
    /// Not checked yet, or the check could not run
    Unchecked { reason: Option<String> },
    Valid {
        #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
        fee: Balance,
        #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
        deposit: Balance,
    },
    Invalid { errors: Vec<ValidationError> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketEntry {
    /// Assigned by storage on insert
    #[serde(default)]
    pub id: BasketEntryId,
    pub initiator_wallet: WalletId,
    pub core: Operation,
    pub wrappers: WrapperChain,
    /// Entries deferred together share a group
    pub group_id: String,
    pub status: ValidationStatus,
}

impl BasketEntry {
    pub fn new(initiator_wallet: WalletId, tx: &WrappedTransaction, group_id: &str) -> Self {
        BasketEntry {
            id: 0,
            initiator_wallet,
            core: tx.core.clone(),
            wrappers: tx.wrappers.clone(),
            group_id: group_id.to_string(),
            status: ValidationStatus::Unchecked { reason: None },
        }
    }
}

/// Group id of a batch: first 8 bytes of the Blake2-256 of its wrapped calls
pub fn group_id(txs: &[WrappedTransaction]) -> String {
    let calls: Vec<u8> = txs.iter().flat_map(|tx| tx.wrapped_call.iter().copied()).collect();
    hex::encode(&crate::call::blake2_256(&calls)[..8])
}

/// Entries picked for signing, with their last known fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketSelection {
    pub entries: Vec<BasketEntry>,
    /// Present when every entry is currently valid
    pub fee: Option<FeeData>,
}

/// Current state entries are checked against
pub struct RevalidationContext<'a, C: ?Sized, B: ?Sized> {
    pub wallets: &'a dyn WalletStore,
    pub resolver: &'a dyn CallIndexResolver,
    pub client: &'a C,
    pub balances: &'a B,
    pub max_weight: Weight,
    pub fee_params: FeeParams,
}

pub struct BasketQueue<S> {
    storage: S,
}

impl<S: BasketStorage> BasketQueue<S> {
    pub fn new(storage: S) -> Self {
        BasketQueue { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn add(&self, entries: Vec<BasketEntry>) -> Result<Vec<BasketEntryId>, SignerError> {
        let count = entries.len();
        let ids = self.storage.insert(entries).await?;
        info!(count, "Added basket entries");
        Ok(ids)
    }

    /// Delete an entry; only ever on explicit request
    pub async fn remove(&self, id: BasketEntryId) -> Result<(), SignerError> {
        if self.storage.remove(id).await? {
            Ok(())
        } else {
            Err(SignerError::BasketEntryNotFound(id))
        }
    }

    pub async fn entries(&self) -> Result<Vec<BasketEntry>, SignerError> {
        Ok(self.storage.all().await?)
    }

    /// Stored entries with the given ids, in storage order
    async fn lookup(&self, ids: &[BasketEntryId]) -> Result<Vec<BasketEntry>, SignerError> {
        let all = self.storage.all().await?;
        if let Some(missing) = ids.iter().find(|id| !all.iter().any(|e| e.id == **id)) {
            return Err(SignerError::BasketEntryNotFound(*missing));
        }
        Ok(all.into_iter().filter(|e| ids.contains(&e.id)).collect())
    }

    /// Re-check entries against current wallets, fees and balances
    ///
    /// Statuses are written back by id. Invalid entries stay in the basket.
    pub async fn revalidate<C, B>(
        &self,
        ids: &[BasketEntryId],
        ctx: &RevalidationContext<'_, C, B>,
    ) -> Result<Vec<(BasketEntryId, ValidationStatus)>, SignerError>
    where
        C: ChainClient + ?Sized,
        B: BalanceService + ?Sized,
    {
        let entries = self.lookup(ids).await?;
        let mut results = Vec::with_capacity(entries.len());

        for mut entry in entries {
            let status = check_entry(&entry, ctx).await;
            match &status {
                ValidationStatus::Invalid { errors } => {
                    info!(id = entry.id, errors = errors.len(), "Basket entry invalid")
                }
                ValidationStatus::Unchecked { reason } => {
                    info!(id = entry.id, reason = ?reason, "Basket entry unchecked")
                }
                ValidationStatus::Valid { .. } => debug!(id = entry.id, "Basket entry valid"),
            }
            entry.status = status.clone();
            self.storage.update(entry.clone()).await?;
            results.push((entry.id, status));
        }

        Ok(results)
    }

    /// Entries to resume signing with
    ///
    /// All entries must come from one wallet on one chain and none may be
    /// invalid. The fee is only carried over when every entry is valid.
    pub async fn select_for_signing(
        &self,
        ids: &[BasketEntryId],
    ) -> Result<BasketSelection, SignerError> {
        let entries = self.lookup(ids).await?;
        let first = entries
            .first()
            .ok_or_else(|| SignerError::InvalidInput("No basket entries selected".to_string()))?;
        if entries
            .iter()
            .any(|e| e.initiator_wallet != first.initiator_wallet || e.core.chain_id != first.core.chain_id)
        {
            return Err(SignerError::InvalidInput(
                "Selected entries span several wallets or chains".to_string(),
            ));
        }
        if let Some(invalid) = entries
            .iter()
            .find(|e| matches!(e.status, ValidationStatus::Invalid { .. }))
        {
            return Err(SignerError::InvalidInput(format!(
                "Basket entry {} is invalid",
                invalid.id
            )));
        }

        let mut fee = Some(FeeData::default());
        for entry in &entries {
            fee = match (fee, &entry.status) {
                (Some(acc), ValidationStatus::Valid { fee, deposit }) => Some(FeeData {
                    fee: acc.fee.max(*fee),
                    total_fee: acc.total_fee.saturating_add(*fee),
                    multisig_deposit: acc.multisig_deposit.saturating_add(*deposit),
                }),
                _ => None,
            };
        }

        Ok(BasketSelection { entries, fee })
    }
}

async fn check_entry<C, B>(entry: &BasketEntry, ctx: &RevalidationContext<'_, C, B>) -> ValidationStatus
where
    C: ChainClient + ?Sized,
    B: BalanceService + ?Sized,
{
    let invalid = |error: ValidationError| ValidationStatus::Invalid {
        errors: vec![error],
    };
    let unresolvable = |reason: String| invalid(ValidationError::Unresolvable { reason });

    let Some(wallet) = ctx.wallets.wallet(entry.initiator_wallet) else {
        return unresolvable(format!("Wallet {} not found", entry.initiator_wallet));
    };
    if !permits(entry.core.kind, wallet) {
        return invalid(ValidationError::NotPermitted);
    }

    let hint = entry.wrappers.multisig().map(|m| m.signatory);
    let chain = match resolve_wrappers(ctx.wallets, wallet, entry.core.origin, hint) {
        Ok(chain) => chain,
        Err(e) => return unresolvable(e.to_string()),
    };
    if chain != entry.wrappers {
        return unresolvable("Wrapping changed since the entry was saved".to_string());
    }

    let wrap_ctx = WrapContext {
        resolver: ctx.resolver,
        max_weight: ctx.max_weight,
    };
    let tx = match wrap(&entry.core, &chain, &wrap_ctx) {
        Ok(tx) => tx,
        Err(e) => return unresolvable(e.to_string()),
    };

    let fee = match estimate_fee(&tx, ctx.fee_params, ctx.client).await {
        Ok(fee) => fee,
        Err(e) => {
            return ValidationStatus::Unchecked {
                reason: Some(e.to_string()),
            }
        }
    };
    let deposit = match &tx.multisig {
        Some(envelope) if envelope.deposit_required => {
            match estimate_deposit(envelope.threshold, ctx.client).await {
                Ok(deposit) => deposit,
                Err(e) => {
                    return ValidationStatus::Unchecked {
                        reason: Some(e.to_string()),
                    }
                }
            }
        }
        _ => 0,
    };

    let accounts = [tx.core.origin, tx.signer];
    let balances: BTreeMap<_, _> =
        match fetch_balances(ctx.balances, &tx.core.chain_id, &accounts).await {
            Ok(balances) => balances,
            Err(e) => {
                return ValidationStatus::Unchecked {
                    reason: Some(e.to_string()),
                }
            }
        };

    let errors = validate_transaction(&tx, &balances, fee, deposit);
    if errors.is_empty() {
        ValidationStatus::Valid { fee, deposit }
    } else {
        ValidationStatus::Invalid { errors }
    }
}
