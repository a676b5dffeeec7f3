//! Fee and multisig deposit estimation
//!
//! Fees are always queried for the wrapped call, since wrapping changes both
//! length and weight. Transactions of identical shape are queried once.

use crate::chain::ChainClient;
use crate::config::SignerConfig;
use crate::error::FeeError;
use crate::payload::fee_query_extrinsic;
use crate::types::{deserialize_u128, serialize_u128, Balance};
use crate::wrapper::WrappedTransaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Estimation state as seen by the flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum FeeStatus<T> {
    Pending,
    Available(T),
    Unavailable(String),
}

impl<T> FeeStatus<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            FeeStatus::Available(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, FeeStatus::Available(_))
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for FeeStatus<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => FeeStatus::Available(v),
            Err(e) => FeeStatus::Unavailable(e.to_string()),
        }
    }
}

/// Fees of a batch of wrapped transactions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFee {
    /// Largest per-transaction fee
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub fee: Balance,
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub total_fee: Balance,
    /// Fee of each transaction, in input order
    #[serde(default, skip_serializing)]
    pub fees: Vec<Balance>,
}

/// Fee summary shown on the confirmation screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeData {
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub fee: Balance,
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub total_fee: Balance,
    #[serde(serialize_with = "serialize_u128", deserialize_with = "deserialize_u128")]
    pub multisig_deposit: Balance,
}

/// Signed extension values fees are quoted with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub era_period: u64,
    pub tip: Balance,
}

impl Default for FeeParams {
    fn default() -> Self {
        FeeParams::from(&SignerConfig::default())
    }
}

impl From<&SignerConfig> for FeeParams {
    fn from(config: &SignerConfig) -> Self {
        FeeParams {
            era_period: config.era_period,
            tip: config.tip,
        }
    }
}

/// Fee of one wrapped transaction
pub async fn estimate_fee<C: ChainClient + ?Sized>(
    tx: &WrappedTransaction,
    params: FeeParams,
    client: &C,
) -> Result<Balance, FeeError> {
    let extrinsic = fee_query_extrinsic(&tx.signer, &tx.wrapped_call, params.era_period, params.tip);
    client.query_fee(&extrinsic).await.map_err(|e| {
        warn!(signer = %tx.signer, error = %e, "Fee estimation failed");
        FeeError::Unavailable(e.to_string())
    })
}

/// Multisig deposit: `deposit_base + deposit_factor * threshold`
pub async fn estimate_deposit<C: ChainClient + ?Sized>(
    threshold: u16,
    client: &C,
) -> Result<Balance, FeeError> {
    let constants = client
        .multisig_deposit_constants()
        .await
        .map_err(|e| FeeError::Unavailable(e.to_string()))?;
    Ok(constants
        .deposit_base
        .saturating_add(constants.deposit_factor.saturating_mul(Balance::from(threshold))))
}

/// Fee of a batch; one query per distinct shape, multiplied by its size
pub async fn estimate_batch<C: ChainClient + ?Sized>(
    txs: &[WrappedTransaction],
    params: FeeParams,
    client: &C,
) -> Result<BatchFee, FeeError> {
    let mut by_shape: BTreeMap<_, Balance> = BTreeMap::new();
    let mut fees = Vec::with_capacity(txs.len());

    for tx in txs {
        let shape = tx.shape();
        let fee = match by_shape.get(&shape) {
            Some(fee) => *fee,
            None => {
                let fee = estimate_fee(tx, params, client).await?;
                by_shape.insert(shape, fee);
                fee
            }
        };
        fees.push(fee);
    }

    let total_fee = fees.iter().fold(0u128, |acc, f| acc.saturating_add(*f));
    let fee = fees.iter().copied().max().unwrap_or(0);
    debug!(
        transactions = txs.len(),
        queries = by_shape.len(),
        total_fee,
        "Estimated batch fee"
    );

    Ok(BatchFee {
        fee,
        total_fee,
        fees,
    })
}
