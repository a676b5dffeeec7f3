//! Session state owned by one flow

use super::Step;
use crate::address::{encode_ss58, Ss58Prefix};
use crate::basket::BasketEntryId;
use crate::chain::SubmissionReceipt;
use crate::error::ValidationError;
use crate::fee::{BatchFee, FeeData, FeeStatus};
use crate::operation::{FormValues, OperationKind, TargetSelection};
use crate::payload::{MultiSignature, SigningPayload};
use crate::transport::{Decoder, TransportFrame};
use crate::types::{AccountId, Balance, ChainContext, ChainId, WalletId};
use crate::wrapper::WrappedTransaction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub type SessionId = u64;

/// Everything one signing attempt accumulates
#[derive(Debug, Clone)]
pub struct SigningSession {
    pub id: SessionId,
    pub step: Step,
    pub kind: Option<OperationKind>,
    pub wallet_id: Option<WalletId>,
    pub chain_id: Option<ChainId>,
    pub target: Option<TargetSelection>,
    pub form: Option<FormValues>,
    pub transactions: Vec<WrappedTransaction>,
    pub fee: FeeStatus<BatchFee>,
    /// Wrapped calls the current fee was estimated for
    pub fee_calls: Vec<Vec<u8>>,
    /// Multisig deposit per threshold
    pub deposits: BTreeMap<u16, FeeStatus<Balance>>,
    pub balances: Option<BTreeMap<AccountId, Balance>>,
    pub errors: Vec<String>,
    pub validation: Vec<ValidationError>,
    pub chain_context: Option<ChainContext>,
    pub payloads: Vec<SigningPayload>,
    pub frames: Vec<TransportFrame>,
    pub countdown: Option<Duration>,
    pub decoder: Decoder,
    pub scan_error: Option<String>,
    pub signatures: Vec<MultiSignature>,
    pub receipts: Vec<SubmissionReceipt>,
    pub settle: Option<Duration>,
    /// Basket entries this session was resumed from
    pub basket_entries: Vec<BasketEntryId>,
    /// Bumped whenever outstanding async results become stale
    pub generation: u64,
}

impl SigningSession {
    pub fn new(id: SessionId) -> Self {
        SigningSession {
            id,
            step: Step::None,
            kind: None,
            wallet_id: None,
            chain_id: None,
            target: None,
            form: None,
            transactions: Vec::new(),
            fee: FeeStatus::Pending,
            fee_calls: Vec::new(),
            deposits: BTreeMap::new(),
            balances: None,
            errors: Vec::new(),
            validation: Vec::new(),
            chain_context: None,
            payloads: Vec::new(),
            frames: Vec::new(),
            countdown: None,
            decoder: Decoder::new(),
            scan_error: None,
            signatures: Vec::new(),
            receipts: Vec::new(),
            settle: None,
            basket_entries: Vec::new(),
            generation: 0,
        }
    }

    /// Back to an empty session; the generation keeps counting so late
    /// results of the old attempt are still recognised as stale
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = SigningSession::new(self.id);
        self.generation = generation;
    }

    /// Drop everything tied to the current transport attempt
    pub fn clear_transport(&mut self) {
        self.chain_context = None;
        self.payloads.clear();
        self.frames.clear();
        self.countdown = None;
        self.decoder.reset();
        self.scan_error = None;
        self.signatures.clear();
    }

    pub fn wrapped_calls(&self) -> Vec<Vec<u8>> {
        self.transactions
            .iter()
            .map(|tx| tx.wrapped_call.clone())
            .collect()
    }

    /// Distinct signers of the batch, in order
    pub fn signers(&self) -> Vec<AccountId> {
        let mut signers: Vec<AccountId> = Vec::new();
        for tx in &self.transactions {
            if !signers.contains(&tx.signer) {
                signers.push(tx.signer);
            }
        }
        signers
    }

    /// Accounts whose balances the validation needs
    pub fn balance_accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = Vec::new();
        for tx in &self.transactions {
            for account in [tx.core.origin, tx.signer] {
                if !accounts.contains(&account) {
                    accounts.push(account);
                }
            }
        }
        accounts
    }

    /// Thresholds of the transactions that reserve a deposit
    pub fn deposit_thresholds(&self) -> BTreeSet<u16> {
        self.transactions
            .iter()
            .filter_map(|tx| tx.multisig.as_ref())
            .filter(|envelope| envelope.deposit_required)
            .map(|envelope| envelope.threshold)
            .collect()
    }

    /// Deposit `tx` reserves, once known
    pub fn deposit_of(&self, tx: &WrappedTransaction) -> Option<Balance> {
        match &tx.multisig {
            Some(envelope) if envelope.deposit_required => self
                .deposits
                .get(&envelope.threshold)
                .and_then(FeeStatus::available)
                .copied(),
            _ => Some(0),
        }
    }

    /// Deposit reserved by the whole batch
    pub fn deposit(&self) -> FeeStatus<Balance> {
        let mut total: Balance = 0;
        for threshold in self.transactions.iter().filter_map(|tx| {
            tx.multisig
                .as_ref()
                .filter(|envelope| envelope.deposit_required)
                .map(|envelope| envelope.threshold)
        }) {
            match self.deposits.get(&threshold) {
                Some(FeeStatus::Available(deposit)) => total = total.saturating_add(*deposit),
                Some(FeeStatus::Unavailable(e)) => return FeeStatus::Unavailable(e.clone()),
                Some(FeeStatus::Pending) | None => return FeeStatus::Pending,
            }
        }
        FeeStatus::Available(total)
    }

    /// Fee summary, available once both fee and deposit are known
    pub fn fee_data(&self) -> FeeStatus<FeeData> {
        match (&self.fee, &self.deposit()) {
            (FeeStatus::Available(fee), FeeStatus::Available(deposit)) => {
                FeeStatus::Available(FeeData {
                    fee: fee.fee,
                    total_fee: fee.total_fee,
                    multisig_deposit: *deposit,
                })
            }
            (FeeStatus::Unavailable(e), _) | (_, FeeStatus::Unavailable(e)) => {
                FeeStatus::Unavailable(e.clone())
            }
            _ => FeeStatus::Pending,
        }
    }

    /// Signers are rendered as SS58 addresses with `prefix`
    pub fn snapshot(&self, prefix: Ss58Prefix) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            step: self.step,
            kind: self.kind,
            wallet_id: self.wallet_id,
            transactions: self.transactions.len(),
            signers: self
                .signers()
                .iter()
                .map(|signer| encode_ss58(signer, prefix))
                .collect(),
            fee: self.fee_data(),
            countdown_secs: self.countdown.map(|d| d.as_secs()),
            frames: self.frames.iter().map(TransportFrame::to_bytes).collect(),
            scan_progress: self
                .decoder
                .progress()
                .map(|(received, needed)| ScanProgress { received, needed }),
            scan_error: self.scan_error.clone(),
            errors: self.errors.clone(),
            validation: self.validation.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub received: usize,
    pub needed: usize,
}

/// Read-only view of a session for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub step: Step,
    pub kind: Option<OperationKind>,
    pub wallet_id: Option<WalletId>,
    pub transactions: usize,
    /// Accounts that sign, in transaction order
    pub signers: Vec<String>,
    pub fee: FeeStatus<FeeData>,
    pub countdown_secs: Option<u64>,
    /// Encoded frames to cycle through as QR codes
    pub frames: Vec<Vec<u8>>,
    pub scan_progress: Option<ScanProgress>,
    pub scan_error: Option<String>,
    pub errors: Vec<String>,
    pub validation: Vec<ValidationError>,
}
