//! Signing flow state machine
//!
//! [`FlowMachine::handle`] is the only way a session changes. It never
//! awaits: work that needs the network is returned as an [`Effect`] and its
//! result comes back later as a completion event tagged with the generation
//! it was requested under. Anything that invalidates outstanding work bumps
//! the generation, so late results are recognised and dropped.

use super::session::{SessionId, SessionSnapshot, SigningSession};
use super::Step;
use crate::basket::{group_id, BasketEntry, BasketEntryId, BasketSelection, ValidationStatus};
use crate::call::CallIndexResolver;
use crate::chain::SubmissionReceipt;
use crate::config::SignerConfig;
use crate::error::{ChainError, CompositionError, FeeError, FlowError, SubmissionError, WrapError};
use crate::fee::{BatchFee, FeeStatus};
use crate::operation::{build_operations, check_target, FormValues, OperationKind, Target, TargetSelection};
use crate::payload::{build_signing_payloads, SignedExtrinsic};
use crate::permission::{permits, permits_add_proxy};
use crate::transport::{decode_signatures, encode_payloads, Progress};
use crate::types::{AccountId, Balance, ChainContext, ChainId, WalletId};
use crate::validation::validate_transaction;
use crate::wallet::{Wallet, WalletStore};
use crate::wrapper::{resolve_wrappers, wrap, WrapContext, WrappedTransaction};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Input to the state machine: user actions and async completions
#[derive(Debug, Clone)]
pub enum FlowEvent {
    Start {
        kind: OperationKind,
        wallet_id: WalletId,
        chain_id: ChainId,
    },
    SelectTarget(TargetSelection),
    SubmitForm(FormValues),
    RetryEstimate,
    Confirm,
    DeferToBasket,
    ProceedToScan,
    FrameScanned(Vec<u8>),
    RegenerateTransport,
    /// Time elapsed since the previous tick
    Tick(Duration),
    Cancel,
    ResumeFromBasket(BasketSelection),
    FeeEstimated {
        generation: u64,
        result: Result<BatchFee, FeeError>,
    },
    DepositEstimated {
        generation: u64,
        threshold: u16,
        result: Result<Balance, FeeError>,
    },
    BalancesFetched {
        generation: u64,
        result: Result<BTreeMap<AccountId, Balance>, ChainError>,
    },
    ChainContextFetched {
        generation: u64,
        result: Result<ChainContext, ChainError>,
    },
    Submitted {
        generation: u64,
        result: Result<Vec<SubmissionReceipt>, SubmissionError>,
    },
}

/// Work the host must carry out on behalf of the machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Effect {
    EstimateFee {
        generation: u64,
        transactions: Vec<WrappedTransaction>,
    },
    /// One per distinct threshold in the batch
    EstimateDeposit {
        generation: u64,
        threshold: u16,
    },
    #[serde(rename_all = "camelCase")]
    FetchBalances {
        generation: u64,
        chain_id: ChainId,
        accounts: Vec<AccountId>,
    },
    FetchChainContext {
        generation: u64,
        signers: Vec<AccountId>,
    },
    Submit {
        generation: u64,
        extrinsics: Vec<SignedExtrinsic>,
    },
    SaveToBasket {
        entries: Vec<BasketEntry>,
    },
    /// Drop in-flight work of this session
    CancelPending,
    Finished {
        outcome: FlowOutcome,
    },
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum FlowOutcome {
    #[serde(rename_all = "camelCase")]
    Submitted {
        receipts: Vec<SubmissionReceipt>,
        basket_entries: Vec<BasketEntryId>,
    },
    Failed {
        error: SubmissionError,
    },
    Deferred {
        count: usize,
    },
    Cancelled,
}

pub struct FlowMachine {
    config: SignerConfig,
    wallets: Arc<dyn WalletStore + Send + Sync>,
    resolver: Arc<dyn CallIndexResolver + Send + Sync>,
    session: SigningSession,
}

impl FlowMachine {
    pub fn new(
        config: SignerConfig,
        wallets: Arc<dyn WalletStore + Send + Sync>,
        resolver: Arc<dyn CallIndexResolver + Send + Sync>,
    ) -> Self {
        FlowMachine {
            config,
            wallets,
            resolver,
            session: SigningSession::new(0),
        }
    }

    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session.id = id;
        self
    }

    pub fn session(&self) -> &SigningSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.config.ss58_prefix)
    }

    pub fn step(&self) -> Step {
        self.session.step
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Swap call indices, e.g. after a runtime upgrade
    pub fn set_resolver(&mut self, resolver: Arc<dyn CallIndexResolver + Send + Sync>) {
        self.resolver = resolver;
    }

    pub fn handle(&mut self, event: FlowEvent) -> Result<Vec<Effect>, FlowError> {
        let from = self.session.step;
        let effects = match event {
            FlowEvent::Start {
                kind,
                wallet_id,
                chain_id,
            } => self.start(kind, wallet_id, chain_id),
            FlowEvent::SelectTarget(selection) => self.select_target(selection),
            FlowEvent::SubmitForm(form) => self.submit_form(form),
            FlowEvent::RetryEstimate => self.retry_estimate(),
            FlowEvent::Confirm => self.confirm(),
            FlowEvent::DeferToBasket => self.defer_to_basket(),
            FlowEvent::ProceedToScan => self.proceed_to_scan(),
            FlowEvent::FrameScanned(bytes) => self.frame_scanned(&bytes),
            FlowEvent::RegenerateTransport => {
                self.expect_step(&[Step::TransportToSigner, Step::AwaitSignature], "regenerateTransport")?;
                Ok(self.regenerate())
            }
            FlowEvent::Tick(elapsed) => Ok(self.tick(elapsed)),
            FlowEvent::Cancel => Ok(self.cancel()),
            FlowEvent::ResumeFromBasket(selection) => self.resume_from_basket(selection),
            FlowEvent::FeeEstimated { generation, result } => {
                Ok(self.fee_estimated(generation, result))
            }
            FlowEvent::DepositEstimated {
                generation,
                threshold,
                result,
            } => Ok(self.deposit_estimated(generation, threshold, result)),
            FlowEvent::BalancesFetched { generation, result } => {
                Ok(self.balances_fetched(generation, result))
            }
            FlowEvent::ChainContextFetched { generation, result } => {
                Ok(self.chain_context_fetched(generation, result))
            }
            FlowEvent::Submitted { generation, result } => Ok(self.submitted(generation, result)),
        }?;

        if self.session.step != from {
            info!(
                session = self.session.id,
                from = ?from,
                step = ?self.session.step,
                generation = self.session.generation,
                "Flow step changed"
            );
        }
        Ok(effects)
    }

    /// Enter `Confirm` with basket entries, skipping the form
    ///
    /// Entries are re-wrapped with the chains they were saved with. Without a
    /// known fee the session estimates first.
    pub fn resume_from_basket(&mut self, selection: BasketSelection) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::None], "resumeFromBasket")?;
        let first = selection
            .entries
            .first()
            .ok_or(FlowError::MissingInput("basket entries"))?;
        let (kind, wallet_id, chain_id) =
            (first.core.kind, first.initiator_wallet, first.core.chain_id);
        self.wallet(wallet_id)?;

        let resolver = Arc::clone(&self.resolver);
        let ctx = self.wrap_context(resolver.as_ref());
        let transactions = selection
            .entries
            .iter()
            .map(|entry| wrap(&entry.core, &entry.wrappers, &ctx))
            .collect::<Result<Vec<_>, WrapError>>()?;

        self.session.reset();
        self.session.kind = Some(kind);
        self.session.wallet_id = Some(wallet_id);
        self.session.chain_id = Some(chain_id);
        self.session.transactions = transactions;
        self.session.basket_entries = selection.entries.iter().map(|e| e.id).collect();

        match selection.fee {
            Some(fee) => {
                self.session.fee = FeeStatus::Available(BatchFee {
                    fee: fee.fee,
                    total_fee: fee.total_fee,
                    fees: Vec::new(),
                });
                self.session.fee_calls = self.session.wrapped_calls();
                for (entry, tx) in selection.entries.iter().zip(&self.session.transactions) {
                    if let (Some(envelope), ValidationStatus::Valid { deposit, .. }) =
                        (&tx.multisig, &entry.status)
                    {
                        if envelope.deposit_required {
                            self.session
                                .deposits
                                .insert(envelope.threshold, FeeStatus::Available(*deposit));
                        }
                    }
                }
                self.session.step = Step::Confirm;
                Ok(Vec::new())
            }
            None => {
                self.session.step = Step::WrapAndEstimate;
                Ok(self.request_estimates())
            }
        }
    }

    fn expect_step(&self, allowed: &[Step], action: &'static str) -> Result<(), FlowError> {
        if allowed.contains(&self.session.step) {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition {
                step: self.session.step,
                action,
            })
        }
    }

    fn wallet(&self, id: WalletId) -> Result<&Wallet, FlowError> {
        self.wallets
            .wallet(id)
            .ok_or_else(|| CompositionError::WalletNotFound(id).into())
    }

    fn kind(&self) -> Result<OperationKind, FlowError> {
        self.session.kind.ok_or(FlowError::MissingInput("operation kind"))
    }

    fn wrap_context<'a>(&self, resolver: &'a dyn CallIndexResolver) -> WrapContext<'a> {
        WrapContext {
            resolver,
            max_weight: self.config.max_weight,
        }
    }

    fn is_current(&self, generation: u64, allowed: &[Step], what: &'static str) -> bool {
        let current = generation == self.session.generation && allowed.contains(&self.session.step);
        if !current {
            debug!(
                session = self.session.id,
                generation,
                current = self.session.generation,
                step = ?self.session.step,
                what,
                "Dropping stale result"
            );
        }
        current
    }

    fn start(
        &mut self,
        kind: OperationKind,
        wallet_id: WalletId,
        chain_id: ChainId,
    ) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::None], "start")?;
        let wallet = self.wallet(wallet_id)?;
        if !permits(kind, wallet) {
            return Err(FlowError::NotPermitted);
        }
        let shards: Vec<AccountId> = wallet.accounts.iter().map(|a| a.account_id).collect();

        self.session.reset();
        self.session.kind = Some(kind);
        self.session.wallet_id = Some(wallet_id);
        self.session.chain_id = Some(chain_id);
        if kind.needs_target() {
            self.session.step = Step::SelectTarget;
        } else {
            self.session.target = Some(TargetSelection {
                shards,
                target: Target::None,
            });
            self.session.step = Step::Form;
        }
        Ok(Vec::new())
    }

    fn select_target(&mut self, selection: TargetSelection) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::SelectTarget, Step::Form], "selectTarget")?;
        if selection.shards.is_empty() {
            return Err(FlowError::MissingInput("shards"));
        }
        let kind = self.kind()?;
        check_target(kind, &selection.target)?;

        let wallet_id = self.session.wallet_id.ok_or(FlowError::MissingInput("wallet"))?;
        let wallet = self.wallet(wallet_id)?;
        if !selection.shards.iter().all(|s| wallet.holds(s)) {
            return Err(CompositionError::OriginMismatch.into());
        }
        if let (OperationKind::AddProxy, Target::ProxyDelegate { proxy_type, .. }) =
            (kind, &selection.target)
        {
            if !permits_add_proxy(*proxy_type, wallet) {
                return Err(FlowError::NotPermitted);
            }
        }

        self.session.target = Some(selection);
        self.session.step = Step::Form;
        Ok(Vec::new())
    }

    fn submit_form(&mut self, form: FormValues) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::Form, Step::WrapAndEstimate], "submitForm")?;
        let kind = self.kind()?;
        let chain_id = self.session.chain_id.ok_or(FlowError::MissingInput("chain"))?;
        let wallet_id = self.session.wallet_id.ok_or(FlowError::MissingInput("wallet"))?;
        let selection = self
            .session
            .target
            .clone()
            .ok_or(FlowError::MissingInput("target"))?;
        let operations = build_operations(kind, chain_id, &selection, &form)?;

        let wallets = Arc::clone(&self.wallets);
        let resolver = Arc::clone(&self.resolver);
        let wallet = wallets
            .wallet(wallet_id)
            .ok_or(CompositionError::WalletNotFound(wallet_id))?;
        let ctx = self.wrap_context(resolver.as_ref());
        let wrapped = operations
            .iter()
            .map(|op| -> Result<WrappedTransaction, WrapError> {
                let chain = resolve_wrappers(wallets.as_ref(), wallet, op.origin, form.signatory)?;
                wrap(op, &chain, &ctx)
            })
            .collect::<Result<Vec<_>, WrapError>>();

        self.session.form = Some(form);
        self.session.generation += 1;
        self.session.errors.clear();
        self.session.validation.clear();

        match wrapped {
            Ok(transactions) => {
                self.session.transactions = transactions;
                self.session.balances = None;
                self.session.step = Step::WrapAndEstimate;
                let effects = self.request_estimates();
                self.try_advance();
                Ok(effects)
            }
            Err(e) => {
                warn!(session = self.session.id, error = %e, "Wrapping failed");
                self.session.transactions.clear();
                self.session.errors.push(e.to_string());
                self.session.step = Step::Form;
                Ok(Vec::new())
            }
        }
    }

    /// Effects for whatever estimate is missing. Results for unchanged
    /// wrapped calls are reused.
    fn request_estimates(&mut self) -> Vec<Effect> {
        let generation = self.session.generation;
        let mut effects = Vec::new();

        let calls = self.session.wrapped_calls();
        if !(self.session.fee.is_available() && self.session.fee_calls == calls) {
            self.session.fee = FeeStatus::Pending;
            effects.push(Effect::EstimateFee {
                generation,
                transactions: self.session.transactions.clone(),
            });
        }

        // Deposits depend on the threshold alone, so known ones are kept
        let thresholds = self.session.deposit_thresholds();
        self.session
            .deposits
            .retain(|threshold, status| thresholds.contains(threshold) && status.is_available());
        for threshold in thresholds {
            if !self.session.deposits.contains_key(&threshold) {
                self.session.deposits.insert(threshold, FeeStatus::Pending);
                effects.push(Effect::EstimateDeposit {
                    generation,
                    threshold,
                });
            }
        }

        if self.session.balances.is_none() {
            if let Some(chain_id) = self.session.chain_id {
                effects.push(Effect::FetchBalances {
                    generation,
                    chain_id,
                    accounts: self.session.balance_accounts(),
                });
            }
        }

        effects
    }

    fn retry_estimate(&mut self) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::WrapAndEstimate], "retryEstimate")?;
        self.session.generation += 1;
        self.session.errors.clear();
        Ok(self.request_estimates())
    }

    fn fee_estimated(&mut self, generation: u64, result: Result<BatchFee, FeeError>) -> Vec<Effect> {
        if !self.is_current(generation, &[Step::WrapAndEstimate], "fee") {
            return Vec::new();
        }
        match result {
            Ok(fee) => {
                self.session.fee_calls = self.session.wrapped_calls();
                self.session.fee = FeeStatus::Available(fee);
            }
            Err(e) => {
                warn!(session = self.session.id, error = %e, "Fee unavailable");
                self.session.fee = FeeStatus::Unavailable(e.to_string());
            }
        }
        self.try_advance();
        Vec::new()
    }

    fn deposit_estimated(
        &mut self,
        generation: u64,
        threshold: u16,
        result: Result<Balance, FeeError>,
    ) -> Vec<Effect> {
        if !self.is_current(generation, &[Step::WrapAndEstimate], "deposit") {
            return Vec::new();
        }
        if let Some(status) = self.session.deposits.get_mut(&threshold) {
            *status = result.into();
        }
        self.try_advance();
        Vec::new()
    }

    fn balances_fetched(
        &mut self,
        generation: u64,
        result: Result<BTreeMap<AccountId, Balance>, ChainError>,
    ) -> Vec<Effect> {
        if !self.is_current(generation, &[Step::WrapAndEstimate], "balances") {
            return Vec::new();
        }
        match result {
            Ok(balances) => self.session.balances = Some(balances),
            Err(e) => {
                warn!(session = self.session.id, error = %e, "Balances unavailable");
                self.session.errors.push(e.to_string());
            }
        }
        self.try_advance();
        Vec::new()
    }

    /// Leave `WrapAndEstimate` once fee, deposit and balances are all in
    fn try_advance(&mut self) {
        if self.session.step != Step::WrapAndEstimate {
            return;
        }
        let (Some(fee), true, Some(balances)) = (
            self.session.fee.available(),
            self.session.deposit().is_available(),
            self.session.balances.as_ref(),
        ) else {
            return;
        };

        let errors: Vec<_> = self
            .session
            .transactions
            .iter()
            .enumerate()
            .flat_map(|(i, tx)| {
                let tx_fee = fee.fees.get(i).copied().unwrap_or(fee.fee);
                let deposit = self.session.deposit_of(tx).unwrap_or(0);
                validate_transaction(tx, balances, tx_fee, deposit)
            })
            .collect();

        if errors.is_empty() {
            self.session.step = Step::Confirm;
        } else {
            info!(
                session = self.session.id,
                errors = errors.len(),
                "Balance validation failed"
            );
            self.session.validation = errors;
            self.session.step = Step::Form;
        }
    }

    fn confirm(&mut self) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::Confirm], "confirm")?;
        Ok(self.regenerate())
    }

    /// Start a fresh transport attempt: new chain context, new nonces
    fn regenerate(&mut self) -> Vec<Effect> {
        self.session.clear_transport();
        self.session.generation += 1;
        self.session.step = Step::TransportToSigner;
        vec![Effect::FetchChainContext {
            generation: self.session.generation,
            signers: self.session.signers(),
        }]
    }

    fn chain_context_fetched(
        &mut self,
        generation: u64,
        result: Result<ChainContext, ChainError>,
    ) -> Vec<Effect> {
        if !self.is_current(
            generation,
            &[Step::TransportToSigner, Step::AwaitSignature],
            "chain context",
        ) {
            return Vec::new();
        }
        let built = result
            .map_err(|e| e.to_string())
            .and_then(|ctx| self.build_transport(ctx));
        if let Err(e) = built {
            warn!(session = self.session.id, error = %e, "Transport not built");
            self.session.errors.push(e);
        }
        Vec::new()
    }

    fn build_transport(&mut self, ctx: ChainContext) -> Result<(), String> {
        let payloads = build_signing_payloads(
            &self.session.transactions,
            &ctx,
            self.config.era_period,
            self.config.tip,
        )
        .map_err(|e| e.to_string())?;
        let requests: Vec<Vec<u8>> = payloads
            .iter()
            .map(|p| p.vault_request(self.config.crypto_type))
            .collect();
        let frames = encode_payloads(&requests, &self.config.transport)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "Nothing to sign".to_string())?;

        info!(
            session = self.session.id,
            payloads = payloads.len(),
            frames = frames.len(),
            block = ctx.snapshot.block.number,
            "Transport ready"
        );
        self.session.errors.clear();
        self.session.payloads = payloads;
        self.session.frames = frames;
        self.session.chain_context = Some(ctx);
        self.session.countdown = Some(self.config.countdown());
        self.session.decoder.reset();
        Ok(())
    }

    fn proceed_to_scan(&mut self) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::TransportToSigner], "proceedToScan")?;
        if self.session.frames.is_empty() {
            return Err(FlowError::MissingInput("frames"));
        }
        self.session.step = Step::AwaitSignature;
        Ok(Vec::new())
    }

    fn frame_scanned(&mut self, bytes: &[u8]) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::TransportToSigner, Step::AwaitSignature], "frameScanned")?;
        if self.session.payloads.is_empty() {
            return Err(FlowError::MissingInput("signing payloads"));
        }
        self.session.step = Step::AwaitSignature;

        match self.session.decoder.accumulate_bytes(bytes) {
            Err(e) => {
                warn!(session = self.session.id, error = %e, "Frame rejected");
                self.session.scan_error = Some(e.to_string());
                Ok(Vec::new())
            }
            Ok(Progress::Partial { .. }) => {
                self.session.scan_error = None;
                Ok(Vec::new())
            }
            Ok(Progress::Complete(data)) => Ok(self.collect_signatures(&data)),
        }
    }

    fn collect_signatures(&mut self, data: &[u8]) -> Vec<Effect> {
        let expected = self.session.payloads.len();
        let checked = decode_signatures(data)
            .map_err(FlowError::from)
            .and_then(|signatures| {
                if signatures.len() == expected {
                    Ok(signatures)
                } else {
                    Err(FlowError::SignatureCountMismatch {
                        expected,
                        received: signatures.len(),
                    })
                }
            });
        let signatures = match checked {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(session = self.session.id, error = %e, "Signature response rejected");
                self.session.scan_error = Some(e.to_string());
                self.session.decoder.reset();
                return Vec::new();
            }
        };

        let extrinsics: Vec<SignedExtrinsic> = self
            .session
            .payloads
            .iter()
            .zip(&signatures)
            .map(|(payload, signature)| SignedExtrinsic::assemble(payload, signature))
            .collect();
        self.session.signatures = signatures;
        self.session.scan_error = None;
        self.session.countdown = None;
        self.session.generation += 1;
        self.session.step = Step::Submit;
        vec![Effect::Submit {
            generation: self.session.generation,
            extrinsics,
        }]
    }

    fn tick(&mut self, elapsed: Duration) -> Vec<Effect> {
        match (self.session.step, self.session.countdown, self.session.settle) {
            (step, Some(left), _) if step.is_transport() => {
                let left = left.saturating_sub(elapsed);
                if left.is_zero() {
                    info!(
                        session = self.session.id,
                        signatures = self.session.signatures.len(),
                        "Transport expired, regenerating"
                    );
                    return self.regenerate();
                }
                self.session.countdown = Some(left);
            }
            (Step::Submit, _, Some(left)) => {
                let left = left.saturating_sub(elapsed);
                if left.is_zero() {
                    return self.finish_submitted();
                }
                self.session.settle = Some(left);
            }
            _ => {}
        }
        Vec::new()
    }

    fn submitted(
        &mut self,
        generation: u64,
        result: Result<Vec<SubmissionReceipt>, SubmissionError>,
    ) -> Vec<Effect> {
        if !self.is_current(generation, &[Step::Submit], "submission") {
            return Vec::new();
        }
        match result {
            Ok(receipts) => {
                info!(
                    session = self.session.id,
                    extrinsics = receipts.len(),
                    "Submission acknowledged"
                );
                self.session.receipts = receipts;
                let settle = self.config.settle_delay();
                if settle.is_zero() {
                    return self.finish_submitted();
                }
                self.session.settle = Some(settle);
                Vec::new()
            }
            Err(error) => {
                warn!(session = self.session.id, error = %error, "Submission failed");
                self.finish(FlowOutcome::Failed { error })
            }
        }
    }

    fn finish_submitted(&mut self) -> Vec<Effect> {
        let outcome = FlowOutcome::Submitted {
            receipts: std::mem::take(&mut self.session.receipts),
            basket_entries: std::mem::take(&mut self.session.basket_entries),
        };
        self.finish(outcome)
    }

    fn defer_to_basket(&mut self) -> Result<Vec<Effect>, FlowError> {
        self.expect_step(&[Step::Confirm], "deferToBasket")?;
        if !self.session.basket_entries.is_empty() {
            return Err(FlowError::InvalidTransition {
                step: self.session.step,
                action: "deferToBasket",
            });
        }
        let wallet_id = self.session.wallet_id.ok_or(FlowError::MissingInput("wallet"))?;
        let group = group_id(&self.session.transactions);
        let fee = self.session.fee.available().cloned().unwrap_or_default();

        let entries: Vec<BasketEntry> = self
            .session
            .transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                let mut entry = BasketEntry::new(wallet_id, tx, &group);
                entry.status = ValidationStatus::Valid {
                    fee: fee.fees.get(i).copied().unwrap_or(fee.fee),
                    deposit: self.session.deposit_of(tx).unwrap_or(0),
                };
                entry
            })
            .collect();
        let count = entries.len();

        self.session.step = Step::Basket;
        let mut effects = vec![Effect::SaveToBasket { entries }];
        effects.extend(self.finish(FlowOutcome::Deferred { count }));
        Ok(effects)
    }

    fn cancel(&mut self) -> Vec<Effect> {
        if self.session.step == Step::None {
            return Vec::new();
        }
        let mut effects = vec![Effect::CancelPending];
        effects.extend(self.finish(FlowOutcome::Cancelled));
        effects
    }

    /// Report the outcome and reset. Any pending async work is now stale.
    fn finish(&mut self, outcome: FlowOutcome) -> Vec<Effect> {
        let from = self.session.step;
        self.session.step = Step::Done;
        info!(
            session = self.session.id,
            from = ?from,
            outcome = ?outcome,
            "Flow finished"
        );
        self.session.reset();
        vec![Effect::Finished { outcome }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{decode_ss58, encode_ss58, Ss58Prefix};
    use crate::call::{Call, KnownCallIndices, Timepoint};
    use crate::error::ValidationError;
    use crate::fee::FeeData;
    use crate::operation::Operation;
    use crate::payload::MultiSignature;
    use crate::test_utils::*;
    use crate::transport::{encode, encode_bulk, TransportConfig};
    use crate::types::{BlockRef, ChainSnapshot, RuntimeVersion};
    use crate::wrapper::{MultisigWrapper, WrapperChain};
    use parity_scale_codec::Encode;

    const RICH: Balance = 1_000_000_000_000_000;

    fn machine() -> FlowMachine {
        FlowMachine::new(SignerConfig::default(), Arc::new(fixture_store()), indices())
    }

    fn generation_of(effects: &[Effect]) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::EstimateFee { generation, .. }
                | Effect::EstimateDeposit { generation, .. }
                | Effect::FetchBalances { generation, .. }
                | Effect::FetchChainContext { generation, .. }
                | Effect::Submit { generation, .. } => Some(*generation),
                _ => None,
            })
            .unwrap()
    }

    fn context(nonce: u32, block: u64, signers: &[AccountId]) -> ChainContext {
        ChainContext {
            snapshot: ChainSnapshot {
                genesis_hash: CHAIN,
                block: BlockRef {
                    hash: [block as u8; 32],
                    number: block,
                },
                runtime: RuntimeVersion {
                    spec_version: 1_002_000,
                    tx_version: 26,
                },
            },
            nonces: signers.iter().map(|s| (*s, nonce)).collect(),
        }
    }

    fn start_transfer(m: &mut FlowMachine, wallet: WalletId, shards: &[AccountId]) {
        m.handle(FlowEvent::Start {
            kind: OperationKind::Transfer,
            wallet_id: wallet,
            chain_id: CHAIN,
        })
        .unwrap();
        assert_eq!(m.step(), Step::SelectTarget);
        m.handle(FlowEvent::SelectTarget(TargetSelection {
            shards: shards.to_vec(),
            target: Target::Account { account: DAVE },
        }))
        .unwrap();
    }

    fn form(amount: Balance) -> FormValues {
        FormValues {
            amount,
            ..Default::default()
        }
    }

    fn batch_fee(count: usize) -> BatchFee {
        BatchFee {
            fee: FEE,
            total_fee: FEE * count as Balance,
            fees: vec![FEE; count],
        }
    }

    /// Drive a transfer up to `Confirm`
    fn confirmed(m: &mut FlowMachine, wallet: WalletId, shards: &[AccountId]) {
        start_transfer(m, wallet, shards);
        let effects = m.handle(FlowEvent::SubmitForm(form(10))).unwrap();
        let generation = generation_of(&effects);
        m.handle(FlowEvent::FeeEstimated {
            generation,
            result: Ok(batch_fee(shards.len())),
        })
        .unwrap();
        m.handle(FlowEvent::BalancesFetched {
            generation,
            result: Ok(shards.iter().map(|s| (*s, RICH)).collect()),
        })
        .unwrap();
        assert_eq!(m.step(), Step::Confirm);
    }

    fn signature_frames(signatures: &[MultiSignature]) -> Vec<Vec<u8>> {
        let bytes = match signatures {
            [single] => single.encode(),
            many => encode_bulk(&many.iter().map(|s| s.encode()).collect::<Vec<_>>()),
        };
        encode(&bytes, &TransportConfig::default())
            .unwrap()
            .iter()
            .map(|f| f.to_bytes())
            .collect()
    }

    #[test]
    fn test_happy_path_to_submission() {
        let mut m = machine();
        confirmed(&mut m, VAULT, &[ALICE]);

        let effects = m.handle(FlowEvent::Confirm).unwrap();
        assert_eq!(m.step(), Step::TransportToSigner);
        let generation = generation_of(&effects);
        assert!(matches!(&effects[0], Effect::FetchChainContext { signers, .. } if signers == &vec![ALICE]));

        m.handle(FlowEvent::ChainContextFetched {
            generation,
            result: Ok(context(3, 1000, &[ALICE])),
        })
        .unwrap();
        assert!(!m.session().frames.is_empty());
        assert_eq!(m.session().payloads[0].nonce, 3);
        assert_eq!(m.snapshot().countdown_secs, Some(300));

        m.handle(FlowEvent::ProceedToScan).unwrap();
        assert_eq!(m.step(), Step::AwaitSignature);

        let mut submit = Vec::new();
        for frame in signature_frames(&[MultiSignature::Sr25519([7u8; 64])]) {
            submit = m.handle(FlowEvent::FrameScanned(frame)).unwrap();
            if !submit.is_empty() {
                break;
            }
        }
        assert_eq!(m.step(), Step::Submit);
        let Effect::Submit {
            generation,
            extrinsics,
        } = &submit[0]
        else {
            panic!("expected submit effect");
        };
        assert_eq!(extrinsics.len(), 1);

        let receipt = SubmissionReceipt {
            extrinsic_hash: extrinsics[0].hash(),
            block_hash: None,
        };
        m.handle(FlowEvent::Submitted {
            generation: *generation,
            result: Ok(vec![receipt.clone()]),
        })
        .unwrap();
        assert_eq!(m.step(), Step::Submit);

        assert!(m.handle(FlowEvent::Tick(Duration::from_secs(1))).unwrap().is_empty());
        let effects = m.handle(FlowEvent::Tick(Duration::from_secs(1))).unwrap();
        assert_eq!(
            effects,
            vec![Effect::Finished {
                outcome: FlowOutcome::Submitted {
                    receipts: vec![receipt],
                    basket_entries: vec![],
                }
            }]
        );
        assert_eq!(m.step(), Step::None);
    }

    #[test]
    fn test_stale_fee_is_dropped() {
        let mut m = machine();
        start_transfer(&mut m, VAULT, &[ALICE]);
        let first = generation_of(&m.handle(FlowEvent::SubmitForm(form(10))).unwrap());
        let second = generation_of(&m.handle(FlowEvent::SubmitForm(form(20))).unwrap());
        assert!(second > first);

        m.handle(FlowEvent::FeeEstimated {
            generation: first,
            result: Ok(batch_fee(1)),
        })
        .unwrap();
        assert_eq!(m.session().fee, FeeStatus::Pending);
    }

    #[test]
    fn test_balance_error_returns_to_form_keeping_fee() {
        let mut m = machine();
        start_transfer(&mut m, VAULT, &[ALICE]);
        let generation = generation_of(&m.handle(FlowEvent::SubmitForm(form(10))).unwrap());
        m.handle(FlowEvent::FeeEstimated {
            generation,
            result: Ok(batch_fee(1)),
        })
        .unwrap();
        m.handle(FlowEvent::BalancesFetched {
            generation,
            result: Ok([(ALICE, 12)].into_iter().collect()),
        })
        .unwrap();

        assert_eq!(m.step(), Step::Form);
        assert_eq!(m.snapshot().validation.len(), 1);
        assert!(m.session().fee.is_available());

        // same form: fee reused, only balances refetched
        let effects = m.handle(FlowEvent::SubmitForm(form(10))).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::FetchBalances { .. }));
    }

    #[test]
    fn test_composition_error_returns_to_form() {
        let mut m = machine();
        start_transfer(&mut m, PROXY_OF_PROXY_WALLET, &[PROXY_OF_PROXY]);
        let effects = m.handle(FlowEvent::SubmitForm(form(10))).unwrap();

        assert!(effects.is_empty());
        assert_eq!(m.step(), Step::Form);
        assert_eq!(
            m.snapshot().errors,
            vec![CompositionError::ProxyOfProxy.to_string()]
        );
    }

    #[test]
    fn test_multisig_requests_deposit() {
        let mut m = machine();
        start_transfer(&mut m, MULTISIG_WALLET, &[MULTISIG]);
        let effects = m.handle(FlowEvent::SubmitForm(form(10))).unwrap();

        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EstimateDeposit { threshold: 2, .. })));
        assert!(matches!(
            &effects.last(),
            Some(Effect::FetchBalances { accounts, .. }) if accounts == &vec![MULTISIG, BOB]
        ));
    }

    #[test]
    fn test_snapshot_shows_signers_as_addresses() {
        let config = SignerConfig {
            ss58_prefix: Ss58Prefix::KUSAMA,
            ..SignerConfig::default()
        };
        let mut m = FlowMachine::new(config, Arc::new(fixture_store()), indices());
        start_transfer(&mut m, MULTISIG_WALLET, &[MULTISIG]);
        assert!(m.snapshot().signers.is_empty());

        m.handle(FlowEvent::SubmitForm(form(10))).unwrap();
        let signers = m.snapshot().signers;
        assert_eq!(signers, vec![encode_ss58(&BOB, Ss58Prefix::KUSAMA)]);
        assert_eq!(decode_ss58(&signers[0]).unwrap(), (BOB, Ss58Prefix::KUSAMA));
    }

    #[test]
    fn test_fee_failure_stays_and_retries() {
        let mut m = machine();
        start_transfer(&mut m, VAULT, &[ALICE]);
        let generation = generation_of(&m.handle(FlowEvent::SubmitForm(form(10))).unwrap());
        m.handle(FlowEvent::FeeEstimated {
            generation,
            result: Err(FeeError::Unavailable("node offline".to_string())),
        })
        .unwrap();
        m.handle(FlowEvent::BalancesFetched {
            generation,
            result: Ok([(ALICE, RICH)].into_iter().collect()),
        })
        .unwrap();

        assert_eq!(m.step(), Step::WrapAndEstimate);
        assert!(matches!(m.snapshot().fee, FeeStatus::Unavailable(_)));

        let effects = m.handle(FlowEvent::RetryEstimate).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::EstimateFee { .. }));
    }

    #[test]
    fn test_countdown_expiry_regenerates_with_fresh_context() {
        let mut m = machine();
        confirmed(&mut m, VAULT, &[ALICE]);
        let old = generation_of(&m.handle(FlowEvent::Confirm).unwrap());
        m.handle(FlowEvent::ChainContextFetched {
            generation: old,
            result: Ok(context(3, 1000, &[ALICE])),
        })
        .unwrap();
        m.handle(FlowEvent::ProceedToScan).unwrap();

        let effects = m.handle(FlowEvent::Tick(Duration::from_secs(300))).unwrap();
        assert_eq!(m.step(), Step::TransportToSigner);
        assert!(m.session().frames.is_empty());
        let fresh = generation_of(&effects);
        assert!(fresh > old);

        // late answer to the expired attempt is ignored
        m.handle(FlowEvent::ChainContextFetched {
            generation: old,
            result: Ok(context(3, 1000, &[ALICE])),
        })
        .unwrap();
        assert!(m.session().payloads.is_empty());

        m.handle(FlowEvent::ChainContextFetched {
            generation: fresh,
            result: Ok(context(4, 1010, &[ALICE])),
        })
        .unwrap();
        assert_eq!(m.session().payloads[0].nonce, 4);
        assert_eq!(m.session().payloads[0].chain.block.number, 1010);
        assert!(m.session().fee.is_available());
    }

    #[test]
    fn test_signature_count_mismatch_keeps_scanning() {
        let mut m = machine();
        confirmed(&mut m, MULTISHARD, &[BOB, CHARLIE]);
        let generation = generation_of(&m.handle(FlowEvent::Confirm).unwrap());
        m.handle(FlowEvent::ChainContextFetched {
            generation,
            result: Ok(context(0, 1000, &[BOB, CHARLIE])),
        })
        .unwrap();
        assert_eq!(m.session().payloads.len(), 2);

        for frame in signature_frames(&[MultiSignature::Sr25519([7u8; 64])]) {
            m.handle(FlowEvent::FrameScanned(frame)).unwrap();
        }
        assert_eq!(m.step(), Step::AwaitSignature);
        assert!(m.snapshot().scan_error.is_some());

        let mut effects = Vec::new();
        for frame in signature_frames(&[
            MultiSignature::Sr25519([7u8; 64]),
            MultiSignature::Sr25519([8u8; 64]),
        ]) {
            effects = m.handle(FlowEvent::FrameScanned(frame)).unwrap();
            if !effects.is_empty() {
                break;
            }
        }
        assert!(matches!(&effects[0], Effect::Submit { extrinsics, .. } if extrinsics.len() == 2));
    }

    #[test]
    fn test_submission_error_is_reported_verbatim() {
        let mut m = machine();
        confirmed(&mut m, VAULT, &[ALICE]);
        let generation = generation_of(&m.handle(FlowEvent::Confirm).unwrap());
        m.handle(FlowEvent::ChainContextFetched {
            generation,
            result: Ok(context(0, 1000, &[ALICE])),
        })
        .unwrap();
        let mut effects = Vec::new();
        for frame in signature_frames(&[MultiSignature::Sr25519([7u8; 64])]) {
            effects = m.handle(FlowEvent::FrameScanned(frame)).unwrap();
            if !effects.is_empty() {
                break;
            }
        }
        let generation = generation_of(&effects);
        let error = SubmissionError::Rejected("bad signature".to_string());
        let effects = m
            .handle(FlowEvent::Submitted {
                generation,
                result: Err(error.clone()),
            })
            .unwrap();

        assert_eq!(
            effects,
            vec![Effect::Finished {
                outcome: FlowOutcome::Failed { error }
            }]
        );
        assert_eq!(m.step(), Step::None);
    }

    #[test]
    fn test_cancel_drops_pending_work() {
        let mut m = machine();
        start_transfer(&mut m, VAULT, &[ALICE]);
        let generation = generation_of(&m.handle(FlowEvent::SubmitForm(form(10))).unwrap());

        let effects = m.handle(FlowEvent::Cancel).unwrap();
        assert_eq!(effects[0], Effect::CancelPending);
        assert_eq!(m.step(), Step::None);

        m.handle(FlowEvent::FeeEstimated {
            generation,
            result: Ok(batch_fee(1)),
        })
        .unwrap();
        assert_eq!(m.session().fee, FeeStatus::Pending);
        assert!(m.handle(FlowEvent::Cancel).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut m = machine();
        assert_eq!(
            m.handle(FlowEvent::Confirm),
            Err(FlowError::InvalidTransition {
                step: Step::None,
                action: "confirm"
            })
        );
        start_transfer(&mut m, VAULT, &[ALICE]);
        assert!(m.handle(FlowEvent::DeferToBasket).is_err());
        assert!(m.handle(FlowEvent::FrameScanned(vec![0; 16])).is_err());
    }

    #[test]
    fn test_watch_only_cannot_start() {
        let mut m = machine();
        assert_eq!(
            m.handle(FlowEvent::Start {
                kind: OperationKind::Transfer,
                wallet_id: WATCH_ONLY,
                chain_id: CHAIN,
            }),
            Err(FlowError::NotPermitted)
        );
    }

    #[test]
    fn test_defer_to_basket() {
        let mut m = machine();
        confirmed(&mut m, MULTISHARD, &[BOB, CHARLIE]);
        let effects = m.handle(FlowEvent::DeferToBasket).unwrap();

        let Effect::SaveToBasket { entries } = &effects[0] else {
            panic!("expected basket entries");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].group_id, entries[1].group_id);
        assert_eq!(entries[0].status, ValidationStatus::Valid { fee: FEE, deposit: 0 });
        assert_eq!(
            effects[1],
            Effect::Finished {
                outcome: FlowOutcome::Deferred { count: 2 }
            }
        );
        assert_eq!(m.step(), Step::None);
    }

    #[test]
    fn test_resume_from_basket_enters_confirm() {
        let mut m = machine();
        confirmed(&mut m, MULTISHARD, &[BOB, CHARLIE]);
        let effects = m.handle(FlowEvent::DeferToBasket).unwrap();
        let Effect::SaveToBasket { entries } = &effects[0] else {
            panic!("expected basket entries");
        };
        let mut entries = entries.clone();
        entries[0].id = 1;
        entries[1].id = 2;

        let selection = BasketSelection {
            entries,
            fee: Some(FeeData {
                fee: FEE,
                total_fee: 2 * FEE,
                multisig_deposit: 0,
            }),
        };
        assert!(m.handle(FlowEvent::ResumeFromBasket(selection)).unwrap().is_empty());
        assert_eq!(m.step(), Step::Confirm);
        assert_eq!(m.session().transactions.len(), 2);
        assert!(m.handle(FlowEvent::DeferToBasket).is_err());
        assert!(matches!(
            m.handle(FlowEvent::Confirm).unwrap()[0],
            Effect::FetchChainContext { .. }
        ));
    }

    fn deposit(threshold: u16) -> Balance {
        DEPOSIT_BASE + DEPOSIT_FACTOR * Balance::from(threshold)
    }

    fn multisig_entry(threshold: u16, id: BasketEntryId) -> BasketEntry {
        let chain = WrapperChain::builder()
            .multisig(MultisigWrapper {
                account: MULTISIG,
                threshold,
                signatories: vec![ALICE, BOB, DAVE],
                signatory: BOB,
            })
            .unwrap()
            .build()
            .unwrap();
        let op = Operation {
            kind: OperationKind::Transfer,
            chain_id: CHAIN,
            origin: MULTISIG,
            call: Call::TransferKeepAlive {
                dest: DAVE,
                value: 10,
            },
            description: String::new(),
            pending: None,
        };
        let resolver = indices();
        let ctx = WrapContext {
            resolver: resolver.as_ref(),
            max_weight: Default::default(),
        };
        let mut entry = BasketEntry::new(MULTISIG_WALLET, &wrap(&op, &chain, &ctx).unwrap(), "group");
        entry.id = id;
        entry
    }

    #[test]
    fn test_deposit_follows_each_threshold() {
        let mut m = machine();
        let selection = BasketSelection {
            entries: vec![multisig_entry(2, 1), multisig_entry(3, 2)],
            fee: None,
        };
        let effects = m.handle(FlowEvent::ResumeFromBasket(selection)).unwrap();
        let thresholds: Vec<u16> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::EstimateDeposit { threshold, .. } => Some(*threshold),
                _ => None,
            })
            .collect();
        assert_eq!(thresholds, vec![2, 3]);

        let generation = generation_of(&effects);
        for threshold in [2, 3] {
            m.handle(FlowEvent::DepositEstimated {
                generation,
                threshold,
                result: Ok(deposit(threshold)),
            })
            .unwrap();
        }
        m.handle(FlowEvent::FeeEstimated {
            generation,
            result: Ok(batch_fee(2)),
        })
        .unwrap();
        assert_eq!(
            m.snapshot().fee,
            FeeStatus::Available(FeeData {
                fee: FEE,
                total_fee: 2 * FEE,
                multisig_deposit: deposit(2) + deposit(3),
            })
        );

        // Covers the threshold-2 deposit but not the threshold-3 one
        let bob = FEE + deposit(3) - 1;
        m.handle(FlowEvent::BalancesFetched {
            generation,
            result: Ok([(MULTISIG, RICH), (BOB, bob)].into_iter().collect()),
        })
        .unwrap();
        assert_eq!(m.step(), Step::Form);
        assert_eq!(
            m.snapshot().validation,
            vec![ValidationError::InsufficientBalanceForDeposit {
                required: FEE + deposit(3),
                available: bob,
            }]
        );
    }

    const TIMEPOINT: Timepoint = Timepoint {
        height: 900,
        index: 1,
    };

    fn pending_call() -> Call {
        Call::TransferKeepAlive {
            dest: DAVE,
            value: 10,
        }
    }

    /// Start `kind` on the multisig wallet against a call with one approval
    fn act_on_pending(m: &mut FlowMachine, kind: OperationKind) -> Vec<Effect> {
        let call_data = pending_call().encode(&KnownCallIndices::polkadot()).unwrap();
        m.handle(FlowEvent::Start {
            kind,
            wallet_id: MULTISIG_WALLET,
            chain_id: CHAIN,
        })
        .unwrap();
        m.handle(FlowEvent::SelectTarget(TargetSelection {
            shards: vec![MULTISIG],
            target: Target::PendingMultisig {
                call_data,
                timepoint: TIMEPOINT,
                approvals: 1,
            },
        }))
        .unwrap();
        m.handle(FlowEvent::SubmitForm(FormValues::default())).unwrap()
    }

    #[test]
    fn test_approval_reuses_timepoint() {
        let mut m = machine();
        let effects = act_on_pending(&mut m, OperationKind::ApproveMultisig);
        assert_eq!(m.step(), Step::WrapAndEstimate);

        let indices = KnownCallIndices::polkadot();
        let expected = Call::AsMulti {
            threshold: 2,
            other_signatories: vec![ALICE, DAVE],
            maybe_timepoint: Some(TIMEPOINT),
            call: Box::new(pending_call()),
            max_weight: SignerConfig::default().max_weight,
        };
        let tx = &m.session().transactions[0];
        assert_eq!(tx.signer, BOB);
        assert_eq!(tx.wrapped_call, expected.encode(&indices).unwrap());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EstimateDeposit { threshold: 2, .. })));
    }

    #[test]
    fn test_rejection_needs_no_deposit() {
        let mut m = machine();
        let effects = act_on_pending(&mut m, OperationKind::RejectMultisig);

        let tx = &m.session().transactions[0];
        assert_eq!(&tx.wrapped_call[..2], &[30, 3]);
        assert!(!tx.multisig.as_ref().unwrap().deposit_required);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::EstimateDeposit { .. })));
        assert_eq!(m.session().deposit(), FeeStatus::Available(0));
    }
}
