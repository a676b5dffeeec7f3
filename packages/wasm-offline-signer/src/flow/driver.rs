//! Async executor for one flow
//!
//! The driver owns a [`FlowMachine`], reads events from an inbox, runs the
//! machine's effects against the collaborators and feeds their results back
//! in as events. Everything is polled from one task, so the session is never
//! touched concurrently.

use super::machine::{Effect, FlowEvent, FlowMachine, FlowOutcome};
use super::session::SessionSnapshot;
use crate::chain::{fetch_balances, fetch_chain_context, BalanceService, BasketStorage, ChainClient};
use crate::error::FlowError;
use crate::fee::{estimate_batch, estimate_deposit, FeeParams};
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the driver publishes after each event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowUpdate {
    Snapshot(SessionSnapshot),
    Rejected(FlowError),
    Finished(FlowOutcome),
}

type Pending = FuturesUnordered<BoxFuture<'static, Option<FlowEvent>>>;

/// Basket writes. They outlive the session that issued them, so a cancel
/// never drops them.
type Persisting = FuturesUnordered<BoxFuture<'static, ()>>;

pub struct FlowDriver<C: ?Sized, B: ?Sized, S: ?Sized> {
    machine: FlowMachine,
    client: Arc<C>,
    balances: Arc<B>,
    basket: Arc<S>,
}

impl<C, B, S> FlowDriver<C, B, S>
where
    C: ChainClient + ?Sized + 'static,
    B: BalanceService + ?Sized + 'static,
    S: BasketStorage + ?Sized + 'static,
{
    pub fn new(machine: FlowMachine, client: Arc<C>, balances: Arc<B>, basket: Arc<S>) -> Self {
        FlowDriver {
            machine,
            client,
            balances,
            basket,
        }
    }

    /// Process events until the inbox closes and in-flight work has drained
    ///
    /// Returns the machine so the caller can inspect the final state.
    pub async fn run(
        mut self,
        mut inbox: UnboundedReceiver<FlowEvent>,
        outbox: UnboundedSender<FlowUpdate>,
    ) -> FlowMachine {
        let mut pending: Pending = FuturesUnordered::new();
        let mut persisting: Persisting = FuturesUnordered::new();
        let mut inbox_open = true;

        loop {
            let idle = pending.is_empty() && persisting.is_empty();
            let event = match (inbox_open, idle) {
                (false, true) => break,
                (true, true) => {
                    let event = inbox.next().await;
                    if event.is_none() {
                        inbox_open = false;
                    }
                    event
                }
                (false, false) => futures::select! {
                    done = pending.select_next_some() => done,
                    () = persisting.select_next_some() => None,
                },
                (true, false) => futures::select! {
                    event = inbox.next() => {
                        if event.is_none() {
                            inbox_open = false;
                        }
                        event
                    }
                    done = pending.select_next_some() => done,
                    () = persisting.select_next_some() => None,
                },
            };
            if let Some(event) = event {
                self.dispatch(event, &mut pending, &mut persisting, &outbox);
            }
        }

        debug!(session = self.machine.session().id, "Flow driver stopped");
        self.machine
    }

    fn dispatch(
        &mut self,
        event: FlowEvent,
        pending: &mut Pending,
        persisting: &mut Persisting,
        outbox: &UnboundedSender<FlowUpdate>,
    ) {
        match self.machine.handle(event) {
            Ok(effects) => {
                for effect in effects {
                    self.execute(effect, pending, persisting, outbox);
                }
                // Nobody listening is not an error for the flow
                let _ = outbox.unbounded_send(FlowUpdate::Snapshot(self.machine.snapshot()));
            }
            Err(e) => {
                warn!(session = self.machine.session().id, error = %e, "Event rejected");
                let _ = outbox.unbounded_send(FlowUpdate::Rejected(e));
            }
        }
    }

    fn execute(
        &self,
        effect: Effect,
        pending: &mut Pending,
        persisting: &mut Persisting,
        outbox: &UnboundedSender<FlowUpdate>,
    ) {
        match effect {
            Effect::EstimateFee {
                generation,
                transactions,
            } => {
                let client = Arc::clone(&self.client);
                let params = FeeParams::from(self.machine.config());
                pending.push(
                    async move {
                        let result = estimate_batch(&transactions, params, client.as_ref()).await;
                        Some(FlowEvent::FeeEstimated { generation, result })
                    }
                    .boxed(),
                );
            }
            Effect::EstimateDeposit {
                generation,
                threshold,
            } => {
                let client = Arc::clone(&self.client);
                pending.push(
                    async move {
                        let result = estimate_deposit(threshold, client.as_ref()).await;
                        Some(FlowEvent::DepositEstimated {
                            generation,
                            threshold,
                            result,
                        })
                    }
                    .boxed(),
                );
            }
            Effect::FetchBalances {
                generation,
                chain_id,
                accounts,
            } => {
                let balances = Arc::clone(&self.balances);
                pending.push(
                    async move {
                        let result = fetch_balances(balances.as_ref(), &chain_id, &accounts).await;
                        Some(FlowEvent::BalancesFetched { generation, result })
                    }
                    .boxed(),
                );
            }
            Effect::FetchChainContext {
                generation,
                signers,
            } => {
                let client = Arc::clone(&self.client);
                pending.push(
                    async move {
                        let result = fetch_chain_context(client.as_ref(), &signers).await;
                        Some(FlowEvent::ChainContextFetched { generation, result })
                    }
                    .boxed(),
                );
            }
            Effect::Submit {
                generation,
                extrinsics,
            } => {
                let client = Arc::clone(&self.client);
                pending.push(
                    async move {
                        let mut receipts = Vec::with_capacity(extrinsics.len());
                        for extrinsic in &extrinsics {
                            match client.submit(&extrinsic.bytes).await {
                                Ok(receipt) => receipts.push(receipt),
                                Err(e) => {
                                    return Some(FlowEvent::Submitted {
                                        generation,
                                        result: Err(e),
                                    })
                                }
                            }
                        }
                        Some(FlowEvent::Submitted {
                            generation,
                            result: Ok(receipts),
                        })
                    }
                    .boxed(),
                );
            }
            Effect::SaveToBasket { entries } => {
                let basket = Arc::clone(&self.basket);
                persisting.push(
                    async move {
                        match basket.insert(entries).await {
                            Ok(ids) => info!(ids = ?ids, "Saved to basket"),
                            Err(e) => warn!(error = %e, "Saving to basket failed"),
                        }
                    }
                    .boxed(),
                );
            }
            Effect::CancelPending => {
                if !pending.is_empty() {
                    debug!(dropped = pending.len(), "Dropping in-flight work");
                }
                *pending = FuturesUnordered::new();
            }
            Effect::Finished { outcome } => {
                if let FlowOutcome::Submitted { basket_entries, .. } = &outcome {
                    if !basket_entries.is_empty() {
                        let basket = Arc::clone(&self.basket);
                        let ids = basket_entries.clone();
                        persisting.push(
                            async move {
                                for id in ids {
                                    if let Err(e) = basket.remove(id).await {
                                        warn!(id, error = %e, "Removing signed basket entry failed");
                                    }
                                }
                            }
                            .boxed(),
                        );
                    }
                }
                let _ = outbox.unbounded_send(FlowUpdate::Finished(outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basket::{BasketEntry, BasketSelection, ValidationStatus};
    use crate::config::SignerConfig;
    use crate::flow::Step;
    use crate::operation::{FormValues, OperationKind, Target, TargetSelection};
    use crate::payload::MultiSignature;
    use crate::test_utils::*;
    use crate::transport::{encode, TransportConfig};
    use futures::channel::mpsc;
    use parity_scale_codec::Encode;

    fn driver(
        config: SignerConfig,
    ) -> (
        FlowDriver<MockChainClient, MockBalances, MemoryBasketStorage>,
        Arc<MockChainClient>,
        Arc<MemoryBasketStorage>,
    ) {
        let client = Arc::new(MockChainClient::new());
        let balances = Arc::new(MockBalances::with(&[(ALICE, 1_000_000_000_000)]));
        let basket = Arc::new(MemoryBasketStorage::default());
        let machine = FlowMachine::new(config, Arc::new(fixture_store()), indices());
        (
            FlowDriver::new(machine, Arc::clone(&client), balances, Arc::clone(&basket)),
            client,
            basket,
        )
    }

    fn start_events() -> Vec<FlowEvent> {
        vec![
            FlowEvent::Start {
                kind: OperationKind::Transfer,
                wallet_id: VAULT,
                chain_id: CHAIN,
            },
            FlowEvent::SelectTarget(TargetSelection {
                shards: vec![ALICE],
                target: Target::Account { account: DAVE },
            }),
            FlowEvent::SubmitForm(FormValues {
                amount: 10,
                ..Default::default()
            }),
        ]
    }

    async fn wait_for_step(updates: &mut mpsc::UnboundedReceiver<FlowUpdate>, step: Step) -> SessionSnapshot {
        while let Some(update) = updates.next().await {
            if let FlowUpdate::Snapshot(snapshot) = update {
                if snapshot.step == step {
                    return snapshot;
                }
            }
        }
        panic!("driver stopped before reaching {:?}", step);
    }

    async fn wait_for_outcome(updates: &mut mpsc::UnboundedReceiver<FlowUpdate>) -> FlowOutcome {
        while let Some(update) = updates.next().await {
            if let FlowUpdate::Finished(outcome) = update {
                return outcome;
            }
        }
        panic!("driver stopped without an outcome");
    }

    fn signature_frames() -> Vec<Vec<u8>> {
        encode(&MultiSignature::Sr25519([9u8; 64]).encode(), &TransportConfig::default())
            .unwrap()
            .iter()
            .map(|f| f.to_bytes())
            .collect()
    }

    #[tokio::test]
    async fn test_transfer_is_submitted() {
        let config = SignerConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let (driver, client, _) = driver(config);
        client.set_nonce(ALICE, 7);
        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();

        let user = async move {
            for event in start_events() {
                events.unbounded_send(event).unwrap();
            }
            wait_for_step(&mut updates, Step::Confirm).await;
            events.unbounded_send(FlowEvent::Confirm).unwrap();

            loop {
                let snapshot = wait_for_step(&mut updates, Step::TransportToSigner).await;
                if !snapshot.frames.is_empty() {
                    break;
                }
            }
            for frame in signature_frames() {
                events.unbounded_send(FlowEvent::FrameScanned(frame)).unwrap();
            }
            wait_for_outcome(&mut updates).await
        };

        let (machine, outcome) = futures::join!(driver.run(inbox, outbox), user);
        assert!(matches!(outcome, FlowOutcome::Submitted { ref receipts, .. } if receipts.len() == 1));
        assert_eq!(machine.step(), Step::None);
        assert_eq!(client.submitted.lock().unwrap().len(), 1);
        assert_eq!(client.fee_queries(), 1);
    }

    #[tokio::test]
    async fn test_rejected_event_is_published() {
        let (driver, _, _) = driver(SignerConfig::default());
        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();

        events.unbounded_send(FlowEvent::Confirm).unwrap();
        drop(events);
        driver.run(inbox, outbox).await;

        assert!(matches!(
            updates.next().await,
            Some(FlowUpdate::Rejected(FlowError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_deferred_entries_reach_storage() {
        let (driver, _, basket) = driver(SignerConfig::default());
        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();

        let user = async move {
            for event in start_events() {
                events.unbounded_send(event).unwrap();
            }
            wait_for_step(&mut updates, Step::Confirm).await;
            events.unbounded_send(FlowEvent::DeferToBasket).unwrap();
            let outcome = wait_for_outcome(&mut updates).await;
            drop(events);
            outcome
        };

        let (_, outcome) = futures::join!(driver.run(inbox, outbox), user);
        assert_eq!(outcome, FlowOutcome::Deferred { count: 1 });

        let stored = basket.all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(matches!(stored[0].status, ValidationStatus::Valid { .. }));
    }

    #[tokio::test]
    async fn test_cancel_keeps_deferred_entries_in_flight() {
        let (driver, _, basket) = driver(SignerConfig::default());
        basket.hold_inserts(true);
        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();

        let storage = Arc::clone(&basket);
        let user = async move {
            for event in start_events() {
                events.unbounded_send(event).unwrap();
            }
            wait_for_step(&mut updates, Step::Confirm).await;
            events.unbounded_send(FlowEvent::DeferToBasket).unwrap();
            assert_eq!(wait_for_outcome(&mut updates).await, FlowOutcome::Deferred { count: 1 });

            // The insert is still running when the next session is cancelled
            events.unbounded_send(start_events().remove(0)).unwrap();
            events.unbounded_send(FlowEvent::Cancel).unwrap();
            assert_eq!(wait_for_outcome(&mut updates).await, FlowOutcome::Cancelled);
            storage.hold_inserts(false);
            drop(events);
        };

        futures::join!(driver.run(inbox, outbox), user);
        assert_eq!(basket.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_signed_basket_entries_are_removed() {
        let config = SignerConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let (driver, _, basket) = driver(config);

        let op = crate::operation::Operation {
            kind: OperationKind::Transfer,
            chain_id: CHAIN,
            origin: ALICE,
            call: crate::call::Call::TransferKeepAlive {
                dest: DAVE,
                value: 10,
            },
            description: String::new(),
            pending: None,
        };
        let mut entry = BasketEntry {
            id: 0,
            initiator_wallet: VAULT,
            core: op,
            wrappers: crate::wrapper::WrapperChain::empty(),
            group_id: "g".to_string(),
            status: ValidationStatus::Valid { fee: FEE, deposit: 0 },
        };
        let ids = basket.insert(vec![entry.clone()]).await.unwrap();
        entry.id = ids[0];

        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();
        let user = async move {
            events
                .unbounded_send(FlowEvent::ResumeFromBasket(BasketSelection {
                    entries: vec![entry],
                    fee: None,
                }))
                .unwrap();
            wait_for_step(&mut updates, Step::Confirm).await;
            events.unbounded_send(FlowEvent::Confirm).unwrap();
            loop {
                let snapshot = wait_for_step(&mut updates, Step::TransportToSigner).await;
                if !snapshot.frames.is_empty() {
                    break;
                }
            }
            for frame in signature_frames() {
                events.unbounded_send(FlowEvent::FrameScanned(frame)).unwrap();
            }
            let outcome = wait_for_outcome(&mut updates).await;
            drop(events);
            outcome
        };

        let (_, outcome) = futures::join!(driver.run(inbox, outbox), user);
        assert!(matches!(
            outcome,
            FlowOutcome::Submitted { ref basket_entries, .. } if basket_entries == &ids
        ));
        assert!(basket.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_never_submits() {
        let (driver, client, _) = driver(SignerConfig::default());
        let (events, inbox) = mpsc::unbounded();
        let (outbox, mut updates) = mpsc::unbounded();

        for event in start_events() {
            events.unbounded_send(event).unwrap();
        }
        events.unbounded_send(FlowEvent::Cancel).unwrap();
        drop(events);
        let machine = driver.run(inbox, outbox).await;

        let mut outcomes = Vec::new();
        while let Ok(Some(update)) = updates.try_next() {
            if let FlowUpdate::Finished(outcome) = update {
                outcomes.push(outcome);
            }
        }
        assert_eq!(outcomes, vec![FlowOutcome::Cancelled]);
        assert_eq!(machine.step(), Step::None);
        assert!(client.submitted.lock().unwrap().is_empty());
    }
}
