//! Active sessions, one per wallet

use super::machine::{Effect, FlowEvent, FlowMachine};
use super::session::{SessionId, SessionSnapshot};
use super::Step;
use crate::basket::BasketSelection;
use crate::call::CallIndexResolver;
use crate::config::SignerConfig;
use crate::error::FlowError;
use crate::operation::OperationKind;
use crate::types::{ChainId, WalletId};
use crate::wallet::WalletStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Owner of every running flow
///
/// Events are addressed by session id, so a late scan or estimate can never
/// land in a session it was not meant for.
pub struct FlowRegistry {
    config: SignerConfig,
    wallets: Arc<dyn WalletStore + Send + Sync>,
    resolver: Arc<dyn CallIndexResolver + Send + Sync>,
    sessions: BTreeMap<SessionId, FlowMachine>,
    by_wallet: BTreeMap<WalletId, SessionId>,
    next_id: SessionId,
}

impl FlowRegistry {
    pub fn new(
        config: SignerConfig,
        wallets: Arc<dyn WalletStore + Send + Sync>,
        resolver: Arc<dyn CallIndexResolver + Send + Sync>,
    ) -> Self {
        FlowRegistry {
            config,
            wallets,
            resolver,
            sessions: BTreeMap::new(),
            by_wallet: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Start a flow for `wallet_id`
    ///
    /// A session already running for the wallet is cancelled first; the
    /// effects of that teardown are returned with the new session id.
    pub fn start(
        &mut self,
        kind: OperationKind,
        wallet_id: WalletId,
        chain_id: ChainId,
    ) -> Result<(SessionId, Vec<Effect>), FlowError> {
        self.open(wallet_id, FlowEvent::Start {
            kind,
            wallet_id,
            chain_id,
        })
    }

    /// Start a session from basket entries
    pub fn resume(&mut self, selection: BasketSelection) -> Result<(SessionId, Vec<Effect>), FlowError> {
        let wallet_id = selection
            .entries
            .first()
            .map(|e| e.initiator_wallet)
            .ok_or(FlowError::MissingInput("basket entries"))?;
        self.open(wallet_id, FlowEvent::ResumeFromBasket(selection))
    }

    fn open(&mut self, wallet_id: WalletId, event: FlowEvent) -> Result<(SessionId, Vec<Effect>), FlowError> {
        let id = self.next_id;
        let mut machine = FlowMachine::new(
            self.config.clone(),
            Arc::clone(&self.wallets),
            Arc::clone(&self.resolver),
        )
        .with_session_id(id);
        let mut effects = machine.handle(event)?;
        self.next_id += 1;

        if let Some(previous) = self.by_wallet.insert(wallet_id, id) {
            if let Some(mut old) = self.sessions.remove(&previous) {
                info!(session = previous, wallet = wallet_id, "Replacing active session");
                let mut teardown = old.handle(FlowEvent::Cancel)?;
                teardown.append(&mut effects);
                effects = teardown;
            }
        }
        self.sessions.insert(id, machine);
        Ok((id, effects))
    }

    /// Feed an event to a session; finished sessions are dropped
    pub fn handle(&mut self, id: SessionId, event: FlowEvent) -> Result<Vec<Effect>, FlowError> {
        let machine = self
            .sessions
            .get_mut(&id)
            .ok_or(FlowError::NoActiveSession(id))?;
        let effects = machine.handle(event)?;
        if machine.step() == Step::None {
            self.sessions.remove(&id);
            self.by_wallet.retain(|_, session| *session != id);
        }
        Ok(effects)
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, FlowError> {
        self.sessions
            .get(&id)
            .map(FlowMachine::snapshot)
            .ok_or(FlowError::NoActiveSession(id))
    }

    pub fn active_session(&self, wallet_id: WalletId) -> Option<SessionId> {
        self.by_wallet.get(&wallet_id).copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
