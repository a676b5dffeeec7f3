//! Wrapping engine
//!
//! An operation from a proxied account is nested in `proxy.proxy`; an
//! operation whose (possibly proxied) origin is a multisig account is then
//! nested in `multisig.as_multi`. The [`WrapperChain`] records which of the
//! two apply, and [`wrap`] turns an operation plus a chain into the call that
//! is actually signed.

mod resolve;

pub use resolve::resolve_wrappers;

use crate::call::{call_hash, Call, CallIndexResolver, ProxyType};
use crate::error::{CompositionError, WrapError};
use crate::operation::{Operation, OperationKind};
use crate::types::{AccountId, Weight};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyWrapper {
    /// Account the call is dispatched as
    pub proxied: AccountId,
    /// Account that signs `proxy.proxy`
    pub delegate: AccountId,
    pub proxy_type: ProxyType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigWrapper {
    /// Multisig address
    pub account: AccountId,
    pub threshold: u16,
    pub signatories: Vec<AccountId>,
    /// Member that initiates and signs `as_multi`
    pub signatory: AccountId,
}

impl MultisigWrapper {
    /// Signatories other than the initiator, sorted by account bytes
    pub fn other_signatories(&self) -> Vec<AccountId> {
        let mut others: Vec<AccountId> = self
            .signatories
            .iter()
            .filter(|s| **s != self.signatory)
            .copied()
            .collect();
        others.sort();
        others.dedup();
        others
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Wrapper {
    Proxy(ProxyWrapper),
    Multisig(MultisigWrapper),
}

/// Wrapper layout, used to group transactions of identical shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Topology {
    Direct,
    Proxy,
    Multisig,
    ProxyMultisig,
}

/// Ordered wrappers: at most one proxy, at most one multisig, proxy first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Wrapper>", into = "Vec<Wrapper>")]
pub struct WrapperChain {
    wrappers: Vec<Wrapper>,
}

impl WrapperChain {
    pub fn empty() -> Self {
        WrapperChain::default()
    }

    pub fn builder() -> WrapperChainBuilder {
        WrapperChainBuilder::default()
    }

    pub fn wrappers(&self) -> &[Wrapper] {
        &self.wrappers
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    pub fn proxy(&self) -> Option<&ProxyWrapper> {
        self.wrappers.iter().find_map(|w| match w {
            Wrapper::Proxy(p) => Some(p),
            Wrapper::Multisig(_) => None,
        })
    }

    pub fn multisig(&self) -> Option<&MultisigWrapper> {
        self.wrappers.iter().find_map(|w| match w {
            Wrapper::Multisig(m) => Some(m),
            Wrapper::Proxy(_) => None,
        })
    }

    /// Account that signs the outermost call
    pub fn signer(&self, origin: AccountId) -> AccountId {
        match (self.proxy(), self.multisig()) {
            (_, Some(m)) => m.signatory,
            (Some(p), None) => p.delegate,
            (None, None) => origin,
        }
    }

    pub fn topology(&self) -> Topology {
        match (self.proxy().is_some(), self.multisig().is_some()) {
            (false, false) => Topology::Direct,
            (true, false) => Topology::Proxy,
            (false, true) => Topology::Multisig,
            (true, true) => Topology::ProxyMultisig,
        }
    }
}

impl TryFrom<Vec<Wrapper>> for WrapperChain {
    type Error = CompositionError;

    fn try_from(wrappers: Vec<Wrapper>) -> Result<Self, Self::Error> {
        wrappers
            .into_iter()
            .try_fold(WrapperChain::builder(), |builder, wrapper| match wrapper {
                Wrapper::Proxy(p) => builder.proxy(p),
                Wrapper::Multisig(m) => builder.multisig(m),
            })?
            .build()
    }
}

impl From<WrapperChain> for Vec<Wrapper> {
    fn from(chain: WrapperChain) -> Self {
        chain.wrappers
    }
}

/// The only way to construct a non-empty [`WrapperChain`]
#[derive(Debug, Clone, Default)]
pub struct WrapperChainBuilder {
    proxy: Option<ProxyWrapper>,
    multisig: Option<MultisigWrapper>,
}

impl WrapperChainBuilder {
    pub fn proxy(mut self, proxy: ProxyWrapper) -> Result<Self, CompositionError> {
        if self.proxy.is_some() {
            return Err(CompositionError::ProxyOfProxy);
        }
        if self.multisig.is_some() {
            return Err(CompositionError::MultisigBeforeProxy);
        }
        self.proxy = Some(proxy);
        Ok(self)
    }

    pub fn multisig(mut self, multisig: MultisigWrapper) -> Result<Self, CompositionError> {
        if self.multisig.is_some() {
            return Err(CompositionError::MultisigOfMultisig);
        }
        let signatories = multisig.signatories.len();
        if multisig.threshold < 2 || usize::from(multisig.threshold) > signatories {
            return Err(CompositionError::InvalidThreshold {
                threshold: multisig.threshold,
                signatories,
            });
        }
        if !multisig.signatories.contains(&multisig.signatory) {
            return Err(CompositionError::SignatoryNotMember);
        }
        let mut seen = multisig.signatories.clone();
        seen.sort();
        if let Some(pair) = seen.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(CompositionError::DuplicateSignatory(pair[0]));
        }
        self.multisig = Some(multisig);
        Ok(self)
    }

    pub fn build(self) -> Result<WrapperChain, CompositionError> {
        if let (Some(p), Some(m)) = (&self.proxy, &self.multisig) {
            if p.delegate != m.account {
                return Err(CompositionError::OriginMismatch);
            }
        }
        let wrappers = self
            .proxy
            .map(Wrapper::Proxy)
            .into_iter()
            .chain(self.multisig.map(Wrapper::Multisig))
            .collect();
        Ok(WrapperChain { wrappers })
    }
}

/// On-chain multisig data co-signers need to approve the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigEnvelope {
    /// Call wrapped by `as_multi`
    pub call_data: Vec<u8>,
    pub call_hash: [u8; 32],
    pub threshold: u16,
    pub signatories: Vec<AccountId>,
    /// Approvals stay below the threshold, so the deposit is reserved
    pub deposit_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedTransaction {
    pub core: Operation,
    /// SCALE call data of the outermost call
    pub wrapped_call: Vec<u8>,
    pub signer: AccountId,
    pub wrappers: WrapperChain,
    pub multisig: Option<MultisigEnvelope>,
}

impl WrappedTransaction {
    /// Shape key: transactions with equal shape have equal fees
    pub fn shape(&self) -> (Topology, usize) {
        (self.wrappers.topology(), self.wrapped_call.len())
    }
}

/// Inputs to [`wrap`] besides the operation and chain
#[derive(Clone, Copy)]
pub struct WrapContext<'a> {
    pub resolver: &'a dyn CallIndexResolver,
    pub max_weight: Weight,
}

/// Nest `operation` in the wrappers of `chain`
///
/// The result depends only on the arguments, so re-wrapping the same input
/// yields byte-identical call data.
pub fn wrap(
    operation: &Operation,
    chain: &WrapperChain,
    ctx: &WrapContext<'_>,
) -> Result<WrappedTransaction, WrapError> {
    let mut call = operation.call.clone();
    let mut origin = operation.origin;
    let mut envelope = None;

    for wrapper in chain.wrappers() {
        match wrapper {
            Wrapper::Proxy(p) => {
                if p.proxied != origin {
                    return Err(CompositionError::OriginMismatch.into());
                }
                call = Call::Proxy {
                    real: p.proxied,
                    force_proxy_type: Some(p.proxy_type),
                    call: Box::new(call),
                };
                origin = p.delegate;
            }
            Wrapper::Multisig(m) => {
                if m.account != origin {
                    return Err(CompositionError::OriginMismatch.into());
                }
                let call_data = call.encode(ctx.resolver)?;
                let call_hash = call_hash(&call_data);
                let mut signatories = m.signatories.clone();
                signatories.sort();
                signatories.dedup();

                let pending = operation.pending;
                let approvals = pending.map_or(0, |p| p.approvals);
                let (outer, deposit_required) = if operation.kind == OperationKind::RejectMultisig {
                    let timepoint = pending.ok_or(CompositionError::MissingTimepoint)?.timepoint;
                    let cancel = Call::CancelAsMulti {
                        threshold: m.threshold,
                        other_signatories: m.other_signatories(),
                        timepoint,
                        call_hash,
                    };
                    (cancel, false)
                } else {
                    let as_multi = Call::AsMulti {
                        threshold: m.threshold,
                        other_signatories: m.other_signatories(),
                        maybe_timepoint: pending.map(|p| p.timepoint),
                        call: Box::new(call),
                        max_weight: ctx.max_weight,
                    };
                    (as_multi, approvals < m.threshold)
                };

                envelope = Some(MultisigEnvelope {
                    call_data,
                    call_hash,
                    threshold: m.threshold,
                    signatories,
                    deposit_required,
                });
                call = outer;
                origin = m.signatory;
            }
        }
    }

    if operation.kind.acts_on_pending() && envelope.is_none() {
        return Err(CompositionError::NotMultisig.into());
    }

    let wrapped_call = call.encode(ctx.resolver)?;
    debug!(
        origin = %operation.origin,
        signer = %origin,
        topology = ?chain.topology(),
        len = wrapped_call.len(),
        "Wrapped operation"
    );

    Ok(WrappedTransaction {
        core: operation.clone(),
        wrapped_call,
        signer: origin,
        wrappers: chain.clone(),
        multisig: envelope,
    })
}
