//! Error types for wasm-offline-signer
//!
//! Errors are grouped by how the signing flow reacts to them:
//! composition and balance errors are returned as typed values and shown
//! next to the form, fee and transport problems become status flags on the
//! session, and submission errors are passed through untouched.

use crate::flow::Step;
use crate::types::{AccountId, Balance};
use thiserror::Error;
use wasm_bindgen::prelude::*;

/// Main error type for wasm-offline-signer operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("SCALE decode error: {0}")]
    ScaleDecodeError(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error(transparent)]
    Fee(#[from] FeeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Basket entry {0} not found")]
    BasketEntryNotFound(u64),
}

/// Call encoding failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{0} pallet not found")]
    UnknownPallet(String),
    #[error("{0}.{1} not found")]
    UnknownCall(String, String),
    #[error("Batch cannot be empty")]
    EmptyBatch,
    #[error("Nested batch not supported")]
    NestedBatch,
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Wrapper composition failures. Fatal to the current attempt; the flow
/// returns to the form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositionError {
    #[error("Unsupported composition: proxy of proxy")]
    ProxyOfProxy,
    #[error("Unsupported composition: multisig of multisig")]
    MultisigOfMultisig,
    #[error("Unsupported composition: multisig must wrap the proxy call, not the reverse")]
    MultisigBeforeProxy,
    #[error("Multisig account does not match the proxy delegate")]
    OriginMismatch,
    #[error("No resolvable signatory for origin account")]
    UnresolvableSignatory,
    #[error("Signatory is not a member of the multisig account")]
    SignatoryNotMember,
    #[error("Invalid multisig threshold {threshold} for {signatories} signatories")]
    InvalidThreshold { threshold: u16, signatories: usize },
    #[error("Signatory {0} is listed more than once")]
    DuplicateSignatory(AccountId),
    #[error("Pending multisig call but the signing account is not a multisig")]
    NotMultisig,
    #[error("Rejecting a multisig call needs its timepoint")]
    MissingTimepoint,
    #[error("Wallet {0} not found")]
    WalletNotFound(u32),
}

/// Failures while wrapping an operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WrapError {
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Fee estimation failures. Recoverable: the flow stays in place and retries
/// on the next relevant input change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("Fee unavailable: {0}")]
    Unavailable(String),
}

/// Balance validation failures, surfaced before confirmation
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValidationError {
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: Balance, available: Balance },
    #[error("Insufficient balance for fee: need {required}, have {available}")]
    InsufficientBalanceForFee { required: Balance, available: Balance },
    #[error("Insufficient balance for multisig deposit: need {required}, have {available}")]
    InsufficientBalanceForDeposit { required: Balance, available: Balance },
    #[error("Wallet is not permitted to perform this operation")]
    NotPermitted,
    #[error("Wrapping is no longer resolvable: {reason}")]
    Unresolvable { reason: String },
}

/// Codec/transport failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Nothing to encode")]
    EmptyPayload,
    #[error("Frame capacity {0} is too small, need at least {1} bytes")]
    FrameCapacityTooSmall(usize, usize),
    #[error("Payload of {0} bytes needs more symbols than the code supports")]
    PayloadTooLarge(usize),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Frame belongs to a different transport stream")]
    FrameMismatch,
    #[error("Symbol index {index} out of range (total {total})")]
    SymbolOutOfRange { index: u32, total: u32 },
    #[error("Invalid bulk payload: {0}")]
    InvalidBulk(String),
}

/// Broadcast failures, reported verbatim to the caller
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum SubmissionError {
    #[error("Extrinsic rejected: {0}")]
    Rejected(String),
    #[error("Submission failed: {0}")]
    Network(String),
}

/// Collaborator (node, balance service, storage) failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Node unreachable: {0}")]
    Unreachable(String),
    #[error("Unexpected response: {0}")]
    BadResponse(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Flow state machine failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("{action} is not valid in step {step:?}")]
    InvalidTransition { step: Step, action: &'static str },
    #[error("No active session {0}")]
    NoActiveSession(u64),
    #[error("Expected {expected} signatures, received {received}")]
    SignatureCountMismatch { expected: usize, received: usize },
    #[error("Wallet cannot perform this operation")]
    NotPermitted,
    #[error("Missing input: {0}")]
    MissingInput(&'static str),
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<WrapError> for SignerError {
    fn from(err: WrapError) -> Self {
        match err {
            WrapError::Composition(e) => SignerError::Composition(e),
            WrapError::Encode(e) => SignerError::Encode(e),
        }
    }
}

impl From<WrapError> for FlowError {
    fn from(err: WrapError) -> Self {
        match err {
            WrapError::Composition(e) => FlowError::Composition(e),
            WrapError::Encode(e) => FlowError::Encode(e),
        }
    }
}

impl From<&str> for SignerError {
    fn from(s: &str) -> Self {
        SignerError::InvalidInput(s.to_string())
    }
}

impl From<String> for SignerError {
    fn from(s: String) -> Self {
        SignerError::InvalidInput(s)
    }
}

impl From<parity_scale_codec::Error> for SignerError {
    fn from(err: parity_scale_codec::Error) -> Self {
        SignerError::ScaleDecodeError(err.to_string())
    }
}

impl From<parity_scale_codec::Error> for TransportError {
    fn from(err: parity_scale_codec::Error) -> Self {
        TransportError::InvalidBulk(err.to_string())
    }
}

// REQUIRED: Converts to JS Error with stack trace
impl From<SignerError> for JsValue {
    fn from(err: SignerError) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

impl From<FlowError> for JsValue {
    fn from(err: FlowError) -> Self {
        SignerError::from(err).into()
    }
}

impl From<TransportError> for JsValue {
    fn from(err: TransportError) -> Self {
        SignerError::from(err).into()
    }
}
