//! wasm-offline-signer: air-gapped signing for Polkadot-family chains
//!
//! This crate provides:
//! - Call composition for staking, governance, proxy and transfer operations
//! - Wrapping of calls in proxy and multisig layers for the signing account
//! - Fee and multisig deposit estimation, balance validation
//! - Fountain-coded QR transport of signing payloads and signatures
//! - The signing flow state machine and the deferred-signing basket
//!
//! # Architecture
//!
//! The crate follows a two-layer architecture:
//! - **Core layer** (`src/*.rs`): Pure Rust logic, no WASM dependencies
//! - **WASM layer** (`src/wasm/*.rs`): Thin wrappers with `#[wasm_bindgen]`

pub mod address;
pub mod basket;
pub mod call;
pub mod chain;
pub mod config;
pub mod error;
pub mod fee;
pub mod flow;
pub mod operation;
pub mod payload;
pub mod permission;
pub mod transport;
pub mod types;
pub mod validation;
pub mod wallet;
pub mod wasm;
pub mod wrapper;

#[cfg(test)]
mod test_utils;

// Re-export main types for convenience
pub use address::{decode_ss58, encode_ss58, Ss58Prefix};
pub use basket::{BasketEntry, BasketQueue, BasketSelection, ValidationStatus};
pub use config::SignerConfig;
pub use error::{FlowError, SignerError, TransportError};
pub use flow::{Effect, FlowDriver, FlowEvent, FlowMachine, FlowRegistry, SessionSnapshot, Step};
pub use transport::{encode_payloads, Decoder, Encoder, TransportConfig, TransportFrame};
pub use types::{AccountId, Balance, ChainId, WalletId};
pub use wrapper::{wrap, WrappedTransaction};
