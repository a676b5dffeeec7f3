//! WASM bindings for wasm-offline-signer
//!
//! This module contains thin wrappers with #[wasm_bindgen] that delegate
//! to the core Rust implementations.

pub mod flow;
pub mod transport;
pub mod try_into_js_value;

// Re-export WASM types
pub use flow::WasmSigningFlow;
pub use transport::{TransportNamespace, WasmFrameDecoder};
