//! WASM bindings for the signing flow
//!
//! Thin wrapper around [`FlowMachine`]. Every call returns the effects the
//! host must run; their results come back through `dispatch` as completion
//! events carrying the generation they were requested under.

use crate::basket::BasketSelection;
use crate::call::{metadata_from_bytes, CallIndexResolver, KnownCallIndices};
use crate::chain::SubmissionReceipt;
use crate::config::SignerConfig;
use crate::error::{ChainError, FeeError, SubmissionError};
use crate::fee::BatchFee;
use crate::flow::{FlowEvent, FlowMachine};
use crate::operation::{FormValues, OperationKind, TargetSelection};
use crate::types::{deserialize_u128, AccountId, Balance, ChainContext, ChainId, WalletId};
use crate::wallet::StaticWalletStore;
use crate::wasm::try_into_js_value::to_js;
use crate::SignerError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wasm_bindgen::prelude::*;

fn from_js<T: DeserializeOwned>(value: JsValue, what: &str) -> Result<T, SignerError> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| SignerError::InvalidInput(format!("Invalid {}: {}", what, e)))
}

fn is_absent(value: &JsValue) -> bool {
    value.is_undefined() || value.is_null()
}

/// Result of host-side work, as reported by JS
///
/// Exactly one of `value` or `error` is expected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Completion<T, E = String> {
    generation: u64,
    value: Option<T>,
    error: Option<E>,
}

impl<T, E> Completion<T, E> {
    fn into_result(self) -> Result<(u64, Result<T, E>), SignerError> {
        match (self.value, self.error) {
            (_, Some(e)) => Ok((self.generation, Err(e))),
            (Some(v), None) => Ok((self.generation, Ok(v))),
            (None, None) => Err(SignerError::InvalidInput(
                "Completion needs a value or an error".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct JsBalance(#[serde(deserialize_with = "deserialize_u128")] Balance);

/// Events accepted by `dispatch`, tagged by `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum JsFlowEvent {
    #[serde(rename_all = "camelCase")]
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
    /// Hex encoded frame
    FrameScanned { frame: String },
    RegenerateTransport,
    #[serde(rename_all = "camelCase")]
    Tick { elapsed_ms: u64 },
    Cancel,
    ResumeFromBasket(BasketSelection),
    FeeEstimated(Completion<BatchFee>),
    DepositEstimated {
        threshold: u16,
        #[serde(flatten)]
        completion: Completion<JsBalance>,
    },
    BalancesFetched(Completion<BTreeMap<AccountId, JsBalance>>),
    ChainContextFetched(Completion<ChainContext>),
    Submitted(Completion<Vec<SubmissionReceipt>, SubmissionError>),
}

impl TryFrom<JsFlowEvent> for FlowEvent {
    type Error = SignerError;

    fn try_from(event: JsFlowEvent) -> Result<Self, Self::Error> {
        let event = match event {
            JsFlowEvent::Start {
                kind,
                wallet_id,
                chain_id,
            } => FlowEvent::Start {
                kind,
                wallet_id,
                chain_id,
            },
            JsFlowEvent::SelectTarget(selection) => FlowEvent::SelectTarget(selection),
            JsFlowEvent::SubmitForm(form) => FlowEvent::SubmitForm(form),
            JsFlowEvent::RetryEstimate => FlowEvent::RetryEstimate,
            JsFlowEvent::Confirm => FlowEvent::Confirm,
            JsFlowEvent::DeferToBasket => FlowEvent::DeferToBasket,
            JsFlowEvent::ProceedToScan => FlowEvent::ProceedToScan,
            JsFlowEvent::FrameScanned { frame } => {
                let frame = frame.strip_prefix("0x").unwrap_or(&frame);
                let bytes = hex::decode(frame)
                    .map_err(|e| SignerError::InvalidInput(format!("Invalid hex: {}", e)))?;
                FlowEvent::FrameScanned(bytes)
            }
            JsFlowEvent::RegenerateTransport => FlowEvent::RegenerateTransport,
            JsFlowEvent::Tick { elapsed_ms } => FlowEvent::Tick(Duration::from_millis(elapsed_ms)),
            JsFlowEvent::Cancel => FlowEvent::Cancel,
            JsFlowEvent::ResumeFromBasket(selection) => FlowEvent::ResumeFromBasket(selection),
            JsFlowEvent::FeeEstimated(c) => {
                let (generation, result) = c.into_result()?;
                FlowEvent::FeeEstimated {
                    generation,
                    result: result.map_err(FeeError::Unavailable),
                }
            }
            JsFlowEvent::DepositEstimated {
                threshold,
                completion,
            } => {
                let (generation, result) = completion.into_result()?;
                FlowEvent::DepositEstimated {
                    generation,
                    threshold,
                    result: result.map(|b| b.0).map_err(FeeError::Unavailable),
                }
            }
            JsFlowEvent::BalancesFetched(c) => {
                let (generation, result) = c.into_result()?;
                FlowEvent::BalancesFetched {
                    generation,
                    result: result
                        .map(|balances| balances.into_iter().map(|(a, b)| (a, b.0)).collect())
                        .map_err(ChainError::Unreachable),
                }
            }
            JsFlowEvent::ChainContextFetched(c) => {
                let (generation, result) = c.into_result()?;
                FlowEvent::ChainContextFetched {
                    generation,
                    result: result.map_err(ChainError::Unreachable),
                }
            }
            JsFlowEvent::Submitted(c) => {
                let (generation, result) = c.into_result()?;
                FlowEvent::Submitted { generation, result }
            }
        };
        Ok(event)
    }
}

/// WASM-exposed signing flow, one session per instance
#[wasm_bindgen]
pub struct WasmSigningFlow {
    machine: FlowMachine,
}

#[wasm_bindgen]
impl WasmSigningFlow {
    /// Create a flow
    ///
    /// # Arguments
    /// * `config` - Optional flow config (countdownSecs, settleDelayMs, transport, ...)
    /// * `wallets` - Array of wallets known to the host
    /// * `call_indices` - Optional `{ Pallet: { index, calls: { method: index } } }`
    ///   table; Polkadot indices are used when omitted
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        wallets: JsValue,
        call_indices: JsValue,
    ) -> Result<WasmSigningFlow, JsValue> {
        let config: SignerConfig = if is_absent(&config) {
            SignerConfig::default()
        } else {
            from_js(config, "config")?
        };
        let wallets: StaticWalletStore = from_js(wallets, "wallets")?;
        let resolver: KnownCallIndices = if is_absent(&call_indices) {
            KnownCallIndices::polkadot()
        } else {
            from_js(call_indices, "call indices")?
        };
        Ok(WasmSigningFlow {
            machine: FlowMachine::new(config, Arc::new(wallets), Arc::new(resolver)),
        })
    }

    /// Resolve call indices from SCALE runtime metadata from now on
    #[wasm_bindgen(js_name = setMetadata)]
    pub fn set_metadata(&mut self, metadata: &[u8]) -> Result<(), JsValue> {
        let metadata = metadata_from_bytes(metadata).map_err(SignerError::from)?;
        let resolver: Arc<dyn CallIndexResolver + Send + Sync> = Arc::new(metadata);
        self.machine.set_resolver(resolver);
        Ok(())
    }

    /// Begin an operation for a wallet on a chain (genesis hash, hex)
    #[wasm_bindgen(js_name = startFlow)]
    pub fn start_flow(
        &mut self,
        kind: JsValue,
        wallet_id: u32,
        chain_id: JsValue,
    ) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::Start {
            kind: from_js(kind, "operation kind")?,
            wallet_id,
            chain_id: from_js(chain_id, "chain id")?,
        })
    }

    /// `{ shards: string[], target?: { type, ... } }`
    #[wasm_bindgen(js_name = selectTarget)]
    pub fn select_target(&mut self, selection: JsValue) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::SelectTarget(from_js(selection, "target")?))
    }

    #[wasm_bindgen(js_name = submitForm)]
    pub fn submit_form(&mut self, form: JsValue) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::SubmitForm(from_js(form, "form")?))
    }

    #[wasm_bindgen(js_name = retryEstimate)]
    pub fn retry_estimate(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::RetryEstimate)
    }

    #[wasm_bindgen]
    pub fn confirm(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::Confirm)
    }

    #[wasm_bindgen]
    pub fn cancel(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::Cancel)
    }

    #[wasm_bindgen(js_name = deferToBasket)]
    pub fn defer_to_basket(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::DeferToBasket)
    }

    #[wasm_bindgen(js_name = proceedToScan)]
    pub fn proceed_to_scan(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::ProceedToScan)
    }

    /// Feed one frame read by the camera
    ///
    /// A frame that cannot be used sets `scanError` in the session state
    /// rather than throwing.
    #[wasm_bindgen(js_name = onFrameScanned)]
    pub fn on_frame_scanned(&mut self, frame: &[u8]) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::FrameScanned(frame.to_vec()))
    }

    #[wasm_bindgen(js_name = regenerateTransport)]
    pub fn regenerate_transport(&mut self) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::RegenerateTransport)
    }

    /// Advance countdowns by `elapsed_ms`
    #[wasm_bindgen]
    pub fn tick(&mut self, elapsed_ms: u32) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::Tick(Duration::from_millis(elapsed_ms as u64)))
    }

    /// `{ entries: BasketEntry[], fee?: FeeData }` from the basket queue
    #[wasm_bindgen(js_name = resumeFromBasket)]
    pub fn resume_from_basket(&mut self, selection: JsValue) -> Result<JsValue, JsValue> {
        self.apply(FlowEvent::ResumeFromBasket(from_js(selection, "basket selection")?))
    }

    /// Apply any event, including completions of host work
    ///
    /// # Example
    /// ```json
    /// { "type": "feeEstimated", "generation": 3, "value": { "fee": "1500", "totalFee": "3000" } }
    /// { "type": "submitted", "generation": 5, "error": { "type": "rejected", "message": "bad nonce" } }
    /// ```
    #[wasm_bindgen]
    pub fn dispatch(&mut self, event: JsValue) -> Result<JsValue, JsValue> {
        let event: JsFlowEvent = from_js(event, "event")?;
        self.apply(FlowEvent::try_from(event)?)
    }

    /// Current session snapshot for rendering
    #[wasm_bindgen(js_name = getSessionState)]
    pub fn get_session_state(&self) -> Result<JsValue, JsValue> {
        Ok(to_js(&self.machine.snapshot())?)
    }

    #[wasm_bindgen(getter)]
    pub fn step(&self) -> Result<JsValue, JsValue> {
        Ok(to_js(&self.machine.step())?)
    }
}

impl WasmSigningFlow {
    fn apply(&mut self, event: FlowEvent) -> Result<JsValue, JsValue> {
        let effects = self.machine.handle(event)?;
        Ok(to_js(&effects)?)
    }
}
