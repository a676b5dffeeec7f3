//! WASM bindings for the QR frame transport
//!
//! `TransportNamespace` produces the frames the host cycles through as QR
//! codes; `WasmFrameDecoder` collects frames scanned back from the signer.

use crate::js_obj;
use crate::transport::{decode_payloads, encode_payloads, Decoder, Progress, TransportConfig};
use crate::SignerError;
use js_sys::{Array, Uint8Array};
use wasm_bindgen::prelude::*;

/// Namespace for frame encoding
#[wasm_bindgen]
pub struct TransportNamespace;

#[wasm_bindgen]
impl TransportNamespace {
    /// Encode payloads into fountain-coded frames
    ///
    /// A single payload is carried as-is; several are wrapped in a bulk
    /// container first. Returns an empty array when there is nothing to send.
    ///
    /// # Arguments
    /// * `payloads` - Array of Uint8Array
    /// * `capacity` - Bytes per QR frame (default 140)
    /// * `redundancy` - Frames emitted as a percentage of source symbols (default 200)
    #[wasm_bindgen(js_name = encodeFrames)]
    pub fn encode_frames(
        payloads: Array,
        capacity: Option<u32>,
        redundancy: Option<u32>,
    ) -> Result<Array, JsValue> {
        let payloads: Vec<Vec<u8>> = payloads
            .iter()
            .map(|p| {
                p.dyn_into::<Uint8Array>()
                    .map(|a| a.to_vec())
                    .map_err(|_| SignerError::InvalidInput("Payload must be a Uint8Array".into()))
            })
            .collect::<Result<_, _>>()?;

        let defaults = TransportConfig::default();
        let config = TransportConfig {
            frame_capacity: capacity.map_or(defaults.frame_capacity, |c| c as usize),
            redundancy_percent: redundancy.unwrap_or(defaults.redundancy_percent),
        };

        let out = Array::new();
        for frame in encode_payloads(&payloads, &config)?.unwrap_or_default() {
            out.push(&Uint8Array::from(frame.to_bytes().as_slice()));
        }
        Ok(out)
    }

    /// Split a decoded message into its payloads (bulk or single)
    #[wasm_bindgen(js_name = decodePayloads)]
    pub fn decode_payloads(bytes: &[u8]) -> Result<Array, JsValue> {
        let out = Array::new();
        for payload in decode_payloads(bytes)? {
            out.push(&Uint8Array::from(payload.as_slice()));
        }
        Ok(out)
    }
}

/// Reassembles one fountain-coded stream from scanned frames
#[wasm_bindgen]
pub struct WasmFrameDecoder {
    inner: Decoder,
}

#[wasm_bindgen]
impl WasmFrameDecoder {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmFrameDecoder {
        WasmFrameDecoder {
            inner: Decoder::new(),
        }
    }

    /// Add a scanned frame
    ///
    /// Returns `{ complete, received, needed, payload? }`. Frames of a
    /// different stream are rejected without losing progress.
    #[wasm_bindgen]
    pub fn accumulate(&mut self, frame: &[u8]) -> Result<JsValue, JsValue> {
        let obj = match self.inner.accumulate_bytes(frame)? {
            Progress::Partial { received, needed } => js_obj!(
                "complete" => false,
                "received" => received,
                "needed" => needed,
            )?,
            Progress::Complete(payload) => {
                let (received, needed) = self.inner.progress().unwrap_or_default();
                js_obj!(
                    "complete" => true,
                    "received" => received,
                    "needed" => needed,
                    "payload" => Uint8Array::from(payload.as_slice()),
                )?
            }
        };
        Ok(obj)
    }

    #[wasm_bindgen(getter, js_name = isComplete)]
    pub fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    /// Forget the current stream
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl Default for WasmFrameDecoder {
    fn default() -> Self {
        WasmFrameDecoder::new()
    }
}
