//! Air-gap transport
//!
//! Signing payloads leave the device as an endless loop of QR frames and
//! signatures come back the same way. Payloads are packed (bulk container
//! when more than one), then fountain-coded so the scanner can start at any
//! frame and skip any it misses.

pub mod bulk;
pub mod fountain;
pub mod frame;

pub use bulk::{decode_bulk, decode_payloads, decode_signatures, encode_bulk, TransactionBulk};
pub use fountain::{encode, Decoder, Encoder, Progress};
pub use frame::TransportFrame;

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_frame_capacity() -> usize {
    140
}

fn default_redundancy() -> u32 {
    200
}

/// Frame sizing and parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Bytes per frame, header included
    #[serde(default = "default_frame_capacity")]
    pub frame_capacity: usize,
    /// Total frames as a percentage of source frames, clamped to 100..=1000
    #[serde(default = "default_redundancy")]
    pub redundancy_percent: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            frame_capacity: default_frame_capacity(),
            redundancy_percent: default_redundancy(),
        }
    }
}

/// Pack and fountain-encode signing payloads
///
/// Returns `None` when there is nothing to transport.
pub fn encode_payloads(
    payloads: &[Vec<u8>],
    config: &TransportConfig,
) -> Result<Option<Vec<TransportFrame>>, TransportError> {
    let packed = match payloads {
        [] => return Ok(None),
        [single] => single.clone(),
        many => encode_bulk(many),
    };
    debug!(
        payloads = payloads.len(),
        bytes = packed.len(),
        "Packing payloads for transport"
    );
    encode(&packed, config).map(Some)
}
