//! RaptorQ fountain over a single source block
//!
//! The payload is cut into K source symbols of S bytes, S a multiple of 8.
//! Frame `i < K` carries source symbol `i`; later frames carry repair
//! symbols. Frame data is a serialized [`EncodingPacket`]: the 4-byte
//! payload id (source block number, encoding symbol id) and the symbol.
//!
//! K frames almost always reconstruct the payload and K + 2 fail with
//! negligible probability. At the default 200% redundancy the scanner may
//! miss just under half of the loop.

use super::frame::{TransportFrame, HEADER_LEN};
use super::TransportConfig;
use crate::error::TransportError;
use raptorq::{EncodingPacket, ObjectTransmissionInformation};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Payload id in front of every symbol
const PACKET_ID_LEN: usize = 4;
const SYMBOL_ALIGNMENT: usize = 8;
/// Largest aligned symbol a `u16` can describe
const MAX_SYMBOL_SIZE: usize = 65_528;
/// Largest source block RaptorQ defines
const MAX_SOURCE_SYMBOLS: usize = 56_403;
const MAX_REDUNDANCY_PERCENT: u32 = 1000;

/// Smallest frame that can carry one aligned symbol
pub const MIN_FRAME_CAPACITY: usize = HEADER_LEN + PACKET_ID_LEN + SYMBOL_ALIGNMENT;

/// Decoder state after a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Partial { received: usize, needed: usize },
    Complete(Vec<u8>),
}

fn transmission_info(payload_length: u32, symbol_size: usize) -> ObjectTransmissionInformation {
    ObjectTransmissionInformation::new(
        u64::from(payload_length),
        symbol_size as u16,
        1,
        1,
        SYMBOL_ALIGNMENT as u8,
    )
}

/// Deterministic, restartable frame source for one payload
#[derive(Debug, Clone)]
pub struct Encoder {
    payload_length: u32,
    symbol_size: usize,
    source_symbols: usize,
    packets: Vec<Vec<u8>>,
}

impl Encoder {
    pub fn new(payload: &[u8], config: &TransportConfig) -> Result<Self, TransportError> {
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if config.frame_capacity < MIN_FRAME_CAPACITY {
            return Err(TransportError::FrameCapacityTooSmall(
                config.frame_capacity,
                MIN_FRAME_CAPACITY,
            ));
        }
        let payload_length = u32::try_from(payload.len())
            .map_err(|_| TransportError::PayloadTooLarge(payload.len()))?;

        let max_symbol = (config.frame_capacity - HEADER_LEN - PACKET_ID_LEN).min(MAX_SYMBOL_SIZE);
        let aligned_payload = payload.len().div_ceil(SYMBOL_ALIGNMENT) * SYMBOL_ALIGNMENT;
        let symbol_size = (max_symbol / SYMBOL_ALIGNMENT * SYMBOL_ALIGNMENT).min(aligned_payload);
        let k = payload.len().div_ceil(symbol_size);
        if k > MAX_SOURCE_SYMBOLS {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }

        let redundancy = config.redundancy_percent.clamp(100, MAX_REDUNDANCY_PERCENT) as usize;
        let n = (k * redundancy).div_ceil(100);

        let packets: Vec<Vec<u8>> =
            raptorq::Encoder::new(payload, transmission_info(payload_length, symbol_size))
                .get_encoded_packets((n - k) as u32)
                .iter()
                .map(EncodingPacket::serialize)
                .collect();

        info!(
            payload_length,
            symbol_size,
            source_symbols = k,
            total_symbols = packets.len(),
            "Encoding transport stream"
        );

        Ok(Encoder {
            payload_length,
            symbol_size,
            source_symbols: k,
            packets,
        })
    }

    pub fn source_symbols(&self) -> usize {
        self.source_symbols
    }

    pub fn total_symbols(&self) -> u32 {
        self.packets.len() as u32
    }

    pub fn symbol_size(&self) -> usize {
        self.symbol_size
    }

    /// Frame `index`; indices at or past the total wrap around
    pub fn frame(&self, index: u32) -> TransportFrame {
        let index = index % self.total_symbols();
        TransportFrame {
            symbol_index: index,
            total_symbols: self.total_symbols(),
            payload_length: self.payload_length,
            data: self.packets[index as usize].clone(),
        }
    }

    pub fn frames(&self) -> Vec<TransportFrame> {
        (0..self.total_symbols()).map(|i| self.frame(i)).collect()
    }
}

/// Encode `payload` into its full frame sequence
pub fn encode(payload: &[u8], config: &TransportConfig) -> Result<Vec<TransportFrame>, TransportError> {
    Ok(Encoder::new(payload, config)?.frames())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamParams {
    total_symbols: u32,
    payload_length: u32,
    symbol_size: usize,
}

impl StreamParams {
    fn of(frame: &TransportFrame) -> Result<Self, TransportError> {
        let symbol_size = frame.data.len().saturating_sub(PACKET_ID_LEN);
        if symbol_size == 0 || symbol_size % SYMBOL_ALIGNMENT != 0 || symbol_size > MAX_SYMBOL_SIZE {
            return Err(TransportError::MalformedFrame(format!(
                "Invalid symbol length {}",
                symbol_size
            )));
        }
        if frame.data[0] != 0 {
            return Err(TransportError::MalformedFrame(format!(
                "Unknown source block {}",
                frame.data[0]
            )));
        }
        let params = StreamParams {
            total_symbols: frame.total_symbols,
            payload_length: frame.payload_length,
            symbol_size,
        };
        if params.payload_length == 0
            || params.source_symbols() > MAX_SOURCE_SYMBOLS
            || params.source_symbols() > params.total_symbols as usize
        {
            return Err(TransportError::MalformedFrame(
                "Stream header is inconsistent".to_string(),
            ));
        }
        if frame.symbol_index >= frame.total_symbols {
            return Err(TransportError::SymbolOutOfRange {
                index: frame.symbol_index,
                total: frame.total_symbols,
            });
        }
        Ok(params)
    }

    fn source_symbols(&self) -> usize {
        (self.payload_length as usize).div_ceil(self.symbol_size)
    }
}

/// Order-independent frame accumulator
///
/// Duplicates are ignored. A frame from another stream is rejected and
/// leaves the accumulated state untouched. Reconstruction is attempted once
/// K distinct frames are in; each failed attempt asks for one more.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    stream: Option<StreamParams>,
    packets: BTreeMap<u32, Vec<u8>>,
    needed: usize,
    result: Option<Vec<u8>>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder::default()
    }

    pub fn reset(&mut self) {
        *self = Decoder::default();
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Distinct frames received and frames needed, once a frame has arrived
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.stream.map(|_| (self.packets.len(), self.needed))
    }

    pub fn accumulate_bytes(&mut self, bytes: &[u8]) -> Result<Progress, TransportError> {
        let frame = TransportFrame::from_bytes(bytes)?;
        self.accumulate(&frame)
    }

    pub fn accumulate(&mut self, frame: &TransportFrame) -> Result<Progress, TransportError> {
        let params = StreamParams::of(frame)?;
        match self.stream {
            Some(stream) if stream != params => return Err(TransportError::FrameMismatch),
            Some(_) => {}
            None => {
                self.stream = Some(params);
                self.needed = params.source_symbols();
            }
        }

        if let Some(result) = &self.result {
            return Ok(Progress::Complete(result.clone()));
        }

        if self.packets.contains_key(&frame.symbol_index) {
            debug!(index = frame.symbol_index, "Duplicate frame ignored");
        } else {
            self.packets.insert(frame.symbol_index, frame.data.clone());
        }

        let received = self.packets.len();
        if received < self.needed {
            return Ok(Progress::Partial {
                received,
                needed: self.needed,
            });
        }

        match self.reconstruct(params) {
            Some(payload) => {
                info!(
                    payload_length = payload.len(),
                    frames = received,
                    "Transport stream reconstructed"
                );
                self.result = Some(payload.clone());
                Ok(Progress::Complete(payload))
            }
            None => {
                self.needed = received + 1;
                warn!(frames = received, "Reconstruction needs another frame");
                Ok(Progress::Partial {
                    received,
                    needed: self.needed,
                })
            }
        }
    }

    fn reconstruct(&self, params: StreamParams) -> Option<Vec<u8>> {
        let mut decoder =
            raptorq::Decoder::new(transmission_info(params.payload_length, params.symbol_size));
        self.packets
            .values()
            .find_map(|packet| decoder.decode(EncodingPacket::deserialize(packet)))
    }
}
