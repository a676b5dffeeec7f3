//! Transport frame wire format
//!
//! `[symbolIndex u32][totalSymbols u32][payloadLength u32][encoding packet]`,
//! all integers big-endian. The packet is opaque here; the fountain checks it.

use crate::error::TransportError;

pub const HEADER_LEN: usize = 12;

/// One scannable unit of a fountain-coded stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFrame {
    pub symbol_index: u32,
    pub total_symbols: u32,
    pub payload_length: u32,
    pub data: Vec<u8>,
}

impl TransportFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.extend_from_slice(&self.symbol_index.to_be_bytes());
        out.extend_from_slice(&self.total_symbols.to_be_bytes());
        out.extend_from_slice(&self.payload_length.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() <= HEADER_LEN {
            return Err(TransportError::MalformedFrame(format!(
                "Frame of {} bytes has no symbol data",
                bytes.len()
            )));
        }
        let word = |i: usize| {
            let mut be = [0u8; 4];
            be.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_be_bytes(be)
        };
        let frame = TransportFrame {
            symbol_index: word(0),
            total_symbols: word(1),
            payload_length: word(2),
            data: bytes[HEADER_LEN..].to_vec(),
        };

        if frame.total_symbols == 0 || frame.payload_length == 0 {
            return Err(TransportError::MalformedFrame(
                "Empty stream header".to_string(),
            ));
        }
        if frame.symbol_index >= frame.total_symbols {
            return Err(TransportError::SymbolOutOfRange {
                index: frame.symbol_index,
                total: frame.total_symbols,
            });
        }
        Ok(frame)
    }
}
