//! Multi-payload bulk container
//!
//! `53 ff 04` followed by the SCALE encoding of [`TransactionBulk`]. A lone
//! payload travels without the container.

use crate::error::TransportError;
use crate::payload::MultiSignature;
use parity_scale_codec::{Decode, DecodeAll, Encode};

pub const BULK_PREFIX: [u8; 3] = [0x53, 0xff, 0x04];

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum TransactionBulk {
    V1(Vec<Vec<u8>>),
}

pub fn encode_bulk(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut out = BULK_PREFIX.to_vec();
    TransactionBulk::V1(payloads.to_vec()).encode_to(&mut out);
    out
}

pub fn is_bulk(bytes: &[u8]) -> bool {
    bytes.starts_with(&BULK_PREFIX)
}

/// Decode a bulk container; trailing bytes are an error
pub fn decode_bulk(bytes: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
    let body = bytes
        .strip_prefix(&BULK_PREFIX[..])
        .ok_or_else(|| TransportError::InvalidBulk("Missing bulk prefix".to_string()))?;
    let TransactionBulk::V1(payloads) = TransactionBulk::decode_all(&mut &body[..])?;
    Ok(payloads)
}

/// Split a reconstructed transport payload back into its parts
pub fn decode_payloads(bytes: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
    if is_bulk(bytes) {
        decode_bulk(bytes)
    } else {
        Ok(vec![bytes.to_vec()])
    }
}

/// Signatures returned by the signer, in payload order
///
/// Either a bulk of SCALE `MultiSignature`s or a single one.
pub fn decode_signatures(bytes: &[u8]) -> Result<Vec<MultiSignature>, TransportError> {
    decode_payloads(bytes)?
        .iter()
        .map(|raw| MultiSignature::decode_all(&mut &raw[..]).map_err(TransportError::from))
        .collect()
}
