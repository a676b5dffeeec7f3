//! Signing payloads and signed extrinsics
//!
//! A [`SigningPayload`] is what the air-gapped signer sees; a
//! [`SignedExtrinsic`] is what goes to the node once the signature is back.

use crate::call::blake2_256;
use crate::error::ChainError;
use crate::types::{AccountId, Balance, ChainContext, ChainSnapshot, CryptoType, Era};
use crate::wrapper::WrappedTransaction;
use parity_scale_codec::{Compact, Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vault QR prelude byte
const SUBSTRATE_PRELUDE: u8 = 0x53;
/// Vault "sign transaction" action
const SIGN_TRANSACTION: u8 = 0x02;
/// Signed extrinsic, format version 4
const SIGNED_V4: u8 = 0x84;

/// One wrapped transaction ready to be signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPayload {
    pub signer: AccountId,
    pub wrapped_call: Vec<u8>,
    pub chain: ChainSnapshot,
    pub nonce: u32,
    pub era: Era,
    pub tip: Balance,
}

impl SigningPayload {
    /// Extra data appended to the call in both the payload and the extrinsic
    fn extra(&self) -> Vec<u8> {
        let mut out = self.era.encode_era();
        Compact(self.nonce).encode_to(&mut out);
        Compact(self.tip).encode_to(&mut out);
        out
    }

    /// Unhashed payload: call, extra, then the additional signed data
    pub fn payload_bytes(&self) -> Vec<u8> {
        let mut payload = self.wrapped_call.clone();
        payload.extend(self.extra());
        payload.extend_from_slice(&self.chain.runtime.spec_version.to_le_bytes());
        payload.extend_from_slice(&self.chain.runtime.tx_version.to_le_bytes());
        payload.extend_from_slice(&self.chain.genesis_hash.0);
        let block_hash = if self.era.is_immortal() {
            self.chain.genesis_hash.0
        } else {
            self.chain.block.hash
        };
        payload.extend_from_slice(&block_hash);
        payload
    }

    /// Bytes the signer signs; hashed with Blake2-256 above 256 bytes
    pub fn signable_bytes(&self) -> Vec<u8> {
        let payload = self.payload_bytes();
        if payload.len() > 256 {
            blake2_256(&payload).to_vec()
        } else {
            payload
        }
    }

    /// Vault sign request: `0x53 ++ crypto ++ 0x02 ++ account ++ payload ++ genesis`
    pub fn vault_request(&self, crypto: CryptoType) -> Vec<u8> {
        let mut out = vec![SUBSTRATE_PRELUDE, crypto.vault_code(), SIGN_TRANSACTION];
        out.extend_from_slice(self.signer.as_bytes());
        out.extend(self.payload_bytes());
        out.extend_from_slice(&self.chain.genesis_hash.0);
        out
    }
}

/// Build one payload per transaction, in order
///
/// Each signer starts at its chain-reported next nonce and is incremented
/// for every further payload it signs in the batch.
pub fn build_signing_payloads(
    txs: &[WrappedTransaction],
    ctx: &ChainContext,
    era_period: u64,
    tip: Balance,
) -> Result<Vec<SigningPayload>, ChainError> {
    let mut next: BTreeMap<AccountId, u32> = BTreeMap::new();
    let era = Era::mortal(era_period, ctx.snapshot.block.number);

    txs.iter()
        .map(|tx| {
            let nonce = match next.get(&tx.signer) {
                Some(n) => *n,
                None => *ctx.nonces.get(&tx.signer).ok_or_else(|| {
                    ChainError::BadResponse(format!("No nonce for signer {}", tx.signer))
                })?,
            };
            next.insert(tx.signer, nonce.saturating_add(1));
            Ok(SigningPayload {
                signer: tx.signer,
                wrapped_call: tx.wrapped_call.clone(),
                chain: ctx.snapshot.clone(),
                nonce,
                era,
                tip,
            })
        })
        .collect()
}

/// Signature as returned by the signer (SCALE `MultiSignature`)
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum MultiSignature {
    Ed25519([u8; 64]),
    Sr25519([u8; 64]),
    Ecdsa([u8; 65]),
}

/// Length-prefixed v4 signed extrinsic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedExtrinsic {
    pub bytes: Vec<u8>,
}

impl SignedExtrinsic {
    pub fn assemble(payload: &SigningPayload, signature: &MultiSignature) -> Self {
        let mut body = vec![SIGNED_V4];
        // MultiAddress::Id
        body.push(0x00);
        body.extend_from_slice(payload.signer.as_bytes());
        signature.encode_to(&mut body);
        body.extend(payload.extra());
        body.extend_from_slice(&payload.wrapped_call);

        let mut bytes = Compact(body.len() as u32).encode();
        bytes.extend(body);
        SignedExtrinsic { bytes }
    }

    /// Transaction hash (Blake2-256 of the encoded extrinsic)
    pub fn hash(&self) -> [u8; 32] {
        blake2_256(&self.bytes)
    }

    pub fn id(&self) -> String {
        format!("0x{}", hex::encode(self.hash()))
    }
}

/// Zero-signature extrinsic carrying `call`, for fee queries
///
/// Laid out like the broadcast extrinsic: mortal era and the real tip. The
/// nonce is not known yet, so it takes its widest compact form and the
/// quoted fee never falls short of the signed one.
pub fn fee_query_extrinsic(signer: &AccountId, call: &[u8], era_period: u64, tip: Balance) -> Vec<u8> {
    let mut body = vec![SIGNED_V4, 0x00];
    body.extend_from_slice(signer.as_bytes());
    MultiSignature::Sr25519([0u8; 64]).encode_to(&mut body);
    body.extend(Era::mortal(era_period, 0).encode_era());
    Compact(u32::MAX).encode_to(&mut body);
    Compact(tip).encode_to(&mut body);
    body.extend_from_slice(call);

    let mut bytes = Compact(body.len() as u32).encode();
    bytes.extend(body);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Call, KnownCallIndices};
    use crate::fee::{estimate_fee, FeeParams};
    use crate::operation::{Operation, OperationKind};
    use crate::test_utils::*;
    use crate::types::{BlockRef, RuntimeVersion};
    use crate::wrapper::{wrap, WrapContext, WrapperChain};

    fn snapshot() -> ChainSnapshot {
        ChainSnapshot {
            genesis_hash: CHAIN,
            block: BlockRef {
                hash: [0xbb; 32],
                number: 1000,
            },
            runtime: RuntimeVersion {
                spec_version: 1_002_000,
                tx_version: 26,
            },
        }
    }

    fn tx(origin: AccountId) -> WrappedTransaction {
        let indices = KnownCallIndices::polkadot();
        let op = Operation {
            kind: OperationKind::Transfer,
            chain_id: CHAIN,
            origin,
            call: Call::TransferKeepAlive {
                dest: DAVE,
                value: 1,
            },
            description: String::new(),
            pending: None,
        };
        let ctx = WrapContext {
            resolver: &indices,
            max_weight: Default::default(),
        };
        wrap(&op, &WrapperChain::empty(), &ctx).unwrap()
    }

    fn context() -> ChainContext {
        ChainContext {
            snapshot: snapshot(),
            nonces: [(ALICE, 5), (BOB, 0)].into_iter().collect(),
        }
    }

    #[test]
    fn test_nonces_increase_per_signer() {
        let txs = vec![tx(ALICE), tx(BOB), tx(ALICE), tx(ALICE)];
        let payloads = build_signing_payloads(&txs, &context(), 64, 0).unwrap();

        let nonces: Vec<u32> = payloads.iter().map(|p| p.nonce).collect();
        assert_eq!(nonces, vec![5, 0, 6, 7]);
        assert_eq!(payloads[0].era, Era::mortal(64, 1000));
    }

    #[test]
    fn test_missing_nonce_is_an_error() {
        assert!(build_signing_payloads(&[tx(CHARLIE)], &context(), 64, 0).is_err());
    }

    #[test]
    fn test_signable_layout() {
        let payload = &build_signing_payloads(&[tx(ALICE)], &context(), 64, 0).unwrap()[0];
        let bytes = payload.signable_bytes();
        let call_len = payload.wrapped_call.len();

        assert_eq!(&bytes[..call_len], &payload.wrapped_call[..]);
        // era (2) + nonce 5 (1) + tip 0 (1)
        assert_eq!(&bytes[call_len + 2..call_len + 4], &[5 << 2, 0]);
        assert_eq!(&bytes[bytes.len() - 32..], &[0xbb; 32]);
        assert_eq!(&bytes[bytes.len() - 64..bytes.len() - 32], &CHAIN.0);
    }

    #[test]
    fn test_long_payload_is_hashed() {
        let mut payload = build_signing_payloads(&[tx(ALICE)], &context(), 64, 0).unwrap()[0].clone();
        payload.wrapped_call = vec![0u8; 300];
        assert_eq!(payload.signable_bytes(), blake2_256(&payload.payload_bytes()).to_vec());
    }

    #[test]
    fn test_vault_request_prelude() {
        let payload = &build_signing_payloads(&[tx(ALICE)], &context(), 64, 0).unwrap()[0];
        let request = payload.vault_request(CryptoType::Sr25519);
        assert_eq!(&request[..3], &[0x53, 0x01, 0x02]);
        assert_eq!(&request[3..35], ALICE.as_bytes());
        assert_eq!(&request[request.len() - 32..], &CHAIN.0);
    }

    #[test]
    fn test_assemble_signed_extrinsic() {
        let payload = &build_signing_payloads(&[tx(ALICE)], &context(), 64, 0).unwrap()[0];
        let extrinsic = SignedExtrinsic::assemble(payload, &MultiSignature::Sr25519([7u8; 64]));

        let body_len = extrinsic.bytes.len() - 2;
        assert_eq!(
            Compact::<u32>::decode(&mut &extrinsic.bytes[..]).unwrap().0 as usize,
            body_len
        );
        let body = &extrinsic.bytes[2..];
        assert_eq!(body[0], 0x84);
        assert_eq!(body[1], 0x00);
        assert_eq!(&body[2..34], ALICE.as_bytes());
        assert_eq!(body[34], 0x01);
        assert!(body.ends_with(&payload.wrapped_call));
        assert_eq!(extrinsic.id().len(), 66);
    }

    async fn quoted_length(tx: &WrappedTransaction, tip: Balance) -> usize {
        let client = MockChainClient::new();
        *client.fee_by_len.lock().unwrap() = Some(|len| len as Balance);
        let params = FeeParams { era_period: 64, tip };
        estimate_fee(tx, params, &client).await.unwrap() as usize
    }

    #[tokio::test]
    async fn test_fee_query_has_broadcast_layout() {
        let tx = tx(ALICE);
        let payload = &build_signing_payloads(&[tx.clone()], &context(), 64, 1_000).unwrap()[0];
        let signed = SignedExtrinsic::assemble(payload, &MultiSignature::Sr25519([7u8; 64]));

        // Only the nonce differs: compact(5) is 1 byte, the placeholder 5
        assert_eq!(quoted_length(&tx, 1_000).await, signed.bytes.len() + 4);
    }

    #[tokio::test]
    async fn test_fee_query_covers_widest_nonce() {
        let tx = tx(ALICE);
        let ctx = ChainContext {
            snapshot: snapshot(),
            nonces: [(ALICE, 1 << 30)].into_iter().collect(),
        };
        let payload = &build_signing_payloads(&[tx.clone()], &ctx, 64, 1_000).unwrap()[0];
        let signed = SignedExtrinsic::assemble(payload, &MultiSignature::Sr25519([7u8; 64]));

        assert_eq!(quoted_length(&tx, 1_000).await, signed.bytes.len());
    }
}
