//! Transaction codec: the typed, tagged transaction and its wire format.
//!
//! Raw bytes from the consensus engine are JSON-encoded [`Transaction`] envelopes. Payloads are a
//! closed sum type ([`TxPayload`]); the discriminator used for handler dispatch is [`TxType`].
//!
//! **Determinism:** encoding is a pure function of the transaction; the signing hash covers
//! everything except the signature itself. Decoding never panics on arbitrary input.

use std::fmt;

use bytes::Bytes;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::TxHash;
use crate::error::{ConcordError, Result};
use crate::signature::{hash_message, sign_message, verify_signature};

/// Upper bound on the size of a single encoded transaction.
pub const MAX_TX_BYTES: usize = 64 * 1024;

/// Errors produced while decoding raw transaction bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty transaction bytes")]
    Empty,

    #[error("transaction too large: {0} bytes (max {MAX_TX_BYTES})")]
    TooLarge(usize),

    #[error("malformed transaction: {0}")]
    Malformed(String),

    #[error("malformed signature encoding")]
    BadSignatureEncoding,
}

impl From<DecodeError> for ConcordError {
    fn from(err: DecodeError) -> Self {
        ConcordError::Decode(err.to_string())
    }
}

/// Transaction type discriminator. Handlers are registered per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    Grant,
    Proposal,
    SettleProposal,
    Discussion,
}

impl TxType {
    /// Grant, Proposal and SettleProposal are governance actions: at most one per block.
    pub fn is_governance(self) -> bool {
        matches!(self, TxType::Grant | TxType::Proposal | TxType::SettleProposal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Transfer => "transfer",
            TxType::Grant => "grant",
            TxType::Proposal => "proposal",
            TxType::SettleProposal => "settle_proposal",
            TxType::Discussion => "discussion",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    /// Recipient address (hex).
    pub to: String,
    pub amount: u128,
}

/// A single membership grant: who receives it, how much, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Compressed secp256k1 public key of the grantee (hex).
    pub grantee_pubkey: String,
    pub amount: u128,
    pub statement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTx {
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTx {
    /// Free-form proposer identity as presented to the oracle.
    pub proposer: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleProposalTx {
    /// Id of the proposal being settled.
    pub proposal: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionTx {
    pub proposal: u64,
    pub comment: String,
}

/// Type-specific transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    Transfer(TransferTx),
    Grant(GrantTx),
    Proposal(ProposalTx),
    SettleProposal(SettleProposalTx),
    Discussion(DiscussionTx),
}

impl TxPayload {
    pub fn tx_type(&self) -> TxType {
        match self {
            TxPayload::Transfer(_) => TxType::Transfer,
            TxPayload::Grant(_) => TxType::Grant,
            TxPayload::Proposal(_) => TxType::Proposal,
            TxPayload::SettleProposal(_) => TxType::SettleProposal,
            TxPayload::Discussion(_) => TxType::Discussion,
        }
    }
}

/// Signed transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Index of the acting account (validator/member) that signs the transaction.
    pub validator: u64,
    /// Account nonce; must match the account's next nonce at execution time.
    pub nonce: u64,
    pub payload: TxPayload,
    /// Compact secp256k1 signature over the signing hash (hex, 64 bytes).
    #[serde(default)]
    pub signature: String,
}

/// The part of a transaction covered by its signature.
#[derive(Serialize)]
struct SigningData<'a> {
    validator: u64,
    nonce: u64,
    payload: &'a TxPayload,
}

impl Transaction {
    /// Builds an unsigned transaction.
    pub fn new(validator: u64, nonce: u64, payload: TxPayload) -> Self {
        Self {
            validator,
            nonce,
            payload,
            signature: String::new(),
        }
    }

    pub fn tx_type(&self) -> TxType {
        self.payload.tx_type()
    }

    fn signing_data(&self) -> SigningData<'_> {
        SigningData {
            validator: self.validator,
            nonce: self.nonce,
            payload: &self.payload,
        }
    }

    /// Hash covered by the signature. Same transaction data -> same hash.
    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        hash_message(&self.signing_data())
    }

    /// Signs the transaction with the acting account's key.
    pub fn sign(mut self, key: &SecretKey) -> Result<Self> {
        self.signature = sign_message(key, &self.signing_data())?;
        Ok(self)
    }

    /// Verifies the signature against the acting account's public key.
    pub fn verify_signature(&self, pub_key_hex: &str) -> Result<bool> {
        verify_signature(&self.signing_data(), &self.signature, pub_key_hex)
    }

    /// Encodes the transaction into wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self)
            .map_err(|e| ConcordError::Validation(format!("Failed to encode transaction: {}", e)))?;
        Ok(Bytes::from(raw))
    }

    /// Decodes wire bytes. Rejects empty, oversized and malformed input with a descriptive error.
    pub fn decode(raw: &[u8]) -> std::result::Result<Self, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        if raw.len() > MAX_TX_BYTES {
            return Err(DecodeError::TooLarge(raw.len()));
        }
        let tx: Transaction =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if tx.signature.len() != 128 || !tx.signature.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DecodeError::BadSignatureEncoding);
        }
        Ok(tx)
    }

    /// Hex sha256 of the raw bytes, as reported in logs and events.
    pub fn hash_of(raw: &[u8]) -> TxHash {
        hex::encode(Sha256::digest(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::public_key_hex;

    fn key() -> SecretKey {
        SecretKey::from_slice(&[7; 32]).unwrap()
    }

    fn transfer(nonce: u64) -> Transaction {
        Transaction::new(
            0,
            nonce,
            TxPayload::Transfer(TransferTx {
                to: "ab".repeat(20),
                amount: 10,
            }),
        )
    }

    #[test]
    fn test_sign_encode_decode() {
        let tx = transfer(0).sign(&key()).unwrap();
        let raw = tx.encode().unwrap();
        let decoded = Transaction::decode(&raw).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.verify_signature(&public_key_hex(&key())).unwrap());
    }

    #[test]
    fn test_signature_covers_nonce() {
        let tx = transfer(0).sign(&key()).unwrap();
        let mut tampered = tx.clone();
        tampered.nonce = 1;
        assert!(!tampered.verify_signature(&public_key_hex(&key())).unwrap());
    }

    #[test]
    fn test_signing_hash_ignores_signature() {
        let unsigned = transfer(0);
        let signed = transfer(0).sign(&key()).unwrap();
        assert_eq!(unsigned.signing_hash().unwrap(), signed.signing_hash().unwrap());
        assert_ne!(unsigned.signing_hash().unwrap(), transfer(1).signing_hash().unwrap());
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(Transaction::decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_garbage_does_not_panic() {
        let inputs: [&[u8]; 5] = [b"{", b"null", b"[1,2,3]", b"\xff\xfe\x00", b"{\"validator\":1}"];
        for raw in inputs {
            assert!(matches!(Transaction::decode(raw), Err(DecodeError::Malformed(_))));
        }
    }

    #[test]
    fn test_decode_unknown_type_is_malformed() {
        let raw = br#"{"validator":0,"nonce":0,"payload":{"Mint":{"amount":1}},"signature":""}"#;
        assert!(matches!(Transaction::decode(raw), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_unsigned_rejected() {
        let raw = transfer(0).encode().unwrap();
        assert_eq!(Transaction::decode(&raw), Err(DecodeError::BadSignatureEncoding));
    }

    #[test]
    fn test_decode_too_large() {
        let raw = vec![b' '; MAX_TX_BYTES + 1];
        assert_eq!(Transaction::decode(&raw), Err(DecodeError::TooLarge(MAX_TX_BYTES + 1)));
    }

    #[test]
    fn test_governance_types() {
        assert!(TxType::Grant.is_governance());
        assert!(TxType::Proposal.is_governance());
        assert!(TxType::SettleProposal.is_governance());
        assert!(!TxType::Transfer.is_governance());
        assert!(!TxType::Discussion.is_governance());
    }

    #[test]
    fn test_hash_of_deterministic() {
        let raw = transfer(3).sign(&key()).unwrap().encode().unwrap();
        assert_eq!(Transaction::hash_of(&raw), Transaction::hash_of(&raw));
        assert_eq!(Transaction::hash_of(&raw).len(), 64);
    }
}
