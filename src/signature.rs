use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use secp256k1::ecdsa::Signature;
use sha2::{Sha256, Digest};
use crate::error::{ConcordError, Result};

const DOMAIN_SEPARATOR: &str = "ConcordTx:";

/// Length in bytes of an account/validator address derived from a public key.
pub const ADDRESS_LEN: usize = 20;

/// Hashes a message with domain separator
pub fn hash_message<T: serde::Serialize>(message: &T) -> Result<[u8; 32]> {
    let json = serde_json::to_vec(message)
        .map_err(|e| ConcordError::Validation(format!("Failed to serialize message: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR.as_bytes());
    hasher.update(&json);
    let hash = hasher.finalize();

    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    Ok(result)
}

/// Signs a message, returning the compact signature as hex (64 bytes, low-S).
pub fn sign_message(private_key: &SecretKey, message: &impl serde::Serialize) -> Result<String> {
    let hash = hash_message(message)?;
    let msg = Message::from_digest_slice(&hash)
        .map_err(|e| ConcordError::Signature(format!("Invalid message hash: {}", e)))?;

    let signature = SECP256K1.sign_ecdsa(&msg, private_key);
    Ok(hex::encode(signature.serialize_compact()))
}

/// Verifies a compact hex signature against a compressed public key in hex.
pub fn verify_signature(
    message: &impl serde::Serialize,
    signature_hex: &str,
    pub_key_hex: &str,
) -> Result<bool> {
    let hash = hash_message(message)?;
    let msg = Message::from_digest_slice(&hash)
        .map_err(|e| ConcordError::Signature(format!("Invalid message hash: {}", e)))?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| ConcordError::Signature(format!("Invalid signature hex: {}", e)))?;
    let compact: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| ConcordError::Signature("Invalid signature length".to_string()))?;
    let signature = Signature::from_compact(&compact)
        .map_err(|e| ConcordError::Signature(format!("Invalid compact signature: {}", e)))?;

    let pub_key = parse_public_key(pub_key_hex)?;
    Ok(SECP256K1.verify_ecdsa(&msg, &signature, &pub_key).is_ok())
}

pub fn parse_public_key(pub_key_hex: &str) -> Result<PublicKey> {
    let pub_key_bytes = hex::decode(pub_key_hex)
        .map_err(|e| ConcordError::Signature(format!("Invalid public key hex: {}", e)))?;
    PublicKey::from_slice(&pub_key_bytes)
        .map_err(|e| ConcordError::Signature(format!("Invalid public key: {}", e)))
}

/// Compressed public key (hex) of a secret key.
pub fn public_key_hex(private_key: &SecretKey) -> String {
    hex::encode(PublicKey::from_secret_key_global(private_key).serialize())
}

/// Derives the address of a public key: first 20 bytes of sha256(pubkey), hex encoded.
/// Matches the way the consensus engine reports proposer addresses.
pub fn address_from_pubkey(pub_key_hex: &str) -> Result<String> {
    let pub_key = parse_public_key(pub_key_hex)?;
    let digest = Sha256::digest(pub_key.serialize());
    Ok(hex::encode(&digest[..ADDRESS_LEN]))
}
