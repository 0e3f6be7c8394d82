//! Signature and MAC primitives.
//!
//! Agents identify with Ed25519 keys registered as SubjectPublicKeyInfo PEM;
//! signatures travel as unpadded base64url. Receipts and bearer tokens are
//! MACed with HMAC-SHA256 under process-local keys. Verification fails
//! closed: malformed PEM, a non-Ed25519 key, or an undecodable signature all
//! read as "not verified", never as an error the caller might mishandle.

use base64::Engine;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

/// Challenge nonces carry 24 bytes (192 bits) of entropy.
const NONCE_BYTES: usize = 24;

pub fn b64url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

pub fn b64url_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input)
}

/// Verify an Ed25519 signature over `message` with a PEM-encoded public key.
pub fn verify_agent_signature(public_key_pem: &str, message: &[u8], signature_b64url: &str) -> bool {
    let Ok(key) = VerifyingKey::from_public_key_pem(public_key_pem) else {
        return false;
    };
    let Ok(sig_bytes) = b64url_decode(signature_b64url) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// HMAC-SHA256 over `payload`, unpadded base64url.
pub fn mac_b64url(key: &[u8], payload: &[u8]) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)?;
    mac.update(payload);
    Ok(b64url_encode(&mac.finalize().into_bytes()))
}

/// Constant-time check of an unpadded-base64url HMAC-SHA256 tag.
pub fn mac_verify_b64url(key: &[u8], payload: &[u8], tag_b64url: &str) -> bool {
    let Ok(tag) = b64url_decode(tag_b64url) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&tag).is_ok()
}

/// Fresh challenge nonce, unpadded base64url.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    b64url_encode(&bytes)
}
