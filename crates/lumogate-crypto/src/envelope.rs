use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    BadKeyLen(usize),
    #[error("ciphertext shorter than nonce prefix ({NONCE_LEN} bytes)")]
    Truncated,
    #[error("AEAD operation failed (wrong key, tampered ciphertext, or mismatched associated data)")]
    Aead,
}

/// Generate a fresh random 256-bit AES-GCM key, e.g. the per-request $k_r$
/// in the U2L envelope (`lumogate-upstream::client`).
pub fn random_key() -> [u8; KEY_LEN] {
    let generated = Aes256Gcm::generate_key(&mut OsRng);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(generated.as_slice());
    key
}

/// The U2L wire envelope: a random 12-byte nonce prefixed onto an
/// AES-256-GCM ciphertext (tag included in the trailing 16 bytes, per the
/// `aes-gcm` crate's combined output). Associated data is bound to the
/// request/response context it was encrypted for — swapping it between
/// contexts fails decryption rather than silently succeeding.
pub struct U2lEnvelope;

impl U2lEnvelope {
    /// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(key: &[u8], associated_data: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let cipher = cipher_from_key(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, aes_gcm::aead::Payload { msg: plaintext, aad: associated_data })
            .map_err(|_| EnvelopeError::Aead)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Split the nonce prefix off `sealed` and decrypt the remainder.
    pub fn decrypt(key: &[u8], associated_data: &[u8], sealed: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        if sealed.len() < NONCE_LEN {
            return Err(EnvelopeError::Truncated);
        }
        let cipher = cipher_from_key(key)?;
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, aes_gcm::aead::Payload { msg: ciphertext, aad: associated_data })
            .map_err(|_| EnvelopeError::Aead)
    }
}

fn cipher_from_key(key: &[u8]) -> Result<Aes256Gcm, EnvelopeError> {
    if key.len() != KEY_LEN {
        return Err(EnvelopeError::BadKeyLen(key.len()));
    }
    Ok(Aes256Gcm::new(key.into()))
}

/// Canonical associated-data string for one response chunk: the coarse
/// per-request form (`lumo.response.<request_id>.chunk`), used uniformly
/// across all chunks of a given streamed response rather than a
/// per-sequence-number scheme, per the resolved Open Question on AD
/// granularity.
pub fn response_chunk_ad(request_id: &str) -> Vec<u8> {
    format!("lumo.response.{request_id}.chunk").into_bytes()
}
