use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

use crate::envelope::{random_key, EnvelopeError, U2lEnvelope, KEY_LEN};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("HKDF expand failed (output length {0} invalid for SHA-256)")]
    Expand(usize),
}

/// Fixed HKDF salt for space-DEK derivation, base64-decoded once at call
/// time. Constant across every space; the space key itself is the only
/// per-space input, so two spaces never share a DEK.
const DEK_SALT_B64: &str = "Xd6V94/+5BmLAfc67xIBZcjsBPimm9/j02kHPI7Vsuc=";
const DEK_INFO: &[u8] = b"dek.space.lumo";

/// The device-held root of the key hierarchy. Never transmitted; every
/// space key is wrapped under this key before it leaves the process.
#[derive(Clone)]
pub struct MasterKey(pub [u8; KEY_LEN]);

/// A space's symmetric key: generated once per space, cached locally, and
/// stored on the server wrapped under the master key. The DEK that
/// actually encrypts conversation/message bodies is derived from this —
/// never from the master key directly.
#[derive(Clone)]
pub struct SpaceKey(pub [u8; KEY_LEN]);

impl SpaceKey {
    /// Generate a fresh random space key, e.g. on lazy space creation
    /// during the sync engine's push algorithm.
    pub fn generate() -> Self {
        Self(random_key())
    }

    /// Derive this space's DEK via HKDF-SHA256 with the spec-mandated
    /// fixed salt and info string.
    pub fn derive_dek(&self) -> Result<[u8; KEY_LEN], KeyError> {
        let salt = BASE64.decode(DEK_SALT_B64).expect("DEK_SALT_B64 is a valid literal");
        let hk = Hkdf::<Sha256>::new(Some(&salt), &self.0);
        let mut okm = [0u8; KEY_LEN];
        hk.expand(DEK_INFO, &mut okm).map_err(|_| KeyError::Expand(KEY_LEN))?;
        Ok(okm)
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Wrap a space's key for storage/transmission: AES-256-GCM-encrypt
    /// the raw key bytes under the master key, bound to the space id as AD.
    pub fn wrap_space_key(&self, space_id: &str, space_key: &SpaceKey) -> Result<Vec<u8>, KeyError> {
        let ad = wrap_ad(space_id);
        Ok(U2lEnvelope::encrypt(&self.0, &ad, &space_key.0)?)
    }

    /// Inverse of `wrap_space_key`.
    pub fn unwrap_space_key(&self, space_id: &str, wrapped: &[u8]) -> Result<SpaceKey, KeyError> {
        let ad = wrap_ad(space_id);
        let raw = U2lEnvelope::decrypt(&self.0, &ad, wrapped)?;
        let mut key = [0u8; KEY_LEN];
        if raw.len() == KEY_LEN {
            key.copy_from_slice(&raw);
        } else {
            return Err(EnvelopeError::BadKeyLen(raw.len()).into());
        }
        Ok(SpaceKey(key))
    }
}

fn wrap_ad(space_id: &str) -> Vec<u8> {
    format!("lumo.space.{space_id}.wrap").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_dek_is_deterministic_for_the_same_space_key() {
        let space_key = SpaceKey([1u8; KEY_LEN]);
        let a = space_key.derive_dek().unwrap();
        let b = space_key.derive_dek().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_space_keys_get_different_deks() {
        let a = SpaceKey([1u8; KEY_LEN]).derive_dek().unwrap();
        let b = SpaceKey([2u8; KEY_LEN]).derive_dek().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_space_keys_differ_across_calls() {
        let a = SpaceKey::generate();
        let b = SpaceKey::generate();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn wrap_unwrap_round_trips() {
        let master = MasterKey::from_bytes([2u8; KEY_LEN]);
        let space_key = SpaceKey::generate();
        let wrapped = master.wrap_space_key("space-a", &space_key).unwrap();
        let unwrapped = master.unwrap_space_key("space-a", &wrapped).unwrap();
        assert_eq!(space_key.0, unwrapped.0);
    }

    #[test]
    fn unwrap_fails_under_wrong_space_id() {
        let master = MasterKey::from_bytes([3u8; KEY_LEN]);
        let space_key = SpaceKey::generate();
        let wrapped = master.wrap_space_key("space-a", &space_key).unwrap();
        assert!(master.unwrap_space_key("space-b", &wrapped).is_err());
    }

    #[test]
    fn dek_salt_constant_decodes_to_32_bytes() {
        let salt = BASE64.decode(DEK_SALT_B64).unwrap();
        assert_eq!(salt.len(), KEY_LEN);
    }
}
