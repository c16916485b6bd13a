/// Seam to the PGP collaborator that wraps an ephemeral per-request AES key
/// under the upstream recipient's public key. Implementing actual OpenPGP
/// is out of scope here; production wiring plugs a real implementation in
/// at the binary edge.
pub trait PgpEncryptor: Send + Sync {
    fn encrypt_for_recipient(&self, plaintext: &[u8]) -> Result<Vec<u8>, PgpError>;
}

#[derive(Debug, thiserror::Error)]
#[error("PGP encryption failed: {0}")]
pub struct PgpError(pub String);

/// Test double standing in for a real OpenPGP implementation: "encrypts"
/// by prefixing a fixed tag, so unit tests can assert the envelope builder
/// called through to the encryptor without needing a real keypair.
pub struct StaticPublicKeyEncryptor {
    pub tag: &'static str,
}

impl PgpEncryptor for StaticPublicKeyEncryptor {
    fn encrypt_for_recipient(&self, plaintext: &[u8]) -> Result<Vec<u8>, PgpError> {
        let mut out = self.tag.as_bytes().to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }
}
