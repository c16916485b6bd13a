use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to acquire an upstream auth token: {0}")]
    Auth(String),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("encryption error: {0}")]
    Crypto(#[from] lumogate_crypto::EnvelopeError),
    #[error("PGP encryption of the request key failed: {0}")]
    Pgp(#[from] lumogate_crypto::PgpError),
    #[error("failed to serialize upstream request body: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A terminal SSE event other than `done`: `timeout`, `error`,
    /// `rejected`, or `harmful`, carried verbatim as `kind`.
    #[error("upstream rejected the request: {kind}")]
    UpstreamRejected { kind: String },
}
