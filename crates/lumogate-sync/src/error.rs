use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("key error: {0}")]
    Key(#[from] lumogate_crypto::KeyError),
    #[error("encryption error: {0}")]
    Envelope(#[from] lumogate_crypto::EnvelopeError),
    #[error("conversation store error: {0}")]
    Store(#[from] lumogate_store::StoreError),
    #[error("sync backend request failed: {0}")]
    Backend(String),
    #[error("conversation {0} has no known remote space mapping")]
    UnmappedSpace(String),
}
