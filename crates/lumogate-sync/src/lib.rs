pub mod backend;
pub mod engine;
pub mod error;
pub mod keys;

pub use backend::{ReqwestSyncBackend, RemoteConversation, RemoteSpace, SyncBackend};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use keys::SyncKeyManager;
