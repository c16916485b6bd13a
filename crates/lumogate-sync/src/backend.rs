use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpace {
    pub id: String,
    pub wrapped_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConversation {
    pub id: String,
    pub space_id: String,
    pub encrypted_title: Option<String>,
}

/// Out-of-scope collaborator: the encrypted-storage server's REST surface.
/// This spec only fixes the shape the sync engine's push/pull algorithm
/// needs — `list_spaces`, `create_space`, `create_conversation`,
/// `patch_conversation`, `create_message` — not the server itself.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn list_spaces(&self) -> Result<Vec<RemoteSpace>, SyncError>;
    async fn create_space(&self, wrapped_key: &str) -> Result<RemoteSpace, SyncError>;
    async fn create_conversation(&self, space_id: &str) -> Result<RemoteConversation, SyncError>;
    async fn patch_conversation(
        &self,
        conversation_id: &str,
        encrypted_title: &str,
    ) -> Result<(), SyncError>;
    async fn create_message(
        &self,
        conversation_id: &str,
        encrypted_body: &str,
    ) -> Result<(), SyncError>;
    async fn list_conversations(&self, space_id: &str) -> Result<Vec<RemoteConversation>, SyncError>;
}

pub struct ReqwestSyncBackend {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl ReqwestSyncBackend {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), bearer_token: bearer_token.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SyncBackend for ReqwestSyncBackend {
    async fn list_spaces(&self) -> Result<Vec<RemoteSpace>, SyncError> {
        self.client
            .get(self.url("/spaces"))
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))
    }

    async fn create_space(&self, wrapped_key: &str) -> Result<RemoteSpace, SyncError> {
        self.client
            .post(self.url("/spaces"))
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "wrappedKey": wrapped_key }))
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))
    }

    async fn create_conversation(&self, space_id: &str) -> Result<RemoteConversation, SyncError> {
        self.client
            .post(self.url(&format!("/spaces/{space_id}/conversations")))
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))
    }

    async fn patch_conversation(&self, conversation_id: &str, encrypted_title: &str) -> Result<(), SyncError> {
        self.client
            .patch(self.url(&format!("/conversations/{conversation_id}")))
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "encryptedTitle": encrypted_title }))
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn create_message(&self, conversation_id: &str, encrypted_body: &str) -> Result<(), SyncError> {
        self.client
            .post(self.url(&format!("/conversations/{conversation_id}/messages")))
            .bearer_auth(&self.bearer_token)
            .json(&serde_json::json!({ "encryptedBody": encrypted_body }))
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_conversations(&self, space_id: &str) -> Result<Vec<RemoteConversation>, SyncError> {
        self.client
            .get(self.url(&format!("/spaces/{space_id}/conversations")))
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Backend(e.to_string()))
    }
}
