use dashmap::DashMap;
use lumogate_crypto::{KeyError, MasterKey, SpaceKey};

/// Owns the master key, a cache of per-space keys (DEKs are derived from
/// these on demand, never cached separately), and the local-id-to-remote-id
/// mapping the sync engine needs to talk to the backend without
/// re-deriving or re-resolving on every call.
pub struct SyncKeyManager {
    master: MasterKey,
    space_keys: DashMap<String, SpaceKey>,
    local_to_remote_space: DashMap<String, String>,
    local_to_remote_conversation: DashMap<String, String>,
}

impl SyncKeyManager {
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            space_keys: DashMap::new(),
            local_to_remote_space: DashMap::new(),
            local_to_remote_conversation: DashMap::new(),
        }
    }

    /// The space key for `space_id`, generating and caching a fresh
    /// random one on first use.
    fn space_key(&self, space_id: &str) -> SpaceKey {
        if let Some(existing) = self.space_keys.get(space_id) {
            return existing.clone();
        }
        let fresh = SpaceKey::generate();
        self.space_keys.insert(space_id.to_string(), fresh.clone());
        fresh
    }

    /// DEK for a space, derived from its (cached/generated) space key.
    pub fn dek_for_space(&self, space_id: &str) -> Result<[u8; 32], KeyError> {
        self.space_key(space_id).derive_dek()
    }

    /// Wrap a space's key under the master key, for handing to a backend
    /// that must store it but can never decrypt it.
    pub fn wrap_space_key(&self, space_id: &str) -> Result<Vec<u8>, KeyError> {
        self.master.wrap_space_key(space_id, &self.space_key(space_id))
    }

    pub fn map_space(&self, local_id: &str, remote_id: &str) {
        self.local_to_remote_space.insert(local_id.to_string(), remote_id.to_string());
    }

    pub fn remote_space_id(&self, local_id: &str) -> Option<String> {
        self.local_to_remote_space.get(local_id).map(|v| v.clone())
    }

    pub fn map_conversation(&self, local_id: &str, remote_id: &str) {
        self.local_to_remote_conversation.insert(local_id.to_string(), remote_id.to_string());
    }

    pub fn remote_conversation_id(&self, local_id: &str) -> Option<String> {
        self.local_to_remote_conversation.get(local_id).map(|v| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dek_is_cached_across_calls() {
        let mgr = SyncKeyManager::new(MasterKey::from_bytes([4u8; 32]));
        let a = mgr.dek_for_space("space-a").unwrap();
        let b = mgr.dek_for_space("space-a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_spaces_get_different_deks() {
        let mgr = SyncKeyManager::new(MasterKey::from_bytes([4u8; 32]));
        let a = mgr.dek_for_space("space-a").unwrap();
        let b = mgr.dek_for_space("space-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrapped_space_key_unwraps_back_to_the_cached_key() {
        let master = MasterKey::from_bytes([9u8; 32]);
        let mgr = SyncKeyManager::new(master.clone());
        let dek_before = mgr.dek_for_space("space-a").unwrap();
        let wrapped = mgr.wrap_space_key("space-a").unwrap();
        let unwrapped = master.unwrap_space_key("space-a", &wrapped).unwrap();
        assert_eq!(unwrapped.derive_dek().unwrap(), dek_before);
    }

    #[test]
    fn remote_mapping_round_trips() {
        let mgr = SyncKeyManager::new(MasterKey::from_bytes([5u8; 32]));
        assert!(mgr.remote_conversation_id("local-1").is_none());
        mgr.map_conversation("local-1", "remote-9");
        assert_eq!(mgr.remote_conversation_id("local-1"), Some("remote-9".to_string()));
    }
}
