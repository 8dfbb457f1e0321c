use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{error_models::StoreError, heartbeat_models::HeartbeatKey};

/// Key/value store holding one entry per live IDE session, with per-key expiry.
///
/// Reads tolerate keys that vanished between listing and fetching: a missing key is `None`.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn get(&self, key: &HeartbeatKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// One slot per key, in order.
    async fn multi_get(&self, keys: &[HeartbeatKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    /// Writes unconditionally and resets the expiry.
    async fn set(&self, key: &HeartbeatKey, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Writes only when the key is absent. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &HeartbeatKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Returns how many keys existed.
    async fn delete(&self, keys: &[HeartbeatKey]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local store for development and tests. Expired entries are dropped lazily.
#[derive(Debug, Clone, Default)]
pub struct MemoryHeartbeatStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.len()
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, entry| entry.expires_at > now);
}

fn live_value(entries: &HashMap<String, Entry>, key: &HeartbeatKey) -> Option<Vec<u8>> {
    entries
        .get(&key.to_string())
        .filter(|entry| entry.expires_at > Instant::now())
        .map(|entry| entry.value.clone())
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn get(&self, key: &HeartbeatKey) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(live_value(&entries, key))
    }

    async fn multi_get(&self, keys: &[HeartbeatKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(keys.iter().map(|key| live_value(&entries, key)).collect())
    }

    async fn set(&self, key: &HeartbeatKey, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &HeartbeatKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        if entries.contains_key(&key.to_string()) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, keys: &[HeartbeatKey]) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        let removed = keys
            .iter()
            .filter(|key| entries.remove(&key.to_string()).is_some())
            .count();
        Ok(removed as u64)
    }
}
