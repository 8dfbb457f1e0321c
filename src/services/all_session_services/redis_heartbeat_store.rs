use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::{
    models::{error_models::StoreError, heartbeat_models::HeartbeatKey},
    services::all_session_services::heartbeat_store::HeartbeatStore,
};

/// Heartbeat store backed by Redis through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisHeartbeatStore {
    conn: ConnectionManager,
}

impl RedisHeartbeatStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis heartbeat store");
        Ok(RedisHeartbeatStore { conn })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    async fn get(&self, key: &HeartbeatKey) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn multi_get(&self, keys: &[HeartbeatKey]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&names)
            .query_async(&mut conn)
            .await?;
        if values.len() != keys.len() {
            return Err(StoreError::Unavailable(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn set(&self, key: &HeartbeatKey, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key.to_string())
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &HeartbeatKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // nil reply means the key already existed
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.to_string())
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, keys: &[HeartbeatKey]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let removed: u64 = redis::cmd("DEL").arg(&names).query_async(&mut conn).await?;
        Ok(removed)
    }
}
