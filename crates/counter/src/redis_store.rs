//! Redis-backed counting store.
//!
//! Uses a Lua script to combine `INCR` with a conditional `EXPIRE` in a
//! single atomic round trip, which is what gives the fixed window its
//! cross-instance consistency. Connections go through
//! [`redis::aio::ConnectionManager`], which multiplexes concurrent callers
//! and reconnects on its own after a broken connection.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::OnceCell;
use tollgate_common::RedisConfig;
use tracing::{debug, warn};

use crate::{CountingStore, StoreError};

const INCR_WITH_EXPIRY: &str = r"
    local count = redis.call('INCR', KEYS[1])
    if count == 1 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
    end
    return count
";

pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    incr_script: redis::Script,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Create a store for the configured Redis endpoint.
    ///
    /// No connection is made here. The connection manager is established on
    /// first use, inside the running async context, so a Redis outage at
    /// startup degrades the store instead of failing the process.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
            incr_script: redis::Script::new(INCR_WITH_EXPIRY),
            conn: OnceCell::new(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("establishing redis connection manager");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "redis connection failed");
                StoreError::Unavailable(e.to_string())
            })?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        // EXPIRE takes whole seconds; a sub-second window must still produce
        // a counter that lives at least one second.
        let seconds = window.as_secs().max(1);

        let count: i64 = self
            .incr_script
            .key(self.namespaced(key))
            .arg(seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection().await?;
        // TTL returns -2 for a missing key and -1 for a key with no expiry.
        let secs: i64 = conn.ttl(self.namespaced(key)).await?;
        if secs < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(secs as u64)))
        }
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(self.namespaced(key)).await?;
        Ok(exists)
    }
}
