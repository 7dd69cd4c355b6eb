//! Thin wrapper over the external key-value store.
//!
//! The coordinator only ever needs SET-if-absent, GET, SET, EXPIRE and a
//! prefix scan; `KvStore` pins that down to a small trait so the rest of the
//! crate never talks to `redis` directly, and so tests can swap in
//! [`MemoryKv`] instead of requiring a running Redis.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Error;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically set `key` to `value` with the given TTL, but only if `key`
    /// does not already exist. Returns `true` if the set happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Refresh a key's TTL without touching its value.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Error>;

    /// All keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

/// Production adapter over a Redis-compatible store.
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| Error::Kv(format!("invalid redis url '{}': {}", redis_url, err)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| Error::Kv(format!("redis connect failed: {}", err)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|err| Error::Kv(err.to_string()))?;
        Ok(result.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|err| Error::Kv(err.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        conn.set(key, value)
            .await
            .map_err(|err| Error::Kv(err.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .pexpire(key, ttl.as_millis() as usize)
            .await
            .map_err(|err| Error::Kv(err.to_string()))?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        conn.keys(pattern)
            .await
            .map_err(|err| Error::Kv(err.to_string()))
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory stand-in for the external KV, used by the crate's own tests.
pub struct MemoryKv {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    fn is_live(entry: &Entry, now: Instant) -> bool {
        match entry.expires_at {
            Some(at) => now < at,
            None => true,
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let now = Instant::now();
        let mut data = self.data.lock().unwrap();
        if let Some(existing) = data.get(key) {
            if Self::is_live(existing, now) {
                return Ok(false);
            }
        }
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let now = Instant::now();
        let data = self.data.lock().unwrap();
        Ok(data
            .get(key)
            .filter(|e| Self::is_live(e, now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        let expires_at = data.get(key).and_then(|e| e.expires_at);
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let now = Instant::now();
        let data = self.data.lock().unwrap();
        Ok(data
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && Self::is_live(e, now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
