//! Redis-backed reference store.
//!
//! For key `K` three cells are kept: `K` holds the JSON payload, `K.crt`
//! the creation timestamp and `K.lrt` the last-fetch timestamp, both as
//! decimal seconds since the epoch. All three share the TTL and travel in
//! one pipelined batch per operation. The writes are not atomic; a reader
//! may see a value without its stamps, and treats the missing ones as
//! unknown.

use std::marker::PhantomData;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::error::BoxError;
use crate::store::{Lookup, Payload, Store};

const CREATED_SUFFIX: &str = ".crt";
const LAST_FETCH_SUFFIX: &str = ".lrt";

/// Store over a shared Redis connection manager.
///
/// The manager is cloned per operation; it multiplexes over one
/// connection and reconnects on its own.
pub struct RedisStore<V> {
    conn: ConnectionManager,
    _payload: PhantomData<fn() -> V>,
}

impl<V> Clone for RedisStore<V> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            _payload: PhantomData,
        }
    }
}

impl<V: Payload> RedisStore<V> {
    pub async fn new(client: &redis::Client) -> Result<Self, redis::RedisError> {
        Ok(Self {
            conn: ConnectionManager::new(client.clone()).await?,
            _payload: PhantomData,
        })
    }

    /// Remaining TTL of the value cell, if the key exists and carries one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut conn = self.conn.clone();
        match redis::cmd("TTL").arg(key).query_async::<i64>(&mut conn).await {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
            Ok(_) => None, // -1 without TTL, -2 missing key
            Err(err) => {
                warn!("TTL probe failed for key {}: {}", key, err);
                None
            }
        }
    }
}

#[async_trait]
impl<V: Payload> Store<V> for RedisStore<V> {
    async fn get(&self, key: &str) -> Lookup<V> {
        let mut conn = self.conn.clone();
        let batch: Result<(Option<String>, Option<String>, Option<String>), _> = redis::pipe()
            .get(key)
            .get(format!("{}{}", key, CREATED_SUFFIX))
            .get(format!("{}{}", key, LAST_FETCH_SUFFIX))
            .query_async(&mut conn)
            .await;
        let (raw, created, last_fetch) = match batch {
            Ok(cells) => cells,
            Err(err) => {
                warn!("redis GET pipeline failed for key {}: {}", key, err);
                return Lookup::default();
            }
        };
        let value = raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("cached payload for key {} failed to decode: {}", key, err);
                None
            }
        });
        Lookup {
            value,
            created_at: created.as_deref().and_then(parse_epoch_seconds),
            last_fetch_at: last_fetch.as_deref().and_then(parse_epoch_seconds),
        }
    }

    async fn set(&self, key: &str, value: &V, expire: Duration) -> Result<(), BoxError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let now = epoch_seconds(SystemTime::now());
        let created_key = format!("{}{}", key, CREATED_SUFFIX);
        let last_fetch_key = format!("{}{}", key, LAST_FETCH_SUFFIX);

        let mut pipe = redis::pipe();
        let expire_secs = expire.as_secs();
        if expire_secs > 0 {
            pipe.set_ex(key, json, expire_secs).ignore();
            pipe.set_ex(&created_key, now, expire_secs).ignore();
            pipe.set_ex(&last_fetch_key, now, expire_secs).ignore();
        } else {
            pipe.set(key, json).ignore();
            pipe.set(&created_key, now).ignore();
            pipe.set(&last_fetch_key, now).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

fn parse_epoch_seconds(raw: &str) -> Option<SystemTime> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

fn epoch_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
