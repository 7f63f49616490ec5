//! Storage backend contract consumed by the proxy coordinator.
//!
//! The store persists a value under a key together with two wall-clock
//! stamps: when the value was written (`created_at`) and when a fetch for
//! the key last completed (`last_fetch_at`). Cache replacement is the
//! backend's business, typically via TTL eviction.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::BoxError;

/// Trait for values that can travel through the cache.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Result of a [`Store::get`] probe.
///
/// `value` is only populated when the backend held a payload that decoded
/// cleanly. The timestamps are reported independently of the value, so the
/// coordinator can still enforce throttling when the value cell is missing
/// or corrupt.
#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub value: Option<V>,
    pub created_at: Option<SystemTime>,
    pub last_fetch_at: Option<SystemTime>,
}

impl<V> Default for Lookup<V> {
    fn default() -> Self {
        Self {
            value: None,
            created_at: None,
            last_fetch_at: None,
        }
    }
}

/// Key-value backend with fetch bookkeeping.
#[async_trait]
pub trait Store<V: Payload>: Send + Sync + 'static {
    /// Probe the backend for `key`.
    ///
    /// Never fails: transport errors and undecodable payloads come back as
    /// an empty lookup (with whatever timestamps were still readable).
    async fn get(&self, key: &str) -> Lookup<V>;

    /// Persist `value` under `key` and stamp both `created_at` and
    /// `last_fetch_at` with the current wall clock. An `expire` of zero
    /// persists without a TTL. Atomicity across the writes is not
    /// required; readers treat missing stamps as unknown.
    async fn set(&self, key: &str, value: &V, expire: Duration) -> Result<(), BoxError>;
}
