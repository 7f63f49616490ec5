//! Redis-backed reference locker.
//!
//! The lock cell `K.lock` holds a per-acquisition fencing token and is
//! created with `SET NX EX`, so the lease caps how long a crashed holder
//! can wedge a key. Release publishes on channel `K.lock` before deleting
//! the cell; the pair is not atomic, which is tolerable because waiters
//! re-probe the store rather than the lock after waking.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::locker::{LockGuard, Locker};

const LOCK_SUFFIX: &str = ".lock";

fn lock_cell(key: &str) -> String {
    format!("{}{}", key, LOCK_SUFFIX)
}

/// Locker over Redis.
///
/// Commands go through a shared connection manager; each
/// `wait_for_release` opens its own pub/sub connection, since a
/// subscribed connection cannot serve regular commands.
pub struct RedisLocker {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisLocker {
    pub async fn new(client: &redis::Client) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: client.clone(),
            conn: ConnectionManager::new(client.clone()).await?,
        })
    }
}

#[async_trait]
impl Locker for RedisLocker {
    type Guard = RedisLock;

    async fn is_locked(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("EXISTS")
            .arg(lock_cell(key))
            .query_async::<bool>(&mut conn)
            .await
        {
            Ok(held) => held,
            Err(err) => {
                warn!("lock probe failed for key {}: {}", key, err);
                false
            }
        }
    }

    async fn acquire(&self, key: &str, lease: Duration) -> Option<RedisLock> {
        let mut conn = self.conn.clone();
        let cell = lock_cell(key);
        let token = Uuid::new_v4().to_string();
        let lease_secs = lease.as_secs().max(1);
        let reply: Result<Option<String>, _> = redis::cmd("SET")
            .arg(&cell)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(lease_secs)
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(Some(_)) => {
                debug!("acquired fetch lock {}", cell);
                Some(RedisLock {
                    conn: self.conn.clone(),
                    key: key.to_owned(),
                    token,
                })
            }
            Ok(None) => None,
            Err(err) => {
                warn!("lock acquisition failed for key {}: {}", key, err);
                None
            }
        }
    }

    async fn wait_for_release(&self, key: &str) -> bool {
        let cell = lock_cell(key);
        let mut pubsub = match self.client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!("pubsub connection failed for {}: {}", cell, err);
                return false;
            }
        };
        if let Err(err) = pubsub.subscribe(&cell).await {
            warn!("subscribe failed for {}: {}", cell, err);
            return false;
        }
        let received = pubsub.on_message().next().await.is_some();
        received
    }
}

/// A held fetch lock. Releasing checks the fencing token first, so a
/// holder whose lease already expired cannot delete a successor's lock.
pub struct RedisLock {
    conn: ConnectionManager,
    key: String,
    token: String,
}

#[async_trait]
impl LockGuard for RedisLock {
    async fn release(&self) {
        let mut conn = self.conn.clone();
        let cell = lock_cell(&self.key);
        let held: Option<String> = match redis::cmd("GET").arg(&cell).query_async(&mut conn).await
        {
            Ok(held) => held,
            Err(err) => {
                warn!("lock release read failed for {}: {}", cell, err);
                return;
            }
        };
        if held.as_deref() != Some(self.token.as_str()) {
            // lease expired, possibly re-acquired by someone else
            return;
        }
        let published: Result<(), _> = redis::pipe()
            .publish(&cell, "done")
            .ignore()
            .del(&cell)
            .ignore()
            .query_async(&mut conn)
            .await;
        if let Err(err) = published {
            warn!("lock release failed for {}: {}", cell, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_cell_suffix() {
        assert_eq!(lock_cell("svc.user:1"), "svc.user:1.lock");
    }
}
