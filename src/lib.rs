//! proxycache - read-through proxy caching
//!
//! Instead of doing cache lookups and deciding when to recompute, callers
//! hand a fetcher delegate to the cache and the coordinator figures out
//! the caching state by itself:
//!
//! - Cache hit: the value is served immediately; values older than the
//!   staleness window also schedule a detached background refresh
//! - Cache miss while a peer is fetching: wait for the peer's lock to be
//!   released, then serve what it cached
//! - Cache miss otherwise: fetch in the foreground, bounded by the call
//!   timeout
//!
//! Concurrent demand for one key collapses onto a single upstream fetch
//! guarded by a cluster-wide advisory lock, and fetch attempts are
//! rate-limited per key by the throttle window.
//!
//! Storage and locking backends are pluggable through the [`Store`] and
//! [`Locker`] traits; Redis reference implementations are included.

mod config;
mod error;
mod locker;
mod proxy;
mod proxy_cache;
mod redis_locker;
mod redis_store;
mod store;
#[cfg(test)]
mod test_support;

pub use config::CallPolicy;
pub use error::{BoxError, ProxyError};
pub use locker::{LockGuard, Locker};
pub use proxy::{Fetcher, Validator};
pub use proxy_cache::{ProxyCache, RedisProxyCache};
pub use redis_locker::{RedisLock, RedisLocker};
pub use redis_store::RedisStore;
pub use store::{Lookup, Payload, Store};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
