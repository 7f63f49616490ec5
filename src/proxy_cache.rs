//! Caller-facing facade.
//!
//! Binds a store/locker pair, a key prefix and default call timings, and
//! forwards to the proxy coordinator. No decision logic lives here.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::CallPolicy;
use crate::error::ProxyError;
use crate::locker::Locker;
use crate::proxy::{self, Fetcher, Validator};
use crate::redis_locker::RedisLocker;
use crate::redis_store::RedisStore;
use crate::store::{Payload, Store};

/// Read-through cache over a [`Store`]/[`Locker`] pair.
///
/// Every caller key is stored under `<prefix>.<key>`, so several caches
/// can share one backend without colliding.
pub struct ProxyCache<V, S, L>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    store: Arc<S>,
    locker: Arc<L>,
    prefix: String,
    defaults: CallPolicy,
    _payload: PhantomData<fn() -> V>,
}

impl<V, S, L> Clone for ProxyCache<V, S, L>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locker: Arc::clone(&self.locker),
            prefix: self.prefix.clone(),
            defaults: self.defaults,
            _payload: PhantomData,
        }
    }
}

impl<V, S, L> ProxyCache<V, S, L>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    pub fn new(store: S, locker: L, prefix: impl Into<String>, defaults: CallPolicy) -> Self {
        Self {
            store: Arc::new(store),
            locker: Arc::new(locker),
            prefix: prefix.into(),
            defaults,
            _payload: PhantomData,
        }
    }

    /// The storage key a caller key maps to.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}.{}", self.prefix, key)
    }

    /// Proxy a read through the cache with the bound default timings.
    pub async fn call<F>(
        &self,
        key: &str,
        fetcher: F,
        validator: Option<Validator<V>>,
    ) -> Result<V, ProxyError>
    where
        F: Fetcher<V>,
    {
        self.call_with(key, fetcher, validator, self.defaults).await
    }

    /// Proxy a read through the cache with an explicit per-call policy.
    pub async fn call_with<F>(
        &self,
        key: &str,
        fetcher: F,
        validator: Option<Validator<V>>,
        policy: CallPolicy,
    ) -> Result<V, ProxyError>
    where
        F: Fetcher<V>,
    {
        let fetcher: Arc<dyn Fetcher<V>> = Arc::new(fetcher);
        proxy::proxy_call(
            &self.store,
            &self.locker,
            &self.storage_key(key),
            fetcher,
            validator,
            policy,
        )
        .await
    }

    /// Plain cache read with no proxy logic: whatever the store currently
    /// holds for `key`, if anything.
    pub async fn peek(&self, key: &str) -> Option<V> {
        self.store.get(&self.storage_key(key)).await.value
    }

    /// The store backing this facade.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// Redis-flavored facade using Redis for both the store and the locker.
pub type RedisProxyCache<V> = ProxyCache<V, RedisStore<V>, RedisLocker>;

impl<V: Payload> RedisProxyCache<V> {
    /// Connect to Redis and build a facade bound to `prefix`.
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        defaults: CallPolicy,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let store = RedisStore::new(&client).await?;
        let locker = RedisLocker::new(&client).await?;
        Ok(Self::new(store, locker, prefix, defaults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryCell, MemoryLocker, MemoryStore, SlowFetcher};
    use std::time::{Duration, SystemTime};

    fn cache_with(store: MemoryStore) -> ProxyCache<String, MemoryStore, MemoryLocker> {
        ProxyCache::new(
            store,
            MemoryLocker::default(),
            "test",
            CallPolicy {
                expire: Duration::from_secs(10),
                staleness: Duration::from_millis(300),
                throttle: Duration::from_millis(100),
                timeout: Duration::from_millis(600),
            },
        )
    }

    #[tokio::test]
    async fn keys_are_prefixed() {
        let cache = cache_with(MemoryStore::default());
        let (fetcher, _calls) = SlowFetcher::new("abc", Duration::ZERO);
        assert_eq!(cache.call("k", fetcher, None).await, Ok("abc".to_owned()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // stored under the composed key, not the bare one
        assert!(cache.store().cell("test.k").is_some());
        assert!(cache.store().cell("k").is_none());
        assert_eq!(cache.storage_key("k"), "test.k");
    }

    #[tokio::test]
    async fn peek_reads_without_fetching() {
        let store = MemoryStore::default();
        let now = SystemTime::now();
        store.seed(
            "test.k",
            MemoryCell {
                value: Some("abc".to_owned()),
                created_at: Some(now),
                last_fetch_at: Some(now),
                expire: Duration::ZERO,
            },
        );
        let cache = cache_with(store);
        assert_eq!(cache.peek("k").await, Some("abc".to_owned()));
        assert_eq!(cache.peek("missing").await, None);
    }

    #[tokio::test]
    async fn per_call_policy_overrides_defaults() {
        let store = MemoryStore::default();
        // recent failed attempt: throttled under any nonzero throttle
        store.seed(
            "test.k",
            MemoryCell {
                value: None,
                created_at: None,
                last_fetch_at: Some(SystemTime::now()),
                expire: Duration::ZERO,
            },
        );
        let cache = cache_with(store);

        let (fetcher, _calls) = SlowFetcher::new("abc", Duration::ZERO);
        let mut policy = CallPolicy::default();
        policy.throttle = Duration::ZERO;
        // zero throttle lets the call go straight to the fetcher
        assert_eq!(
            cache.call_with("k", fetcher, None, policy).await,
            Ok("abc".to_owned())
        );
    }
}
