//! Proxy coordinator - the universal cache filling algorithm.
//!
//! One call, one decision, made against a single store snapshot:
//!
//! - Cache holds an acceptable value: serve it, and if it has aged past
//!   the staleness window (and the throttle allows) schedule a detached
//!   background refresh
//! - Cache holds a value the validator rejects: schedule the same refresh,
//!   report the rejection
//! - Cache empty while a peer holds the fetch lock: wait for the release
//!   notification, then serve whatever the peer cached
//! - Cache empty otherwise: fetch in the foreground, racing the call
//!   timeout; a recent attempt throttles the fetch entirely
//!
//! Concurrent callers for one key coalesce onto a single fetch through the
//! shared-key lock. All cross-process coordination goes through the
//! [`Store`] and [`Locker`] traits; the coordinator keeps no state of its
//! own.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, warn};

use crate::config::CallPolicy;
use crate::error::{BoxError, ProxyError};
use crate::locker::{LockGuard, Locker};
use crate::store::{Payload, Store};

/// Caller-supplied predicate deciding whether a value (cached or freshly
/// fetched) is acceptable.
pub type Validator<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Caller-supplied producer of the authoritative value for a key,
/// typically a call into an upstream service.
///
/// Implemented for any `Fn() -> Future` closure, so call sites can pass
/// `|| async { ... }` directly.
#[async_trait]
pub trait Fetcher<V>: Send + Sync + 'static {
    async fn fetch(&self) -> Result<V, BoxError>;
}

#[async_trait]
impl<V, F, Fut> Fetcher<V> for F
where
    V: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<V, BoxError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<V, BoxError> {
        self().await
    }
}

/// What a spawned fetch attempt delivered on its result channel.
enum FetchOutcome<V> {
    /// Won the lock and produced an accepted value.
    Fetched(V),
    /// Produced nothing usable: fetcher error or validator rejection.
    /// Nothing was cached.
    Rejected,
    /// Lost the lock race; the peer's value was read back from the store.
    PeerServed(V),
    /// Lost the lock race and the peer cached nothing in time.
    PeerMissed,
}

/// Run one proxied read for `key`.
///
/// The decision tree is evaluated once against the snapshot returned by
/// [`Store::get`]; time keeps advancing but the branch is not re-picked.
pub(crate) async fn proxy_call<V, S, L>(
    store: &Arc<S>,
    locker: &Arc<L>,
    key: &str,
    fetcher: Arc<dyn Fetcher<V>>,
    validator: Option<Validator<V>>,
    policy: CallPolicy,
) -> Result<V, ProxyError>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    let lookup = store.get(key).await;
    let now = SystemTime::now();

    if let Some(value) = lookup.value {
        // The cache answered. Decide whether it also needs refreshing.
        let invalid = match validator.as_ref() {
            Some(accept) => !accept(&value),
            None => false,
        };
        if refresh_due(now, lookup.created_at, lookup.last_fetch_at, invalid, &policy) {
            debug!("scheduling background refresh for key {}", key);
            // Fire and forget: the refresh outlives this call, and a failed
            // refresh is invisible; the next call re-evaluates from scratch.
            drop(spawn_fetch(store, locker, key, fetcher, validator, policy));
        }
        if invalid {
            return Err(ProxyError::InvalidCached);
        }
        return Ok(value);
    }

    if locker.is_locked(key).await {
        // A peer is already fetching this key; piggyback on its result.
        debug!("key {} locked by a peer, waiting for its fetch", key);
        return match wait_for_peer(store, locker, key, policy.timeout).await {
            Some(value) => Ok(value),
            None => Err(ProxyError::PeerWaitFailed),
        };
    }

    // Empty cache, no peer visible. A recent attempt that left no value
    // behind means the source is unhappy; don't hammer it.
    let throttled = match lookup.last_fetch_at {
        Some(fetched) => since(now, fetched) < policy.throttle,
        None => false,
    };
    if throttled {
        debug!("fetch for key {} throttled", key);
        return Err(ProxyError::ThrottledMiss);
    }

    let result = spawn_fetch(store, locker, key, fetcher, validator, policy);
    match time::timeout(policy.timeout, result).await {
        Ok(Ok(FetchOutcome::Fetched(value))) => Ok(value),
        Ok(Ok(FetchOutcome::PeerServed(value))) => Ok(value),
        Ok(Ok(FetchOutcome::Rejected)) => Err(ProxyError::InvalidFetched),
        Ok(Ok(FetchOutcome::PeerMissed)) => Err(ProxyError::PeerWaitFailed),
        // The fetch task died before delivering; nothing usable came out.
        Ok(Err(_)) => Err(ProxyError::InvalidFetched),
        // Timed out. The fetch keeps running detached and may still
        // populate the cache for later callers.
        Err(_) => Err(ProxyError::Timeout),
    }
}

/// Decide whether a cache hit should also schedule a background refresh.
///
/// Due when the value is known stale (creation time present and strictly
/// older than the staleness window) or was rejected by the validator, and
/// the throttle window has passed since the last fetch. An unknown
/// creation time is not enough to justify a refresh; an unknown last-fetch
/// time does not hold one back.
fn refresh_due(
    now: SystemTime,
    created_at: Option<SystemTime>,
    last_fetch_at: Option<SystemTime>,
    invalid: bool,
    policy: &CallPolicy,
) -> bool {
    let stale = match created_at {
        Some(created) => since(now, created) > policy.staleness,
        None => false,
    };
    if !stale && !invalid {
        return false;
    }
    match last_fetch_at {
        Some(fetched) => since(now, fetched) > policy.throttle,
        None => true,
    }
}

/// Launch one fetch attempt on a background task.
///
/// The attempt acquires the shared-key lock with the call timeout as its
/// lease. Losing the acquisition race degrades to waiting on the winner.
/// The single result is delivered on a capacity-one channel; the receiver
/// may be dropped (background refresh) without leaking anything.
fn spawn_fetch<V, S, L>(
    store: &Arc<S>,
    locker: &Arc<L>,
    key: &str,
    fetcher: Arc<dyn Fetcher<V>>,
    validator: Option<Validator<V>>,
    policy: CallPolicy,
) -> oneshot::Receiver<FetchOutcome<V>>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    let (tx, rx) = oneshot::channel();
    let store = Arc::clone(store);
    let locker = Arc::clone(locker);
    let key = key.to_owned();
    tokio::spawn(async move {
        let lock = match locker.acquire(&key, policy.timeout).await {
            Some(lock) => lock,
            None => {
                // Someone else won the race between the lock probe and the
                // acquisition; serve whatever they cache.
                let outcome = match wait_for_peer(&store, &locker, &key, policy.timeout).await {
                    Some(value) => FetchOutcome::PeerServed(value),
                    None => FetchOutcome::PeerMissed,
                };
                let _ = tx.send(outcome);
                return;
            }
        };

        // The fetcher runs in its own task so a panic cannot take the lock
        // release down with it.
        let fetched = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.fetch().await }
        })
        .await;
        let value = match fetched {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                debug!("fetcher failed for key {}: {}", key, err);
                None
            }
            Err(err) => {
                warn!("fetcher task for key {} did not complete: {}", key, err);
                None
            }
        };

        match value {
            Some(value) if validator.as_ref().map_or(true, |accept| accept(&value)) => {
                // Deliver before the write-back so the caller is not held
                // up by storage latency.
                let _ = tx.send(FetchOutcome::Fetched(value.clone()));
                if let Err(err) = store.set(&key, &value, policy.expire).await {
                    warn!("cache write-back failed for key {}: {}", key, err);
                }
            }
            Some(_) => {
                debug!("fetched value for key {} rejected by validator", key);
                let _ = tx.send(FetchOutcome::Rejected);
            }
            None => {
                let _ = tx.send(FetchOutcome::Rejected);
            }
        }
        lock.release().await;
    });
    rx
}

/// Wait for a peer's fetch to release the shared-key lock, then re-probe
/// the store.
///
/// A wakeup before the peer's write lands, or after a fetch that cached
/// nothing, yields `None` for this caller; the value may still appear to a
/// later call. On timeout the subscription keeps running detached.
async fn wait_for_peer<V, S, L>(
    store: &Arc<S>,
    locker: &Arc<L>,
    key: &str,
    timeout: Duration,
) -> Option<V>
where
    V: Payload,
    S: Store<V>,
    L: Locker,
{
    let wait = tokio::spawn({
        let locker = Arc::clone(locker);
        let key = key.to_owned();
        async move { locker.wait_for_release(&key).await }
    });
    match time::timeout(timeout, wait).await {
        Ok(Ok(true)) => store.get(key).await.value,
        Ok(Ok(false)) => None,
        Ok(Err(_)) => None,
        Err(_) => None,
    }
}

fn since(now: SystemTime, then: SystemTime) -> Duration {
    // Persisted stamps are wall-clock; clamp skew to zero age.
    now.duration_since(then).unwrap_or(Duration::ZERO)
}
