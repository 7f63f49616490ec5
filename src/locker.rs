//! Cluster-wide advisory locking contract.
//!
//! One lock per cache key serializes fetches across processes. Acquisition
//! carries a lease so a crashed holder cannot wedge the key forever, and
//! each acquisition gets its own fencing token so a stale holder cannot
//! release a lock somebody else now owns.

use std::time::Duration;

use async_trait::async_trait;

/// Handle to a held lock.
#[async_trait]
pub trait LockGuard: Send + Sync + 'static {
    /// Release the lock and wake waiters.
    ///
    /// Idempotent. Deletes the lock only while the stored fencing token
    /// still matches this acquisition; after the lease has expired (and
    /// possibly been re-acquired) this is a no-op.
    async fn release(&self);
}

/// Advisory per-key lock with release notification.
#[async_trait]
pub trait Locker: Send + Sync + 'static {
    type Guard: LockGuard;

    /// Non-blocking snapshot of whether `key` is locked. Inherently racy.
    async fn is_locked(&self, key: &str) -> bool;

    /// Atomic set-if-absent with a lease. Returns `None` on contention or
    /// transport failure.
    async fn acquire(&self, key: &str, lease: Duration) -> Option<Self::Guard>;

    /// Block until a release notification for `key` is observed. Returns
    /// `false` on transport failure or a lost subscription. May miss a
    /// notification and block arbitrarily long; callers always race this
    /// against their own timeout.
    async fn wait_for_release(&self, key: &str) -> bool;
}
