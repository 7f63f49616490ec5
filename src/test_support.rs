//! In-memory Store and Locker used across the unit tests.
//!
//! The store keeps one cell per key, mirroring the three Redis cells of
//! the reference implementation; the locker hands out per-acquisition
//! tokens and fans release notifications out over a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BoxError;
use crate::locker::{LockGuard, Locker};
use crate::proxy::Fetcher;
use crate::store::{Lookup, Store};

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryCell {
    pub value: Option<String>,
    pub created_at: Option<SystemTime>,
    pub last_fetch_at: Option<SystemTime>,
    pub expire: Duration,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    cells: Mutex<HashMap<String, MemoryCell>>,
    sets: AtomicUsize,
}

impl MemoryStore {
    pub fn seed(&self, key: &str, cell: MemoryCell) {
        self.cells.lock().unwrap().insert(key.to_owned(), cell);
    }

    pub fn cell(&self, key: &str) -> Option<MemoryCell> {
        self.cells.lock().unwrap().get(key).cloned()
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store<String> for MemoryStore {
    async fn get(&self, key: &str) -> Lookup<String> {
        match self.cells.lock().unwrap().get(key) {
            Some(cell) => Lookup {
                value: cell.value.clone(),
                created_at: cell.created_at,
                last_fetch_at: cell.last_fetch_at,
            },
            None => Lookup::default(),
        }
    }

    async fn set(&self, key: &str, value: &String, expire: Duration) -> Result<(), BoxError> {
        let now = SystemTime::now();
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.cells.lock().unwrap().insert(
            key.to_owned(),
            MemoryCell {
                value: Some(value.clone()),
                created_at: Some(now),
                last_fetch_at: Some(now),
                expire,
            },
        );
        Ok(())
    }
}

pub(crate) struct MemoryLocker {
    inner: Arc<LockerInner>,
}

struct LockerInner {
    held: Mutex<HashMap<String, u64>>,
    release_tx: broadcast::Sender<String>,
    tokens: AtomicU64,
}

impl Default for MemoryLocker {
    fn default() -> Self {
        let (release_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(LockerInner {
                held: Mutex::new(HashMap::new()),
                release_tx,
                tokens: AtomicU64::new(1),
            }),
        }
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    type Guard = MemoryLock;

    async fn is_locked(&self, key: &str) -> bool {
        self.inner.held.lock().unwrap().contains_key(key)
    }

    async fn acquire(&self, key: &str, _lease: Duration) -> Option<MemoryLock> {
        let mut held = self.inner.held.lock().unwrap();
        if held.contains_key(key) {
            return None;
        }
        let token = self.inner.tokens.fetch_add(1, Ordering::SeqCst);
        held.insert(key.to_owned(), token);
        Some(MemoryLock {
            inner: Arc::clone(&self.inner),
            key: key.to_owned(),
            token,
        })
    }

    async fn wait_for_release(&self, key: &str) -> bool {
        let mut rx = self.inner.release_tx.subscribe();
        loop {
            match rx.recv().await {
                Ok(released) if released == key => return true,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    }
}

pub(crate) struct MemoryLock {
    inner: Arc<LockerInner>,
    key: String,
    token: u64,
}

#[async_trait]
impl LockGuard for MemoryLock {
    async fn release(&self) {
        let removed = {
            let mut held = self.inner.held.lock().unwrap();
            if held.get(&self.key) == Some(&self.token) {
                held.remove(&self.key);
                true
            } else {
                false
            }
        };
        if removed {
            let _ = self.inner.release_tx.send(self.key.clone());
        }
    }
}

/// Fetcher that counts invocations and optionally sleeps before answering.
pub(crate) struct SlowFetcher {
    value: String,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl SlowFetcher {
    pub fn new(value: &str, delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                value: value.to_owned(),
                delay,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl Fetcher<String> for SlowFetcher {
    async fn fetch(&self) -> Result<String, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.value.clone())
    }
}

/// Fetcher whose upstream is permanently down.
pub(crate) struct FailingFetcher;

#[async_trait]
impl Fetcher<String> for FailingFetcher {
    async fn fetch(&self) -> Result<String, BoxError> {
        Err("upstream unavailable".into())
    }
}

/// Fetcher that panics, for lock-release recovery tests.
pub(crate) struct PanickingFetcher;

#[async_trait]
impl Fetcher<String> for PanickingFetcher {
    async fn fetch(&self) -> Result<String, BoxError> {
        panic!("fetcher blew up");
    }
}
