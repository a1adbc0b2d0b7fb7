//! Debounced draft persistence.
//!
//! [`PendingWrites`] is the pure queue: one slot per key, a newer write
//! replaces the queued one and restarts its window. [`DraftPersister`]
//! drives it from a tokio task and owns the single write path to storage,
//! so for any key an older value is never stored after a newer one.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::models::{DraftKey, DraftRecord};
use crate::errors::{AppError, BatchResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite<K, V> {
    pub key: K,
    pub value: V,
    pub seq: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    seq: u64,
    due_at: Instant,
}

#[derive(Debug)]
pub struct PendingWrites<K, V> {
    window: Duration,
    slots: HashMap<K, Slot<V>>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V> PendingWrites<K, V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Queue `value` for `key`, superseding anything already queued for it.
    /// Returns the write's sequence number.
    pub fn push(&mut self, key: K, value: V, now: Instant) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.slots.insert(
            key,
            Slot {
                value,
                seq,
                due_at: now + self.window,
            },
        );
        seq
    }

    /// Remove and return writes whose window has elapsed, oldest first.
    pub fn due(&mut self, now: Instant) -> Vec<PendingWrite<K, V>> {
        let ready: Vec<K> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.due_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        self.take(ready)
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<PendingWrite<K, V>> {
        let keys: Vec<K> = self.slots.keys().cloned().collect();
        self.take(keys)
    }

    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|slot| slot.value)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|slot| slot.due_at).min()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn take(&mut self, keys: Vec<K>) -> Vec<PendingWrite<K, V>> {
        let mut writes: Vec<PendingWrite<K, V>> = keys
            .into_iter()
            .filter_map(|key| {
                self.slots.remove(&key).map(|slot| PendingWrite {
                    key,
                    value: slot.value,
                    seq: slot.seq,
                })
            })
            .collect();
        writes.sort_by_key(|w| w.seq);
        writes
    }
}

/// Durable destination for draft bookkeeping.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn persist(&self, key: &DraftKey, record: &DraftRecord) -> Result<(), AppError>;
}

struct Shared {
    queue: Mutex<PendingWrites<DraftKey, DraftRecord>>,
    write_lock: AsyncMutex<()>,
    notify: Notify,
    store: Arc<dyn DraftStore>,
}

impl Shared {
    async fn persist_all(&self, writes: Vec<PendingWrite<DraftKey, DraftRecord>>) -> BatchResult<DraftKey> {
        let mut result = BatchResult::default();
        for write in writes {
            match self.store.persist(&write.key, &write.value).await {
                Ok(()) => result.record_success(write.key),
                Err(e) => {
                    log::error!("Failed to persist draft {}: {}", write.key, e);
                    result.record_failure(write.key, e);
                }
            }
        }
        result
    }
}

/// Background writer for draft edits. Aborts its task when dropped.
pub struct DraftPersister {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl DraftPersister {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn DraftStore>, window: Duration) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(PendingWrites::new(window)),
            write_lock: AsyncMutex::new(()),
            notify: Notify::new(),
            store,
        });
        let task = tokio::spawn(run(shared.clone()));
        Self { shared, task }
    }

    pub fn schedule(&self, key: DraftKey, record: DraftRecord) {
        self.shared.queue.lock().push(key, record, Instant::now());
        self.shared.notify.notify_one();
    }

    /// Drop the queued write for `key`, if any.
    pub fn cancel(&self, key: &DraftKey) -> bool {
        self.shared.queue.lock().cancel(key).is_some()
    }

    /// Persist every queued write now.
    pub async fn flush(&self) -> BatchResult<DraftKey> {
        let _guard = self.shared.write_lock.lock().await;
        let writes = self.shared.queue.lock().drain();
        if !writes.is_empty() {
            log::debug!("Flushing {} pending draft writes", writes.len());
        }
        self.shared.persist_all(writes).await
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Discard queued writes without persisting them. Returns how many were dropped.
    pub fn reset(&self) -> usize {
        let dropped = self.shared.queue.lock().drain().len();
        if dropped > 0 {
            log::info!("Discarded {} pending draft writes", dropped);
        }
        dropped
    }
}

impl Drop for DraftPersister {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let deadline = shared.queue.lock().next_deadline();
        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    // New write may have moved the deadline
                    _ = shared.notify.notified() => continue,
                }
            }
            None => {
                shared.notify.notified().await;
                continue;
            }
        }

        let _guard = shared.write_lock.lock().await;
        let writes = shared.queue.lock().due(Instant::now());
        shared.persist_all(writes).await;
    }
}
