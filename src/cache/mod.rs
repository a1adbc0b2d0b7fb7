//! Session-scoped caches for remote lookups.

pub mod coalescer;

pub use coalescer::{CacheEntry, Coalescer};

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::events::{EntityKind, EventBus, InvalidationEvent};
use crate::remote::{EntityType, NoteLabel, RemoteVersion, StatusOption};

/// Every cache the session owns. Constructed once per session and handed
/// out by reference; `reset` is the only way to clear all of it at once.
pub struct RemoteCaches {
    /// Keyed by entity type and project id.
    pub statuses: Coalescer<(EntityType, String), Vec<StatusOption>>,
    /// Keyed by the rendered query expression.
    pub searches: Coalescer<String, Vec<RemoteVersion>>,
    pub versions: Coalescer<String, Option<RemoteVersion>>,
    pub labels: Coalescer<(), Vec<NoteLabel>>,
}

impl Default for RemoteCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteCaches {
    pub fn new() -> Self {
        Self {
            statuses: Coalescer::new("statuses"),
            searches: Coalescer::new("searches"),
            versions: Coalescer::new("versions"),
            labels: Coalescer::new("labels"),
        }
    }

    pub fn reset(&self) {
        self.statuses.reset();
        self.searches.reset();
        self.versions.reset();
        self.labels.reset();
        log::info!("All remote caches cleared");
    }

    /// Evict whatever was derived from the entity named by `event`.
    pub fn apply(&self, event: &InvalidationEvent) {
        match event.entity_kind {
            EntityKind::Version => {
                self.versions.invalidate(&event.entity_id);
                // Search rows embed version status and naming
                self.searches.reset();
            }
            EntityKind::Status => {
                self.statuses.invalidate_where(|(_, project)| project == &event.entity_id);
            }
            EntityKind::Settings => self.reset(),
            EntityKind::Playlist | EntityKind::Note | EntityKind::Attachment => {}
        }
    }
}

/// Keep `caches` in step with the bus until the bus is dropped.
///
/// A lagging subscriber has missed events it cannot recover, so it drops
/// everything instead.
pub fn spawn_cache_invalidator(bus: &EventBus, caches: Arc<RemoteCaches>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => caches.apply(&event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Cache invalidator lagged by {} events, resetting caches", missed);
                    caches.reset();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
