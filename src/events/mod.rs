//! Typed invalidation channel between components.
//!
//! Producers (refresh, publish, status updates) emit
//! [`InvalidationEvent`]s; consumers subscribe and evict whatever they
//! derived from the named entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Playlist,
    Version,
    Note,
    Attachment,
    Status,
    Settings,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Playlist => "playlist",
            EntityKind::Version => "version",
            EntityKind::Note => "note",
            EntityKind::Attachment => "attachment",
            EntityKind::Status => "status",
            EntityKind::Settings => "settings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Changed,
    Synced,
    Deleted,
    Published,
    StatusChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub reason: ChangeReason,
}

impl InvalidationEvent {
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>, reason: ChangeReason) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            reason,
        }
    }
}

/// Broadcast bus for invalidation events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the slowest
    /// one starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Returns how many subscribers received it.
    pub fn emit(&self, event: InvalidationEvent) -> usize {
        log::debug!(
            "Event: {} {} {:?}",
            event.entity_kind,
            event.entity_id,
            event.reason
        );
        // No subscribers is not an error for a notification channel
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::EVENT_BUS_CAPACITY)
    }
}
