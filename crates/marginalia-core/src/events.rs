//! Persistence events
//!
//! Annotation persistence is best-effort: failures never reach the viewer as
//! errors. They are reported here instead (and through `tracing`) so hosts
//! and tests can observe them.

use std::path::PathBuf;

use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the event channel; slow subscribers miss older events
pub const EVENT_CAPACITY: usize = 256;

/// Events emitted by the record store and the annotation service
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A collection was written
    Saved { key: String, annotation_count: usize },
    /// A record was removed
    Deleted { key: String, id: Uuid },
    /// A collection was found through the size-token fallback and migrated
    /// to the queried key
    FallbackMatched { key: String, source: PathBuf },
    /// A stored file did not decode cleanly but was repaired
    CorruptionRepaired { path: PathBuf, dropped_bytes: usize },
    /// A stored file could not be decoded and is treated as empty
    CorruptionDetected { path: PathBuf, details: String },
    /// A stored file could not be read and was left out of a listing
    ReadFailed { path: PathBuf, error: String },
    /// A write did not reach disk; the previous version is intact
    WriteFailed { key: String, error: String },
    /// A record was skipped on restore because its page no longer exists
    StaleReference {
        key: String,
        id: Uuid,
        page_index: u32,
        page_count: u32,
    },
    /// No key could be derived for a document; nothing is persisted for it
    IdentityUnresolvable { error: String },
}

/// Sending half shared by the store and the service
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
