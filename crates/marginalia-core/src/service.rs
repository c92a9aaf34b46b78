//! Annotation service
//!
//! The entry point used by the viewer. Every operation degrades instead of
//! failing: if a document has no resolvable identity or the disk refuses a
//! write, viewing continues and the problem is reported through `tracing`
//! and [`StoreEvent`]s.
//!
//! ## Usage
//!
//! ```ignore
//! let service = AnnotationService::open(&Config::load()?)?;
//! let doc = DocumentRef::from_path("/docs/paper.pdf")?;
//!
//! // On document open
//! for record in service.restore_annotations(&doc, page_count) { /* draw */ }
//!
//! // On user markup; returns immediately
//! service.save_annotation(record, &doc, "paper.pdf");
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::events::{EventBus, StoreEvent};
use crate::identity::DocumentRef;
use crate::models::{AnnotationRecord, DocumentAnnotations};
use crate::queue::{WriteJob, WriteQueue};
use crate::storage::StorageResult;
use crate::store::RecordStore;

/// Facade over identity resolution, the record store and the write queue
pub struct AnnotationService {
    // Dropped first: flushes queued writes
    queue: WriteQueue,
    store: Arc<RecordStore>,
    events: EventBus,
}

impl AnnotationService {
    /// Open the service with the annotations directory from `config`
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_with_workers(config.annotations_dir(), config.write_workers)
    }

    /// Open the service on a specific storage directory
    pub fn open_at(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::open_with_workers(dir, Config::default().write_workers)
    }

    fn open_with_workers(dir: impl Into<PathBuf>, workers: usize) -> StorageResult<Self> {
        let events = EventBus::new();
        let store = Arc::new(RecordStore::with_events(dir, events.clone())?);
        let queue = WriteQueue::start(Arc::clone(&store), events.clone(), workers)?;

        Ok(Self {
            queue,
            store,
            events,
        })
    }

    /// Persist an annotation in the background
    ///
    /// Returns immediately. Use [`flush`](Self::flush) to wait for completion.
    pub fn save_annotation(&self, record: AnnotationRecord, doc: &DocumentRef, display_name: &str) {
        let Some(key) = self.resolve_key(doc) else {
            return;
        };

        self.queue.submit(WriteJob::Upsert {
            key,
            record,
            display_name: display_name.to_string(),
        });
    }

    /// All stored annotations for a document
    pub fn load_annotations(&self, doc: &DocumentRef) -> Vec<AnnotationRecord> {
        let Some(key) = self.resolve_key(doc) else {
            return Vec::new();
        };

        self.store.load_all(&key).unwrap_or_else(|e| {
            warn!("Could not load annotations for {:?}: {}", key, e);
            Vec::new()
        })
    }

    /// Annotations that can be drawn on a document with `page_count` pages
    ///
    /// Records pointing past the last page are skipped; the rest are
    /// returned in stored order.
    pub fn restore_annotations(&self, doc: &DocumentRef, page_count: u32) -> Vec<AnnotationRecord> {
        let Some(key) = self.resolve_key(doc) else {
            return Vec::new();
        };

        let collection = match self.store.load_collection(&key) {
            Ok(Some(collection)) => collection,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Could not load annotations for {:?}: {}", key, e);
                return Vec::new();
            }
        };

        let (valid, stale) = collection.partition_by_page_count(page_count);
        for record in stale {
            debug!(
                "Skipping annotation {} on page {} of {:?}: document has {} pages",
                record.id, record.page_index, key, page_count
            );
            self.events.emit(StoreEvent::StaleReference {
                key: key.clone(),
                id: record.id,
                page_index: record.page_index,
                page_count,
            });
        }
        valid
    }

    /// Remove an annotation in the background
    pub fn delete_annotation(&self, id: Uuid, doc: &DocumentRef) {
        let Some(key) = self.resolve_key(doc) else {
            return;
        };

        self.queue.submit(WriteJob::Delete { key, id });
    }

    /// Every stored collection
    pub fn list_all_saved_documents(&self) -> Vec<DocumentAnnotations> {
        self.store.list_all_collections().unwrap_or_else(|e| {
            warn!("Could not list saved annotations: {}", e);
            Vec::new()
        })
    }

    /// Delete every stored collection once queued writes have landed
    pub fn clear_all_saved_annotations(&self) {
        self.queue.flush();
        if let Err(e) = self.store.clear_all() {
            warn!("Could not clear saved annotations: {}", e);
        }
    }

    /// Block until every queued write has been applied
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Receive persistence events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Direct access to the underlying store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn resolve_key(&self, doc: &DocumentRef) -> Option<String> {
        match doc.resolve() {
            Ok(key) => Some(key),
            Err(e) => {
                debug!("Annotations disabled for document: {}", e);
                self.events.emit(StoreEvent::IdentityUnresolvable {
                    error: e.to_string(),
                });
                None
            }
        }
    }
}
