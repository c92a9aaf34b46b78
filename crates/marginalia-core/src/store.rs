//! Record store
//!
//! The `RecordStore` maps a document key to its persisted
//! `DocumentAnnotations` collection and owns everything about the files:
//!
//! - one JSON file per key in a single directory
//! - atomic rewrite of the whole collection on every mutation
//! - per-key critical sections (read current state, merge, write)
//! - size-token lookup fallback when a key has no exact file
//! - corruption repair, degrading to an empty collection
//!
//! ## Usage
//!
//! ```ignore
//! let store = RecordStore::open("/path/to/annotations")?;
//!
//! store.upsert("Report_pdf_102400", record, "Report.pdf")?;
//! let records = store.load_all("Report_pdf_102400")?;
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, StoreEvent};
use crate::models::{AnnotationRecord, DocumentAnnotations};
use crate::storage::persistence::{self, FileLayout};
use crate::storage::{
    decode_with_repair, encode, find_storage_location_for, DecodeOutcome, KeyLocks,
    StorageError, StorageResult,
};

/// Summary of what is on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub collections: usize,
    pub annotations: usize,
    pub bytes_on_disk: u64,
}

/// File-per-document annotation store
pub struct RecordStore {
    layout: FileLayout,
    locks: KeyLocks,
    events: EventBus,
}

impl RecordStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        Self::with_events(dir, EventBus::new())
    }

    /// Open a store that publishes to an existing event bus
    pub fn with_events(dir: impl Into<PathBuf>, events: EventBus) -> StorageResult<Self> {
        let layout = FileLayout::new(dir);
        layout.ensure_dir()?;
        debug!("Opened annotation store at {:?}", layout.dir());

        Ok(Self {
            layout,
            locks: KeyLocks::new(),
            events,
        })
    }

    /// The storage directory
    pub fn dir(&self) -> &Path {
        self.layout.dir()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ==================== Mutations ====================

    /// Insert or replace a record in the collection for `key`
    ///
    /// The display name of the collection is updated to `display_name`.
    pub fn upsert(
        &self,
        key: &str,
        record: AnnotationRecord,
        display_name: &str,
    ) -> StorageResult<()> {
        record.validate().map_err(StorageError::InvalidRecord)?;

        self.locks.with_lock(&lock_key(key), || -> StorageResult<()> {
            let mut collection = self
                .read_current(key)?
                .unwrap_or_else(|| DocumentAnnotations::new(key, display_name));

            collection.display_name = display_name.to_string();
            collection.upsert(record);
            self.write_collection(key, &mut collection)
        })
    }

    /// Remove a record by id
    ///
    /// Returns whether a record was removed. Nothing is written when the
    /// record is absent.
    pub fn delete(&self, key: &str, id: Uuid) -> StorageResult<bool> {
        self.locks.with_lock(&lock_key(key), || -> StorageResult<bool> {
            let Some(mut collection) = self.read_current(key)? else {
                return Ok(false);
            };

            if collection.remove(id).is_none() {
                return Ok(false);
            }

            self.write_collection(key, &mut collection)?;
            self.events.emit(StoreEvent::Deleted {
                key: key.to_string(),
                id,
            });
            Ok(true)
        })
    }

    /// Delete the exact collection file for `key`
    pub fn delete_collection(&self, key: &str) -> StorageResult<bool> {
        self.locks
            .with_lock(&lock_key(key), || {
                persistence::remove_file(&self.layout.path_for(key))
            })
    }

    /// Delete every persisted collection and any orphaned temp files
    ///
    /// Returns the number of collections removed.
    pub fn clear_all(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for path in self.layout.list_collection_files()? {
            let key = lock_key(persistence::stem_of(&path).unwrap_or_default());
            if self
                .locks
                .with_lock(&key, || persistence::remove_file(&path))?
            {
                removed += 1;
            }
        }
        for temp in self.layout.list_temp_files()? {
            persistence::remove_file(&temp)?;
        }

        info!("Cleared {} annotation collections", removed);
        Ok(removed)
    }

    // ==================== Queries ====================

    /// All records stored for `key`
    ///
    /// Missing and undecodable collections yield an empty list.
    pub fn load_all(&self, key: &str) -> StorageResult<Vec<AnnotationRecord>> {
        Ok(self
            .load_collection(key)?
            .map(|collection| collection.annotations)
            .unwrap_or_default())
    }

    /// The full collection for `key`, if one can be found
    pub fn load_collection(&self, key: &str) -> StorageResult<Option<DocumentAnnotations>> {
        self.read_current(key)
    }

    /// Every decodable collection, sorted by file name
    pub fn list_all_collections(&self) -> StorageResult<Vec<DocumentAnnotations>> {
        let mut collections = Vec::new();
        for path in self.layout.list_collection_files()? {
            // A file can disappear between listing and reading
            if let Some(collection) = self.read_listed(&path) {
                collections.push(collection);
            }
        }
        Ok(collections)
    }

    /// Count collections, records and bytes on disk
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let mut stats = StoreStats::default();
        for path in self.layout.list_collection_files()? {
            if let Ok(meta) = std::fs::metadata(&path) {
                stats.bytes_on_disk += meta.len();
            }
            if let Some(collection) = self.read_listed(&path) {
                stats.collections += 1;
                stats.annotations += collection.len();
            }
        }
        Ok(stats)
    }

    // ==================== Internals ====================

    /// Current collection for `key`: exact file, else size-token fallback
    fn read_current(&self, key: &str) -> StorageResult<Option<DocumentAnnotations>> {
        let Some(path) = find_storage_location_for(&self.layout, key) else {
            return Ok(None);
        };

        let Some(mut collection) = self.read_collection_at(&path)? else {
            return Ok(None);
        };

        if path != self.layout.path_for(key) {
            info!("Using annotations from {:?} for key {:?}", path, key);
            self.events.emit(StoreEvent::FallbackMatched {
                key: key.to_string(),
                source: path,
            });
            collection.document_key = key.to_string();
        }

        Ok(Some(collection))
    }

    /// Like `read_collection_at`, but an unreadable file is skipped
    fn read_listed(&self, path: &Path) -> Option<DocumentAnnotations> {
        match self.read_collection_at(path) {
            Ok(collection) => collection,
            Err(e) => {
                warn!("Skipping unreadable annotation file {:?}: {}", path, e);
                self.events.emit(StoreEvent::ReadFailed {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Read and decode one file, repairing or discarding corrupt content
    fn read_collection_at(&self, path: &Path) -> StorageResult<Option<DocumentAnnotations>> {
        let Some(bytes) = persistence::read_file(path)? else {
            return Ok(None);
        };

        match decode_with_repair(&bytes) {
            DecodeOutcome::Clean(collection) => Ok(Some(collection)),
            DecodeOutcome::Repaired {
                collection,
                dropped_bytes,
                original_error,
            } => {
                warn!(
                    "Repaired corrupted annotation file {:?} ({}), dropped {} bytes",
                    path, original_error, dropped_bytes
                );
                self.events.emit(StoreEvent::CorruptionRepaired {
                    path: path.to_path_buf(),
                    dropped_bytes,
                });
                Ok(Some(collection))
            }
            DecodeOutcome::Corrupt(e) => {
                let err = StorageError::CorruptDocument {
                    path: path.to_path_buf(),
                    details: e.to_string(),
                };
                warn!("{}; treating as empty", err);
                self.events.emit(StoreEvent::CorruptionDetected {
                    path: path.to_path_buf(),
                    details: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    /// Encode and atomically write a collection to the exact file for `key`
    fn write_collection(
        &self,
        key: &str,
        collection: &mut DocumentAnnotations,
    ) -> StorageResult<()> {
        collection.updated_at = Some(Utc::now());
        let path = self.layout.path_for(key);

        let result = encode(collection)
            .map_err(StorageError::from)
            .and_then(|bytes| persistence::atomic_write(&path, &bytes));

        match result {
            Ok(()) => {
                debug!(
                    "Saved {} annotations for {:?} to {:?}",
                    collection.len(),
                    key,
                    path
                );
                self.events.emit(StoreEvent::Saved {
                    key: key.to_string(),
                    annotation_count: collection.len(),
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save annotations for {:?}: {}", key, e);
                Err(e)
            }
        }
    }
}

/// Lock table key for a document key
///
/// Keys that sanitise to the same file stem share a file, so they must
/// share a lock.
pub(crate) fn lock_key(key: &str) -> String {
    persistence::file_stem_for(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotationKind, Color, Point, Rect};
    use crate::storage::persistence::temp_path_for;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn record(page: u32) -> AnnotationRecord {
        AnnotationRecord::new(
            AnnotationKind::Highlight,
            page,
            Rect::new(10.0, 20.0, 100.0, 15.0),
            Color::new(1.0, 1.0, 0.0, 0.5),
        )
    }

    fn open_store(temp_dir: &TempDir) -> RecordStore {
        RecordStore::open(temp_dir.path()).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested").join("annotations");

        let store = RecordStore::open(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
    }

    #[test]
    fn test_upsert_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = record(0).with_text("first");
        store.upsert("a_pdf_10", a.clone(), "a.pdf").unwrap();

        assert_eq!(store.load_all("a_pdf_10").unwrap(), vec![a]);
        assert!(temp_dir.path().join("a_pdf_10.json").exists());
    }

    #[test]
    fn test_load_missing_key_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert!(store.load_all("never_saved_1").unwrap().is_empty());
        assert!(store.load_collection("never_saved_1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let r = record(1);
        store.upsert("a_pdf_10", r.clone(), "a.pdf").unwrap();
        store.upsert("a_pdf_10", r.clone(), "a.pdf").unwrap();

        assert_eq!(store.load_all("a_pdf_10").unwrap(), vec![r]);
    }

    #[test]
    fn test_upsert_replaces_in_place_and_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = record(0);
        let b = record(1);
        let c = record(2);
        for r in [&a, &b, &c] {
            store.upsert("k_1", r.clone(), "k").unwrap();
        }

        let mut b2 = b.clone();
        b2.kind = AnnotationKind::Strikethrough;
        store.upsert("k_1", b2.clone(), "k").unwrap();

        assert_eq!(store.load_all("k_1").unwrap(), vec![a, b2, c]);
    }

    #[test]
    fn test_display_name_follows_latest_save() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert("k_1", record(0), "old name.pdf").unwrap();
        store.upsert("k_1", record(1), "new name.pdf").unwrap();

        let collection = store.load_collection("k_1").unwrap().unwrap();
        assert_eq!(collection.display_name, "new name.pdf");
        assert_eq!(collection.document_key, "k_1");
        assert!(collection.updated_at.is_some());
    }

    #[test]
    fn test_invalid_record_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let mut bad = record(0);
        bad.bounds.height = -3.0;

        let result = store.upsert("k_1", bad, "k");
        assert!(matches!(result, Err(StorageError::InvalidRecord(_))));
        assert!(!temp_dir.path().join("k_1.json").exists());
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = record(0);
        let b = record(1);
        store.upsert("k_1", a.clone(), "k").unwrap();
        store.upsert("k_1", b.clone(), "k").unwrap();

        assert!(store.delete("k_1", a.id).unwrap());
        assert_eq!(store.load_all("k_1").unwrap(), vec![b]);

        // Absent record and absent key are no-ops
        assert!(!store.delete("k_1", a.id).unwrap());
        assert!(!store.delete("other_2", a.id).unwrap());
        assert!(!temp_dir.path().join("other_2.json").exists());
    }

    #[test]
    fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let r = record(3).with_quadrilateral([
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ]);

        {
            let store = open_store(&temp_dir);
            store.upsert("k_1", r.clone(), "k").unwrap();
        }

        let store = open_store(&temp_dir);
        assert_eq!(store.load_all("k_1").unwrap(), vec![r]);
    }

    #[test]
    fn test_fallback_lookup_by_size_token() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let mut events = store.subscribe();

        let r = record(0);
        store.upsert("Report.pdf_102400", r.clone(), "Report.pdf").unwrap();
        while events.try_recv().is_ok() {}

        let loaded = store.load_all("Report (copy).pdf_102400").unwrap();
        assert_eq!(loaded, vec![r]);
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::FallbackMatched { .. }
        ));
    }

    #[test]
    fn test_upsert_through_fallback_migrates_to_new_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = record(0);
        let b = record(1);
        store.upsert("Report.pdf_102400", a.clone(), "Report.pdf").unwrap();
        store
            .upsert("Report (copy).pdf_102400", b.clone(), "Report (copy).pdf")
            .unwrap();

        let migrated = store
            .load_collection("Report (copy).pdf_102400")
            .unwrap()
            .unwrap();
        assert_eq!(migrated.document_key, "Report (copy).pdf_102400");
        assert_eq!(migrated.annotations, vec![a.clone(), b]);

        // The original collection is untouched
        assert_eq!(store.load_all("Report.pdf_102400").unwrap(), vec![a]);
    }

    #[test]
    fn test_interrupted_write_keeps_previous_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let a = record(0);
        store.upsert("k_1", a.clone(), "k").unwrap();

        // Simulate a crash after the temp write but before the rename
        let target = temp_dir.path().join("k_1.json");
        let mut next = store.load_collection("k_1").unwrap().unwrap();
        next.upsert(record(1));
        let encoded = encode(&next).unwrap();
        fs::write(temp_path_for(&target), &encoded[..encoded.len() / 2]).unwrap();

        let reopened = open_store(&temp_dir);
        assert_eq!(reopened.load_all("k_1").unwrap(), vec![a.clone()]);
        assert_eq!(reopened.list_all_collections().unwrap().len(), 1);

        // The next successful write replaces the orphan
        let c = record(2);
        reopened.upsert("k_1", c.clone(), "k").unwrap();
        assert_eq!(reopened.load_all("k_1").unwrap(), vec![a, c]);
        assert!(!temp_path_for(&target).exists());
    }

    #[test]
    fn test_truncated_file_is_repaired() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let records: Vec<_> = (0..3).map(|p| record(p).with_text("some text")).collect();
        for r in &records {
            store.upsert("k_1", r.clone(), "k").unwrap();
        }

        let path = temp_dir.path().join("k_1.json");
        let bytes = fs::read(&path).unwrap();
        let cut = String::from_utf8_lossy(&bytes).rfind("some text").unwrap();
        fs::write(&path, &bytes[..cut]).unwrap();

        let mut events = store.subscribe();
        let loaded = store.load_all("k_1").unwrap();
        assert_eq!(loaded, records[..2].to_vec());
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::CorruptionRepaired { .. }
        ));
    }

    #[test]
    fn test_unrepairable_file_is_empty_and_kept() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        let path = temp_dir.path().join("k_1.json");
        fs::write(&path, b"{\"documentKey\": \"k_1\", \"annot").unwrap();

        let mut events = store.subscribe();
        assert!(store.load_all("k_1").unwrap().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::CorruptionDetected { .. }
        ));
        assert!(path.exists());

        // A later save overwrites the corrupted file
        let r = record(0);
        store.upsert("k_1", r.clone(), "k").unwrap();
        assert_eq!(store.load_all("k_1").unwrap(), vec![r]);
    }

    #[test]
    fn test_list_all_collections_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert("b_2", record(0), "b").unwrap();
        store.upsert("a_1", record(0), "a").unwrap();
        fs::write(temp_dir.path().join("broken_3.json"), b"garbage").unwrap();

        let keys: Vec<String> = store
            .list_all_collections()
            .unwrap()
            .into_iter()
            .map(|c| c.document_key)
            .collect();
        assert_eq!(keys, vec!["a_1".to_string(), "b_2".to_string()]);
    }

    #[test]
    fn test_clear_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert("a_1", record(0), "a").unwrap();
        store.upsert("b_2", record(0), "b").unwrap();
        fs::write(temp_dir.path().join("c_3.json.tmp"), b"partial").unwrap();

        assert_eq!(store.clear_all().unwrap(), 2);
        assert!(store.list_all_collections().unwrap().is_empty());
        assert!(!temp_dir.path().join("c_3.json.tmp").exists());
        assert!(store.load_all("a_1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_collection() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert("a_1", record(0), "a").unwrap();
        assert!(store.delete_collection("a_1").unwrap());
        assert!(!store.delete_collection("a_1").unwrap());
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        assert_eq!(store.stats().unwrap(), StoreStats::default());

        store.upsert("a_1", record(0), "a").unwrap();
        store.upsert("a_1", record(1), "a").unwrap();
        store.upsert("b_2", record(0), "b").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.annotations, 3);
        assert!(stats.bytes_on_disk > 0);
    }

    #[test]
    fn test_concurrent_upserts_same_key_lose_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..10 {
                        store.upsert("shared_1", record(t * 10 + i), "shared").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load_all("shared_1").unwrap();
        assert_eq!(loaded.len(), 80);

        // Each thread's records appear in its own submission order
        for t in 0..8 {
            let pages: Vec<u32> = loaded
                .iter()
                .map(|r| r.page_index)
                .filter(|p| p / 10 == t)
                .collect();
            assert_eq!(pages, (t * 10..t * 10 + 10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_concurrent_upserts_different_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir));

        let handles: Vec<_> = (0..6)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let key = format!("doc{}_{}", t, 1000 + t);
                    for i in 0..5 {
                        store.upsert(&key, record(i), "doc").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let collections = store.list_all_collections().unwrap();
        assert_eq!(collections.len(), 6);
        assert!(collections.iter().all(|c| c.len() == 5));
    }

    #[test]
    fn test_keys_sharing_a_file_share_a_lock() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir));
        assert_eq!(store.layout.path_for("a/b_1"), store.layout.path_for("a_b_1"));

        let handles: Vec<_> = ["a/b_1", "a_b_1"]
            .into_iter()
            .enumerate()
            .map(|(t, key)| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50 {
                        store.upsert(key, record(t as u32 * 100 + i), "ab").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load_all("a_b_1").unwrap().len(), 100);
        assert!(!temp_path_for(&store.layout.path_for("a_b_1")).exists());
    }

    #[test]
    fn test_unreadable_file_is_skipped_in_listings() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);
        store.upsert("a_1", record(0), "a").unwrap();

        // Reading a directory fails even with elevated permissions
        let unreadable = temp_dir.path().join("locked_2.json");
        fs::create_dir(&unreadable).unwrap();

        let mut events = store.subscribe();
        assert!(store.read_listed(&unreadable).is_none());
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::ReadFailed { .. }
        ));

        assert_eq!(store.list_all_collections().unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().collections, 1);
    }
}
