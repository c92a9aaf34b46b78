//! Marginalia Core Library
//!
//! This crate persists user annotations (highlights, underlines, strike-throughs
//! and notes) for a document viewer, so that markup made on a document comes
//! back the next time the same document is opened.
//!
//! # Architecture
//!
//! - **Identity**: a document is keyed by sanitized filename and byte size, or
//!   by page count and a content hash for in-memory documents
//! - **Storage**: one JSON file per document, written atomically and repaired
//!   when a crash left it truncated
//! - **Write queue**: saves return immediately; writes for a document are
//!   applied in order on background threads
//!
//! # Quick Start
//!
//! ```text
//! let service = AnnotationService::open(&Config::load()?)?;
//! let doc = DocumentRef::from_path("/docs/paper.pdf")?;
//!
//! let record = AnnotationRecord::new(
//!     AnnotationKind::Highlight,
//!     2,
//!     Rect::new(10.0, 20.0, 100.0, 15.0),
//!     Color::new(1.0, 1.0, 0.0, 0.5),
//! );
//! service.save_annotation(record, &doc, "paper.pdf");
//!
//! let restored = service.restore_annotations(&doc, page_count);
//! ```
//!
//! # Modules
//!
//! - `service`: Viewer-facing facade (main entry point)
//! - `store`: Keyed record store with per-key locking
//! - `queue`: Background write queue
//! - `identity`: Document key derivation
//! - `models`: Annotation records and per-document collections
//! - `storage`: File layout, atomic writes, JSON codec and repair
//! - `events`: Persistence notifications
//! - `config`: Application configuration
//! - `logging`: Optional file logging for hosts

pub mod config;
pub mod events;
pub mod identity;
pub mod logging;
pub mod models;
pub mod queue;
pub mod service;
pub mod storage;
pub mod store;

pub use config::Config;
pub use events::{EventBus, StoreEvent};
pub use identity::DocumentRef;
pub use logging::init_logging;
pub use models::{
    AnnotationKind, AnnotationRecord, Color, DocumentAnnotations, Point, Rect, SCHEMA_VERSION,
};
pub use queue::{WriteJob, WriteQueue};
pub use service::AnnotationService;
pub use storage::{StorageError, StorageResult};
pub use store::{RecordStore, StoreStats};
