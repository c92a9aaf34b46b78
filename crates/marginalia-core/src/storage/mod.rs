//! Storage layer
//!
//! Handles the on-disk side of annotation persistence.
//!
//! ## Architecture
//!
//! - **persistence**: file layout and atomic temp-file-then-rename writes
//! - **codec**: JSON encoding with bounded repair of truncated files
//! - **locks**: per-key mutexes serializing read-modify-write cycles
//! - **lookup**: size-token fallback when a key has no exact file

pub mod codec;
pub mod error;
pub mod locks;
pub mod lookup;
pub mod persistence;

pub use codec::{decode, decode_with_repair, encode, DecodeError, DecodeOutcome};
pub use error::{StorageError, StorageResult};
pub use locks::KeyLocks;
pub use lookup::find_storage_location_for;
pub use persistence::{atomic_write, FileLayout};
