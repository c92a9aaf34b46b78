//! Lookup fallback for drifting identities
//!
//! When no file exists for a key, the storage directory is scanned for a
//! collection whose trailing size token matches the queried key's. This
//! re-associates annotations with a renamed copy of the same file. Two
//! different documents with the same byte size match each other too; that
//! approximation is accepted.

use std::path::PathBuf;

use tracing::{debug, warn};

use super::persistence::{stem_of, FileLayout};
use crate::identity::trailing_token;

/// Find the file holding annotations for `key`
///
/// Checks the exact file first, then falls back to the first stored
/// collection (in file-name order) with the same numeric trailing token.
/// Directory errors are treated as a miss.
pub fn find_storage_location_for(layout: &FileLayout, key: &str) -> Option<PathBuf> {
    let exact = layout.path_for(key);
    if exact.is_file() {
        return Some(exact);
    }

    let token = numeric_token(key)?;

    let files = match layout.list_collection_files() {
        Ok(files) => files,
        Err(e) => {
            warn!("Lookup fallback could not list {:?}: {}", layout.dir(), e);
            return None;
        }
    };

    let found = files
        .into_iter()
        .find(|path| stem_of(path).and_then(numeric_token) == Some(token));

    if let Some(path) = &found {
        debug!("Key {:?} matched {:?} by size token {}", key, path, token);
    }
    found
}

fn numeric_token(key: &str) -> Option<&str> {
    trailing_token(key).filter(|token| token.bytes().all(|b| b.is_ascii_digit()))
}
