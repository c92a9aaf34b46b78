//! Document identity resolution
//!
//! Documents carry no stable embedded ID, so annotations are keyed by a
//! string derived from what is cheaply available:
//!
//! - **Path**: `<file name>_<size in bytes>`, with everything outside
//!   `[A-Za-z0-9_]` replaced by `_`. Stable across restarts as long as the
//!   file is not rewritten. A renamed copy keeps the trailing size token,
//!   which the lookup fallback uses to find its annotations.
//! - **Content**: `mem_<pages>p_<sha256 of a text prefix>`, for documents
//!   opened from memory. Identical content maps to the same key.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::storage::{StorageError, StorageResult};

/// Number of characters of extracted text hashed into a content key
pub const CONTENT_SAMPLE_CHARS: usize = 4096;

/// Separator between the name part of a key and its trailing token
pub const KEY_SEPARATOR: char = '_';

/// How the caller knows the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    /// A document backed by a file. When `size_bytes` is `None` the size is
    /// read from filesystem metadata at resolution time.
    Path {
        path: PathBuf,
        size_bytes: Option<u64>,
    },
    /// A document opened from in-memory bytes
    Content {
        page_count: u32,
        content_sample: String,
    },
}

impl DocumentRef {
    /// Reference a file with a known size
    pub fn path(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        DocumentRef::Path {
            path: path.into(),
            size_bytes: Some(size_bytes),
        }
    }

    /// Reference a file, reading its size from disk
    pub fn from_path(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let size = file_size(path)?;
        Ok(Self::path(path, size))
    }

    /// Reference an in-memory document
    pub fn content(page_count: u32, content_sample: impl Into<String>) -> Self {
        DocumentRef::Content {
            page_count,
            content_sample: content_sample.into(),
        }
    }

    /// Resolve this reference to a storage key
    pub fn resolve(&self) -> StorageResult<String> {
        resolve(self)
    }
}

/// Derive a repeatable storage key for a document
pub fn resolve(doc: &DocumentRef) -> StorageResult<String> {
    match doc {
        DocumentRef::Path { path, size_bytes } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| StorageError::IdentityUnresolvable {
                    path: path.clone(),
                    reason: "path has no file name".to_string(),
                })?;
            let size = match size_bytes {
                Some(size) => *size,
                None => file_size(path)?,
            };
            Ok(path_key(&name, size))
        }
        DocumentRef::Content {
            page_count,
            content_sample,
        } => Ok(content_key(*page_count, content_sample)),
    }
}

/// Build the key for a file name and byte size
pub fn path_key(file_name: &str, size_bytes: u64) -> String {
    format!(
        "{}{}{}",
        sanitize_key_part(file_name),
        KEY_SEPARATOR,
        size_bytes
    )
}

/// Build the key for an in-memory document
pub fn content_key(page_count: u32, content_sample: &str) -> String {
    let prefix: String = content_sample.chars().take(CONTENT_SAMPLE_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("mem_{}p_{}", page_count, digest)
}

/// Trailing token of a key: the text after the final separator
///
/// For path-derived keys this is the byte size.
pub fn trailing_token(key: &str) -> Option<&str> {
    key.rsplit_once(KEY_SEPARATOR)
        .map(|(_, token)| token)
        .filter(|token| !token.is_empty())
}

fn sanitize_key_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_size(path: &Path) -> StorageResult<u64> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|e| StorageError::IdentityUnresolvable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
