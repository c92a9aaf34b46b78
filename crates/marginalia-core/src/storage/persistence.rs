//! Annotation file persistence
//!
//! One JSON file per document key inside a single storage directory.
//! Uses atomic writes (write to temp file, then rename) so readers never
//! observe a partially-written file.
//!
//! Files:
//! - `<key>.json` - encoded `DocumentAnnotations`
//! - `<key>.json.tmp` - in-flight write, renamed over the target on success

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};

/// Extension of collection files
pub const FILE_EXTENSION: &str = "json";

/// Extra suffix of in-flight temp files
pub const TEMP_SUFFIX: &str = "tmp";

/// File layout of the storage directory
#[derive(Debug, Clone)]
pub struct FileLayout {
    dir: PathBuf,
}

impl FileLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the storage directory if needed
    pub fn ensure_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::CreateDirectory {
            path: self.dir.clone(),
            source,
        })
    }

    /// Path of the collection file for a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem_for(key), FILE_EXTENSION))
    }

    /// Every collection file in the directory, sorted by file name
    ///
    /// Temp files and unrelated entries are skipped. A missing directory
    /// yields an empty list.
    pub fn list_collection_files(&self) -> StorageResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::reading(&self.dir, e)),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_collection_file(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Orphaned temp files left behind by interrupted writes
    pub fn list_temp_files(&self) -> StorageResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::reading(&self.dir, e)),
        };

        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(TEMP_SUFFIX))
            .collect())
    }
}

/// File stem used for a key
///
/// Keeps `[A-Za-z0-9_.-]`, space and parentheses; anything else (path
/// separators in particular) becomes `_`. The trailing `_<token>` of a key
/// always survives unchanged.
pub fn file_stem_for(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Key stored in a collection file name
pub fn stem_of(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

fn is_collection_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
}

/// Path of the temp file used while writing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Read a collection file
///
/// Returns `None` if the file does not exist.
pub fn read_file(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::reading(path, e)),
    }
}

/// Remove a file, treating a missing file as success
pub fn remove_file(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::writing(path, e)),
    }
}

/// Replace `path` with `data` in one step
///
/// The bytes go to `<path>.tmp` first, are synced, then renamed over `path`.
/// Until the rename the old contents stay readable; if it fails the temp
/// file is removed.
pub fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = temp_path_for(path);
    write_temp(&temp_path, data)?;

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::AtomicWriteFailed {
            from: temp_path,
            to: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

/// Write and sync the temp half of an atomic write
fn write_temp(temp_path: &Path, data: &[u8]) -> StorageResult<()> {
    let failed = |e: std::io::Error| StorageError::writing(temp_path, e);

    let mut file = File::create(temp_path).map_err(failed)?;
    file.write_all(data).map_err(failed)?;
    file.sync_all().map_err(failed)?;

    Ok(())
}
