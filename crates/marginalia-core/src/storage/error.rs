//! Storage errors
//!
//! Every fallible storage call returns [`StorageResult`]. I/O failures are
//! sorted into a few variants the viewer can act on (permissions, a full
//! disk, a missing file) through [`StorageError::reading`] and
//! [`StorageError::writing`].

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// No stable key can be derived for the document
    #[error("Cannot identify document {path:?}: {reason}")]
    IdentityUnresolvable { path: PathBuf, reason: String },

    #[error("Could not create annotations directory {path:?}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Access to {path:?} was denied")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left to write {path:?}")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not read {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not write {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temp file was written but could not replace the target
    #[error("Could not move {from:?} over {to:?}: {source}")]
    AtomicWriteFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored collection could not be decoded, even after repair
    #[error("Annotation file {path:?} is corrupted: {details}")]
    CorruptDocument { path: PathBuf, details: String },

    /// Record violates a model invariant and was not persisted
    #[error("Invalid annotation record: {0}")]
    InvalidRecord(String),

    #[error("Could not encode annotations: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{path:?} does not exist")]
    NotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Classify an I/O failure that happened while reading `path`
    pub fn reading(path: &Path, source: io::Error) -> Self {
        Self::classify(path, source).unwrap_or_else(|source| StorageError::ReadError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Classify an I/O failure that happened while writing `path`
    pub fn writing(path: &Path, source: io::Error) -> Self {
        Self::classify(path, source).unwrap_or_else(|source| StorageError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Variants shared by reads and writes; hands the error back otherwise
    fn classify(path: &Path, source: io::Error) -> Result<Self, io::Error> {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Ok(StorageError::NotFound { path }),
            io::ErrorKind::PermissionDenied => Ok(StorageError::PermissionDenied { path, source }),
            _ if is_out_of_space(&source) => Ok(StorageError::DiskFull { path, source }),
            _ => Err(source),
        }
    }

    /// Whether a later attempt may succeed without losing stored data
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::CorruptDocument { .. }
                | StorageError::AtomicWriteFailed { .. }
                | StorageError::WriteError { .. }
        )
    }

    /// A hint that can be shown to the user
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => {
                Some("Free some disk space; annotations made meanwhile are not saved.")
            }
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                Some("Make sure the annotations directory is writable.")
            }
            StorageError::CorruptDocument { .. } => {
                Some("The damaged file is replaced by the next saved annotation.")
            }
            StorageError::IdentityUnresolvable { .. } => {
                Some("Annotations on this document are kept for this session only.")
            }
            _ => None,
        }
    }
}

/// ENOSPC / EDQUOT on Unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on Windows
fn is_out_of_space(error: &io::Error) -> bool {
    #[cfg(unix)]
    const CODES: &[i32] = &[28, 122];
    #[cfg(windows)]
    const CODES: &[i32] = &[112, 39];
    #[cfg(not(any(unix, windows)))]
    const CODES: &[i32] = &[];

    if let Some(code) = error.raw_os_error() {
        return CODES.contains(&code);
    }
    error.to_string().to_lowercase().contains("no space left")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_recoverable() {
        let err = StorageError::writing(
            Path::new("/annotations/a.json"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err = StorageError::reading(
            Path::new("/annotations/missing.json"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );

        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_errors_keep_direction() {
        let path = Path::new("/annotations/a.json");

        let read = StorageError::reading(path, io::Error::new(io::ErrorKind::Other, "bad sector"));
        assert!(matches!(read, StorageError::ReadError { .. }));

        let write = StorageError::writing(path, io::Error::new(io::ErrorKind::Other, "bad sector"));
        assert!(matches!(write, StorageError::WriteError { .. }));
        assert!(write.to_string().contains("bad sector"));
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_is_disk_full() {
        let err = StorageError::writing(
            Path::new("/full/a.json"),
            io::Error::from_raw_os_error(28),
        );

        assert!(matches!(err, StorageError::DiskFull { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_out_of_space_message_without_os_code() {
        let err = StorageError::writing(
            Path::new("/full/a.json"),
            io::Error::new(io::ErrorKind::Other, "No space left on device"),
        );

        assert!(matches!(err, StorageError::DiskFull { .. }));
    }

    #[test]
    fn test_identity_unresolvable_display() {
        let err = StorageError::IdentityUnresolvable {
            path: PathBuf::from("/docs/missing.pdf"),
            reason: "no such file".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("/docs/missing.pdf"));
        assert!(msg.contains("no such file"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_corrupt_document_display() {
        let err = StorageError::CorruptDocument {
            path: PathBuf::from("/data/report_pdf_10.json"),
            details: "EOF while parsing".to_string(),
        };

        assert!(err.to_string().contains("corrupted"));
        assert!(err.to_string().contains("EOF while parsing"));
        assert!(err.is_recoverable());
    }
}
