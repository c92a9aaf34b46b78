//! Annotation file codec
//!
//! Collections are stored as pretty-printed JSON. Decoding is tolerant of a
//! truncated tail: when the bytes do not parse, one repair is attempted by
//! cutting back to the last complete annotation record (or the end of the
//! root object) and closing whatever is still open.

use thiserror::Error;

use crate::models::DocumentAnnotations;

/// Decoding failure for a stored collection
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed annotation data: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no complete annotation record to recover (original error: {0})")]
    Unrepairable(String),
}

/// Result of a tolerant decode
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Bytes decoded as-is
    Clean(DocumentAnnotations),
    /// Bytes decoded after truncation; `dropped_bytes` were discarded
    Repaired {
        collection: DocumentAnnotations,
        dropped_bytes: usize,
        original_error: String,
    },
    /// Bytes could not be decoded even after repair
    Corrupt(DecodeError),
}

/// Encode a collection for storage
pub fn encode(collection: &DocumentAnnotations) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(collection)
}

/// Decode a stored collection without any repair
pub fn decode(bytes: &[u8]) -> Result<DocumentAnnotations, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode a stored collection, attempting one bounded repair on failure
pub fn decode_with_repair(bytes: &[u8]) -> DecodeOutcome {
    let original_error = match decode(bytes) {
        Ok(collection) => return DecodeOutcome::Clean(collection),
        Err(e) => e.to_string(),
    };

    let Some(repaired) = truncate_to_last_complete(bytes) else {
        return DecodeOutcome::Corrupt(DecodeError::Unrepairable(original_error));
    };

    match decode(&repaired.bytes) {
        Ok(collection) => DecodeOutcome::Repaired {
            collection,
            dropped_bytes: bytes.len().saturating_sub(repaired.kept),
            original_error,
        },
        Err(e) => DecodeOutcome::Corrupt(e),
    }
}

struct Truncated {
    bytes: Vec<u8>,
    kept: usize,
}

/// Find the last structurally closing delimiter and close the open scopes
///
/// Prefers the end of the root object (drops trailing garbage). Otherwise
/// cuts after the last object that closed directly inside the root's
/// annotations array and appends `]}`.
fn truncate_to_last_complete(bytes: &[u8]) -> Option<Truncated> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut root_end = None;
    let mut record_end = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let expected = if b == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(expected) {
                    break;
                }
                if stack.is_empty() {
                    root_end = Some(i + 1);
                    break;
                }
                if b == b'}' && stack.as_slice() == b"{[" {
                    record_end = Some(i + 1);
                }
            }
            _ => {}
        }
    }

    if let Some(end) = root_end {
        return Some(Truncated {
            bytes: bytes[..end].to_vec(),
            kept: end,
        });
    }

    let end = record_end?;
    let mut repaired = bytes[..end].to_vec();
    repaired.extend_from_slice(b"]}");
    Some(Truncated {
        bytes: repaired,
        kept: end,
    })
}
