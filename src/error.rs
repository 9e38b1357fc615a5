//! Error types for the Xyston library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`XystonError`] enum. Transactional failures (flush, merge) carry enough
//! context to identify the segments involved; read-side failures identify the
//! file that could not be decoded.

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Xyston operations.
#[derive(Error, Debug)]
pub enum XystonError {
    /// I/O errors (file operations, sync, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// On-disk bytes do not match the expected codec/format version.
    ///
    /// Fatal to the single read operation that hit it, not to the index.
    #[error("Format mismatch in '{file}': {detail}")]
    FormatMismatch {
        /// The file whose header or payload could not be decoded.
        file: String,
        /// What was wrong with it.
        detail: String,
    },

    /// A flush transaction failed; the buffer is left untouched.
    #[error("Flush failed: {0}")]
    FlushFailed(String),

    /// A merge execution failed; the input segments are left untouched.
    #[error("Merge of {inputs:?} into '{output}' failed: {detail}")]
    MergeFailed {
        /// Names of the input segments that were being merged.
        inputs: Vec<String>,
        /// Name of the output segment that was being produced.
        output: String,
        /// What went wrong.
        detail: String,
    },

    /// The summed document capacity of a composite view exceeds 2^31 - 1.
    #[error("Address space overflow: {total} document slots exceed the 2^31 - 1 limit")]
    AddressSpaceOverflow {
        /// The offending slot total.
        total: u64,
    },

    /// A commit descriptor references a segment file that does not exist.
    #[error("Commit generation {generation} is inconsistent: missing '{missing}'")]
    CommitInconsistent {
        /// Generation of the broken commit.
        generation: u64,
        /// First missing file discovered.
        missing: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with XystonError.
pub type Result<T> = std::result::Result<T, XystonError>;

impl XystonError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        XystonError::Storage(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        XystonError::Index(msg.into())
    }

    /// Create a new format mismatch error for the given file.
    pub fn format_mismatch<F: Into<String>, D: Into<String>>(file: F, detail: D) -> Self {
        XystonError::FormatMismatch {
            file: file.into(),
            detail: detail.into(),
        }
    }

    /// Create a new flush failure.
    pub fn flush_failed<S: Into<String>>(msg: S) -> Self {
        XystonError::FlushFailed(msg.into())
    }

    /// Create a new merge failure for the given input/output segments.
    pub fn merge_failed<D: Into<String>>(inputs: Vec<String>, output: &str, detail: D) -> Self {
        XystonError::MergeFailed {
            inputs,
            output: output.to_string(),
            detail: detail.into(),
        }
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        XystonError::OperationCancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        XystonError::Other(msg.into())
    }
}
