//! Error types for cache, dataset and DAG file operations.

use std::path::PathBuf;

/// Errors surfaced to callers building light or full handles.
///
/// A DAG file that is missing, mis-sized or carries the wrong magic number is
/// not an error: it is reported through [`crate::io::Status`] and recovered
/// from by regenerating. Cancellation is likewise reported as
/// [`crate::Generated::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cache or dataset buffer could not be allocated.
    #[error("could not allocate {size} bytes for the {what}")]
    OutOfMemory {
        /// The buffer being allocated, e.g. `"cache"` or `"dataset"`.
        what: &'static str,
        /// Requested size in bytes.
        size: usize,
    },

    /// A filesystem operation on the DAG directory or file failed.
    #[error("DAG I/O error at {path}: {source}")]
    Io {
        /// The directory or file that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The sizing configuration cannot produce aligned cache/dataset sizes.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which constraint was violated.
        reason: String,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_display() {
        let err = Error::OutOfMemory {
            what: "dataset",
            size: 1073739904,
        };
        let msg = err.to_string();
        assert!(msg.contains("1073739904"));
        assert!(msg.contains("dataset"));
    }

    #[test]
    fn io_error_display() {
        let err = Error::io(
            "/tmp/.vapash/full-R23-0000000000000000",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("DAG I/O error"));
        assert!(msg.contains("full-R23-0000000000000000"));
        assert!(msg.contains("denied"));
    }
}
