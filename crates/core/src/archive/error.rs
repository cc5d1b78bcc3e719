//! Error types for the archive module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole archive operation.
///
/// Problems with a single entry during extraction are not errors; they are
/// reported per entry via [`super::EntryKind::Unreadable`].
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive file could not be opened.
    #[error("Failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a readable zip archive.
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    /// Writing the result archive failed.
    #[error("Failed to write archive: {0}")]
    Write(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker panicked or was cancelled.
    #[error("Archive task failed: {0}")]
    Task(String),
}
