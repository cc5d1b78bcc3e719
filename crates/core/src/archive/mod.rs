//! Batch archive decoding and result archive encoding.
//!
//! Both directions are blocking zip I/O, so the async entry points move the
//! work onto the blocking thread pool.

mod codec;
mod error;

pub use codec::{build_archive, extract_archive, ArchiveFile, EntryKind, ExtractedEntry};
pub use error::ArchiveError;
