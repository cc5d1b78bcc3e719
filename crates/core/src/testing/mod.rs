//! Testing utilities and mock implementations.
//!
//! [`MockConverter`] stands in for the office converter so the whole batch
//! flow can run in tests without external binaries. [`fixtures`] builds
//! batch archives in memory.

mod mock_converter;

pub use mock_converter::{MockBehavior, MockConverter, RecordedConversion};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Build a zip archive in memory from `(name, contents)` pairs. Names
    /// ending in `/` become directory entries.
    pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if let Some(dir) = name.strip_suffix('/') {
                writer.add_directory(dir, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// A batch of `count` non-empty `.docx` entries named `doc_<n>.docx`.
    pub fn docx_batch(count: usize) -> Vec<u8> {
        let names: Vec<String> = (0..count).map(|i| format!("doc_{:04}.docx", i)).collect();
        let entries: Vec<(&str, &[u8])> = names
            .iter()
            .map(|n| (n.as_str(), b"fake docx".as_slice()))
            .collect();
        zip_bytes(&entries)
    }
}
