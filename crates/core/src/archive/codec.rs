//! Zip extraction and packaging.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ArchiveError;

/// What extraction found for one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file written to disk.
    File { size: u64 },
    Directory,
    /// The entry name escapes the destination (absolute path, `..`) or is a
    /// symlink. Nothing is written for it.
    Unsafe,
    /// The entry could not be decoded or written.
    Unreadable { reason: String },
}

/// One entry of an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Name as stored in the archive.
    pub name: String,
    /// Location on disk, when something was written.
    pub path: Option<PathBuf>,
    pub kind: EntryKind,
}

/// A file to be packaged into a result archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub source: PathBuf,
    /// Name inside the archive.
    pub name: String,
}

/// Extract every entry of `archive_path` under `dest_dir`.
///
/// Returns one [`ExtractedEntry`] per archive entry, in archive order. Only
/// failure to read the archive itself is an error.
pub async fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedEntry>, ArchiveError> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &dest_dir))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

/// Package `files` into a deflated zip at `dest`.
///
/// The archive is written next to `dest` and renamed into place, so `dest`
/// either holds a complete archive or does not exist.
pub async fn build_archive(files: Vec<ArchiveFile>, dest: &Path) -> Result<u64, ArchiveError> {
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || build_blocking(&files, &dest))
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

fn extract_blocking(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedEntry>, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::Open {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let fallback_name = archive
            .name_for_index(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("entry-{}", index));

        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(entry = %fallback_name, error = %e, "Skipping undecodable archive entry");
                entries.push(ExtractedEntry {
                    name: fallback_name,
                    path: None,
                    kind: EntryKind::Unreadable {
                        reason: e.to_string(),
                    },
                });
                continue;
            }
        };

        let name = entry.name().to_string();
        let target = match entry.enclosed_name() {
            Some(relative) if !entry.is_symlink() => dest_dir.join(relative),
            _ => {
                warn!(entry = %name, "Refusing to extract unsafe archive entry");
                entries.push(ExtractedEntry {
                    name,
                    path: None,
                    kind: EntryKind::Unsafe,
                });
                continue;
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            entries.push(ExtractedEntry {
                name,
                path: Some(target),
                kind: EntryKind::Directory,
            });
            continue;
        }

        let written = (|| -> io::Result<u64> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)
        })();

        match written {
            Ok(size) => {
                debug!(entry = %name, size, "Extracted archive entry");
                entries.push(ExtractedEntry {
                    name,
                    path: Some(target),
                    kind: EntryKind::File { size },
                });
            }
            Err(e) => {
                warn!(entry = %name, error = %e, "Failed to extract archive entry");
                let _ = fs::remove_file(&target);
                entries.push(ExtractedEntry {
                    name,
                    path: None,
                    kind: EntryKind::Unreadable {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }

    Ok(entries)
}

fn build_blocking(files: &[ArchiveFile], dest: &Path) -> Result<u64, ArchiveError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = dest.with_extension("zip.part");
    let result = write_zip(files, &partial).and_then(|count| {
        fs::rename(&partial, dest)?;
        Ok(count)
    });

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_zip(files: &[ArchiveFile], path: &Path) -> Result<u64, ArchiveError> {
    let out = File::create(path)?;
    let mut writer = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for file in files {
        writer
            .start_file(file.name.as_str(), options)
            .map_err(|e| ArchiveError::Write(e.to_string()))?;
        let mut source = File::open(&file.source)?;
        io::copy(&mut source, &mut writer)?;
        count += 1;
    }

    let mut out = writer
        .finish()
        .map_err(|e| ArchiveError::Write(e.to_string()))?;
    io::Write::flush(&mut out)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn write_zip_fixture(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("batch.zip");
        write_zip_fixture(
            &archive,
            &[
                ("a.docx", b"aaa"),
                ("nested/", b""),
                ("nested/b.docx", b"bb"),
                ("empty.docx", b""),
            ],
        );

        let input = dir.path().join("input");
        let entries = extract_archive(&archive, &input).await.unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].name, "a.docx");
        assert_eq!(entries[0].kind, EntryKind::File { size: 3 });
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[2].kind, EntryKind::File { size: 2 });
        assert_eq!(entries[3].kind, EntryKind::File { size: 0 });
        assert_eq!(
            fs::read(input.join("nested").join("b.docx")).unwrap(),
            b"bb"
        );
    }

    #[tokio::test]
    async fn test_extract_refuses_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip_fixture(&archive, &[("../escape.docx", b"x"), ("ok.docx", b"y")]);

        let input = dir.path().join("input");
        let entries = extract_archive(&archive, &input).await.unwrap();

        assert_eq!(entries[0].kind, EntryKind::Unsafe);
        assert!(entries[0].path.is_none());
        assert!(!dir.path().join("escape.docx").exists());
        assert_eq!(entries[1].kind, EntryKind::File { size: 1 });
    }

    #[tokio::test]
    async fn test_extract_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("not-a.zip");
        fs::write(&archive, b"this is not a zip file").unwrap();

        let result = extract_archive(&archive, &dir.path().join("input")).await;
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_extract_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract_archive(&dir.path().join("missing.zip"), dir.path()).await;
        assert!(matches!(result, Err(ArchiveError::Open { .. })));
    }

    #[tokio::test]
    async fn test_build_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        fs::write(&a, b"%PDF-a").unwrap();
        fs::write(&b, b"%PDF-b").unwrap();

        let dest = dir.path().join("out").join("result.zip");
        let count = build_archive(
            vec![
                ArchiveFile {
                    source: a,
                    name: "a.pdf".to_string(),
                },
                ArchiveFile {
                    source: b,
                    name: "reports/b.pdf".to_string(),
                },
            ],
            &dest,
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        assert!(!dest.with_extension("zip.part").exists());

        let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("reports/b.pdf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "%PDF-b");
    }

    #[tokio::test]
    async fn test_build_archive_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("result.zip");

        let result = build_archive(
            vec![ArchiveFile {
                source: dir.path().join("gone.pdf"),
                name: "gone.pdf".to_string(),
            }],
            &dest,
        )
        .await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("zip.part").exists());
    }
}
