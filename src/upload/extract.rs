use super::error::ArchiveError;
use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

const ARCHIVE_EXTENSION: &str = ".zip";

/// A single unit of content ready for upload: name, bytes and declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl LeafFile {
    /// Wrap in-memory bytes, guessing the MIME type from the name.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name);
        Self { name, mime_type, data }
    }

    /// Read a file from disk. The leaf carries only the final path component.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_archive(&self) -> bool {
        self.name.to_lowercase().ends_with(ARCHIVE_EXTENSION)
    }
}

/// Leaves produced by expanding a whole selection, plus the archives that
/// could not be decoded.
#[derive(Debug, Default)]
pub struct Expansion {
    pub leaves: Vec<LeafFile>,
    pub failures: Vec<ArchiveError>,
}

/// Expand one selected file into its leaf files.
///
/// Non-archives come back unchanged as a single leaf. Archives yield one
/// leaf per non-directory entry, in container order, named by the entry's
/// archive-relative path.
pub fn expand(file: LeafFile) -> Result<Vec<LeafFile>, ArchiveError> {
    if !file.is_archive() {
        return Ok(vec![file]);
    }

    let archive_name = file.name.clone();
    let fail = |source| ArchiveError {
        archive: archive_name.clone(),
        source,
    };

    let mut archive = ZipArchive::new(Cursor::new(file.data)).map_err(fail)?;
    let mut leaves = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(fail)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // Declared sizes come from the archive and are not trusted for allocation.
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| fail(zip::result::ZipError::Io(e)))?;
        leaves.push(LeafFile::new(name, data));
    }

    debug!(archive = %archive_name, entries = leaves.len(), "Expanded archive");
    Ok(leaves)
}

/// Expand every selected file independently and concatenate the leaves.
/// A corrupt archive contributes nothing but does not stop the others.
pub fn expand_all(files: Vec<LeafFile>) -> Expansion {
    let mut out = Expansion::default();
    for file in files {
        match expand(file) {
            Ok(mut leaves) => out.leaves.append(&mut leaves),
            Err(e) => {
                warn!(archive = %e.archive, error = %e.source, "Skipping unreadable archive");
                out.failures.push(e);
            }
        }
    }
    out
}

/// Guess MIME type from filename extension.
pub fn guess_mime_type(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            match data {
                Some(bytes) => {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(bytes).unwrap();
                }
                None => zip.add_directory(*name, options).unwrap(),
            }
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn plain_file_passes_through() {
        let file = LeafFile::new("notes.txt", b"hello".to_vec());
        let out = expand(file.clone()).unwrap();
        assert_eq!(out, vec![file]);
        assert_eq!(out[0].mime_type, "text/plain");
    }

    #[test]
    fn archive_yields_leaf_entries_in_order() {
        let bytes = build_zip(&[
            ("docs/", None),
            ("docs/a.txt", Some(b"alpha")),
            ("img/", None),
            ("img/b.png", Some(b"\x89PNG")),
            ("c.csv", Some(b"x,y")),
        ]);
        let out = expand(LeafFile::new("Bundle.ZIP", bytes)).unwrap();

        let names: Vec<_> = out.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["docs/a.txt", "img/b.png", "c.csv"]);
        assert_eq!(out[0].data, b"alpha");
        assert_eq!(out[1].mime_type, "image/png");
    }

    #[test]
    fn corrupt_archive_reports_its_name() {
        let err = expand(LeafFile::new("broken.zip", b"not a zip".to_vec())).unwrap_err();
        assert_eq!(err.archive, "broken.zip");
        assert!(err.to_string().contains("broken.zip"));
    }

    #[test]
    fn expand_all_keeps_going_past_bad_archive() {
        let good = build_zip(&[("one.txt", Some(b"1")), ("two.txt", Some(b"2"))]);
        let out = expand_all(vec![
            LeafFile::new("first.md", b"# hi".to_vec()),
            LeafFile::new("bad.zip", vec![0, 1, 2]),
            LeafFile::new("good.zip", good),
        ]);

        let names: Vec<_> = out.leaves.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["first.md", "one.txt", "two.txt"]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].archive, "bad.zip");
    }

    /// Single stored zip64 entry whose headers declare `declared` bytes
    /// while only `data` is present.
    fn zip64_with_declared_size(name: &str, data: &[u8], crc: u32, declared: u64) -> Vec<u8> {
        let mut extra = Vec::new();
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&declared.to_le_bytes());
        extra.extend_from_slice(&declared.to_le_bytes());

        let mut out = Vec::new();
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        for field in [45u16, 0, 0, 0, 0x21] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        out.extend_from_slice(data);

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        for field in [45u16, 45, 0, 0, 0, 0x21] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        for field in [0u16, 0, 0] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        let cd_size = out.len() as u32 - cd_offset;

        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        for field in [0u16, 0, 1, 1] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn oversized_declared_entry_is_an_archive_error() {
        let evil = zip64_with_declared_size("a.txt", b"hello", 0x3610_a686, 1 << 61);
        let err = expand(LeafFile::new("evil.zip", evil.clone())).unwrap_err();
        assert_eq!(err.archive, "evil.zip");

        let out = expand_all(vec![
            LeafFile::new("evil.zip", evil),
            LeafFile::new("after.txt", b"ok".to_vec()),
        ]);
        let names: Vec<_> = out.leaves.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["after.txt"]);
        assert_eq!(out.failures.len(), 1);
    }

    #[test]
    fn guesses_common_types() {
        assert_eq!(guess_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("data.json"), "application/json");
        assert_eq!(guess_mime_type("noext"), "application/octet-stream");
    }
}
