//! Zip bundling for transformations that produce more than one output.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::Result;

/// An output file and the name it should carry inside the archive.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub path: PathBuf,
    pub display_name: String,
}

impl BundleEntry {
    pub fn new(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
        }
    }
}

/// Writes one deflate-compressed archive containing each entry under its
/// display name, in the caller-supplied order. Directory listing order is
/// not deterministic, so callers sort the entries before calling.
pub fn bundle(entries: &[BundleEntry], dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default();
    for entry in entries {
        zip.start_file(entry.display_name.as_str(), options)
            .map_err(io::Error::other)?;
        let mut source = File::open(&entry.path)?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish().map_err(io::Error::other)?.flush()?;
    Ok(())
}

/// Entries for every file directly inside `dir`, sorted by name so the
/// archive layout is deterministic.
pub fn entries_from_dir(dir: &Path) -> Result<Vec<BundleEntry>> {
    let mut entries = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        if !item.file_type()?.is_file() {
            continue;
        }
        let name = item.file_name().to_string_lossy().into_owned();
        entries.push(BundleEntry::new(item.path(), name));
    }
    entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(entries)
}
