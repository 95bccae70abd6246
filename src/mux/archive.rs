//! ZIP packaging of a session directory

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;

/// Archive every file below `dir` into `archive_path`, naming entries by
/// their path relative to `dir`.
///
/// The archive is written under a temporary name and renamed into place,
/// so a partially written package is never visible at `archive_path`.
pub fn archive_directory(dir: &Path, archive_path: &Path) -> Result<()> {
    let partial = archive_path.with_extension("zip.partial");

    let result = write_archive(dir, &partial);
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
        return result;
    }

    std::fs::rename(&partial, archive_path)?;
    Ok(())
}

fn write_archive(dir: &Path, target: &Path) -> Result<()> {
    let file = File::create(target)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(dir, entry.path())?;
        debug!("Adding {} to archive", name);
        zip.start_file(name, options)?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}

/// Archive entry names always use `/` separators
fn entry_name(root: &Path, path: &Path) -> io::Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
