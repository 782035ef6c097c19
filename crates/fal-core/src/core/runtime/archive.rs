//! In-memory zip archives of a scripts directory.
//!
//! Entry names are relative to the packed root. Unpacking refuses to touch a
//! destination that already exists and is not atomic: a failure part way
//! through leaves whatever was written so far.

use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::core::tooling::errors::DestinationExistsError;

/// Packs every file and directory below `root` into a deflated zip archive.
///
/// # Errors
/// Returns an error when `root` or any entry beneath it cannot be read.
pub fn pack(root: &Path) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0_usize;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = archive_name(relative);
        // Symlinked directories become plain directory entries; the walk does
        // not descend into them.
        let is_dir = entry.file_type().is_dir() || (entry.path_is_symlink() && path.is_dir());
        if is_dir {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut file =
                File::open(path).with_context(|| format!("failed to read {}", path.display()))?;
            io::copy(&mut file, &mut zip)
                .with_context(|| format!("failed to archive {}", path.display()))?;
        }
        entries += 1;
    }
    let bytes = zip.finish()?.into_inner();
    debug!(root = %root.display(), entries, bytes = bytes.len(), "packed scripts archive");
    Ok(bytes)
}

/// Extracts `bytes` into `dest`, creating it and its parents.
///
/// # Errors
/// Fails with [`DestinationExistsError`] when `dest` already exists, and with
/// an I/O error when the archive is corrupt or a file cannot be written.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<()> {
    if dest.exists() {
        return Err(DestinationExistsError {
            path: dest.to_path_buf(),
        }
        .into());
    }
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("invalid scripts archive")?;
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name().map(|p| dest.join(p)) else {
            continue;
        };
        if entry.name().ends_with('/') || entry.is_dir() {
            fs::create_dir_all(&enclosed)?;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&enclosed)
            .with_context(|| format!("failed to write {}", enclosed.display()))?;
        io::copy(&mut entry, &mut outfile)?;
        outfile.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&enclosed, fs::Permissions::from_mode(mode))?;
            }
        }
    }
    debug!(dest = %dest.display(), entries = archive.len(), "unpacked scripts archive");
    Ok(())
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
