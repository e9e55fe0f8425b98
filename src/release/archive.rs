// src/release/archive.rs
// Single-entry extraction from .tar.gz and .zip archives (blocking)

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{GridError, Result};

/// Permission bits for extracted binaries
pub const BINARY_MODE: u32 = 0o754;

/// Suffix of a binary still being written
pub const EXTRACTING_SUFFIX: &str = ".extracting";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Extract the entry named `entry_name` from `archive` to `dest`.
///
/// The entry is written under a temporary name and renamed into place, so
/// `dest` either holds the complete binary or does not exist.
pub fn extract_entry(archive: &Path, entry_name: &str, dest: &Path) -> Result<PathBuf> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = ArchiveKind::from_path(archive)
        .ok_or_else(|| GridError::extraction(&file_name, "unsupported archive type"))?;

    let tmp = temp_path(dest);
    let result = match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, entry_name, &tmp),
        ArchiveKind::Zip => extract_zip(archive, entry_name, &tmp),
    };

    match result {
        Ok(true) => {}
        Ok(false) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(GridError::extraction(
                &file_name,
                format!("entry `{}` not found", entry_name),
            ));
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(GridError::extraction(&file_name, e));
        }
    }

    set_executable(&tmp)?;
    std::fs::rename(&tmp, dest)?;
    debug!(archive = %archive.display(), entry = entry_name, dest = %dest.display(), "Extracted binary");
    Ok(dest.to_path_buf())
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(EXTRACTING_SUFFIX);
    dest.with_file_name(name)
}

/// Returns Ok(false) if no entry matched
fn extract_tar_gz(archive: &Path, entry_name: &str, out: &Path) -> io::Result<bool> {
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    for entry in tar.entries()? {
        let mut entry = entry?;
        let matches = {
            let path = entry.path()?;
            let path = path.to_string_lossy();
            path.trim_start_matches("./") == entry_name
        };
        if matches {
            write_entry(&mut entry, out)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn extract_zip(archive: &Path, entry_name: &str, out: &Path) -> io::Result<bool> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
    let mut entry = match zip.by_name(entry_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(io::Error::other(e)),
    };
    write_entry(&mut entry, out)?;
    Ok(true)
}

fn write_entry(reader: &mut impl Read, out: &Path) -> io::Result<()> {
    let mut file = File::create(out)?;
    io::copy(reader, &mut file)?;
    file.flush()?;
    file.sync_all()
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(BINARY_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
