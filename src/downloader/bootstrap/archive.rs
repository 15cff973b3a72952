//! Pulling the tool binary out of a downloaded archive.
//!
//! Only the one member identified by the catalog is extracted; everything else
//! in the archive is ignored.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use super::catalog::{ArchiveFormat, ToolArchive};
use crate::downloader::errors::BootstrapError;

/// Extracts the tool member of `archive_path` into the file `dest`.
///
/// # Errors
///
/// `CorruptArchive` when the archive cannot be read or has no matching
/// member, `FilesystemFailure` when `dest` cannot be written.
pub fn extract_member(archive_path: &Path, archive: &ToolArchive, dest: &Path) -> Result<(), BootstrapError> {
    info!(
        "Extracting {:?} member '{}' from {} to {}",
        archive.format,
        archive.member_suffix,
        archive_path.display(),
        dest.display()
    );

    let file = File::open(archive_path)?;
    let found = match archive.format {
        ArchiveFormat::Zip => extract_from_zip(file, archive, dest)?,
        ArchiveFormat::TarXz => {
            let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
            extract_from_tar(decoder, archive, dest)?
        }
    };

    if !found {
        return Err(BootstrapError::corrupt(format!(
            "'{}' not found in archive",
            archive.member_suffix
        )));
    }

    make_executable(dest)?;
    Ok(())
}

fn extract_from_zip(file: File, archive: &ToolArchive, dest: &Path) -> Result<bool, BootstrapError> {
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| BootstrapError::corrupt(format!("Failed to read zip: {}", e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| BootstrapError::corrupt(format!("Bad zip entry {}: {}", i, e)))?;

        if entry.is_dir() || !archive.matches_member(entry.name()) {
            continue;
        }

        debug!("Found tool member {}", entry.name());
        copy_to(&mut entry, dest)?;
        return Ok(true);
    }

    Ok(false)
}

fn extract_from_tar<R: Read>(reader: R, archive: &ToolArchive, dest: &Path) -> Result<bool, BootstrapError> {
    let mut tar = tar::Archive::new(reader);
    let entries = tar
        .entries()
        .map_err(|e| BootstrapError::corrupt(format!("Failed to read tar: {}", e)))?;

    for entry_result in entries {
        let mut entry =
            entry_result.map_err(|e| BootstrapError::corrupt(format!("Bad tar entry: {}", e)))?;

        // Links could point anywhere; only regular files are taken
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = match entry.path() {
            Ok(path) => path.to_string_lossy().to_string(),
            Err(_) => continue,
        };
        if !archive.matches_member(&name) {
            continue;
        }

        debug!("Found tool member {}", name);
        copy_to(&mut entry, dest)?;
        return Ok(true);
    }

    Ok(false)
}

/// Copy a member to `dest`; a truncated member is reported as corrupt.
fn copy_to<R: Read>(reader: &mut R, dest: &Path) -> Result<(), BootstrapError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut outfile = File::create(dest)?;
    let written = io::copy(reader, &mut outfile).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            BootstrapError::corrupt(format!("Truncated archive member: {}", e))
        }
        _ => BootstrapError::from(e),
    })?;
    outfile.flush()?;

    if written == 0 {
        return Err(BootstrapError::corrupt("Tool member is empty"));
    }
    Ok(())
}

/// Sets executable permission on a file (Unix only).
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<(), BootstrapError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

/// Present, a regular file, non-empty and (on Unix) executable.
pub fn is_usable_tool(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return false;
        }
    }

    true
}
