//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Validating backup sources and destinations
//! - Mirroring directories at the destination
//! - Copying files with metadata preservation

use std::fs;
use std::io;
use std::path::Path;

use crate::error::EngineError;

/// Check that `source` is an existing, non-empty directory.
///
/// # Errors
/// `SourceNotFound`, `SourceNotDirectory` or `SourceEmpty`.
pub fn validate_source(source: &Path) -> Result<(), EngineError> {
    match fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::SourceNotDirectory {
                path: source.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(EngineError::SourceNotFound {
                path: source.to_path_buf(),
            })
        }
    }

    let has_entries = fs::read_dir(source)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !has_entries {
        return Err(EngineError::SourceEmpty {
            path: source.to_path_buf(),
        });
    }
    Ok(())
}

/// Check that `destination` is an existing directory.
///
/// # Errors
/// `DestinationNotFound` or `DestinationNotDirectory`.
pub fn validate_destination(destination: &Path) -> Result<(), EngineError> {
    match fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DestinationNotDirectory {
            path: destination.to_path_buf(),
        }),
        Err(_) => Err(EngineError::DestinationNotFound {
            path: destination.to_path_buf(),
        }),
    }
}

/// Check that mirroring `source` into `destination` cannot feed on itself.
///
/// The mirror lands in `<destination>/<source name>`. A destination inside
/// the source would be walked again as it fills up, and a mirror resolving
/// to the source itself would overwrite the files being read. Both paths
/// must already exist.
///
/// # Errors
/// `OverlappingPaths`, or `SourceNotFound` / `DestinationNotFound` if a
/// path cannot be resolved.
pub fn validate_pair(source: &Path, destination: &Path) -> Result<(), EngineError> {
    let source_real = fs::canonicalize(source).map_err(|_| EngineError::SourceNotFound {
        path: source.to_path_buf(),
    })?;
    let destination_real =
        fs::canonicalize(destination).map_err(|_| EngineError::DestinationNotFound {
            path: destination.to_path_buf(),
        })?;

    let mirror_is_source = source_real
        .file_name()
        .map_or(false, |name| destination_real.join(name) == source_real);
    if destination_real.starts_with(&source_real) || mirror_is_source {
        return Err(EngineError::OverlappingPaths {
            source_path: source.to_path_buf(),
            destination_path: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// Create the mirrored directory, tolerating one that already exists.
pub fn mirror_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path),
        Err(e) => Err(e),
    }
}

/// Copy a file from source to destination with metadata preservation.
///
/// An existing destination file is replaced. Permissions and access and
/// modification times are carried over; failing to set them is not an error.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut src_file = fs::File::open(src)?;
    let src_metadata = src_file.metadata()?;

    // A read-only previous copy would refuse to be truncated.
    if let Ok(existing) = fs::symlink_metadata(dst) {
        if !existing.is_dir() {
            fs::remove_file(dst)?;
        }
    }

    let mut dst_file = fs::File::create(dst)?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file)?;
    drop(dst_file);

    let _ = fs::set_permissions(dst, src_metadata.permissions());
    let atime = filetime::FileTime::from_last_access_time(&src_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&src_metadata);
    let _ = filetime::set_file_times(dst, atime, mtime);

    Ok(bytes_copied)
}
