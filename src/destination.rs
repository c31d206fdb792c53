//! Filesystem destination handling for extraction.
//!
//! Maps archive entry names onto paths under a destination root, creates
//! files and directories, and applies recorded metadata after content is
//! written. Entry names are untrusted input: absolute paths and `..`
//! components are rejected before anything touches the filesystem.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::entry::Entry;
use crate::options::ExtractionOptions;
use crate::{Error, READ_BUFFER_SIZE, Result};

/// Resolves the destination path for an entry under `root`.
///
/// Rejects names that would escape the root: absolute paths, drive or
/// root prefixes, and any `..` component. With `extract_full_path`
/// disabled only the final file name component is used.
pub(crate) fn target_path(entry: &Entry, root: &Path, options: &ExtractionOptions) -> Result<PathBuf> {
    let name = if options.extract_full_path {
        entry.name()
    } else {
        entry.file_name()
    };

    let relative = Path::new(name);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath {
                    path: entry.name().to_string(),
                });
            }
        }
    }

    Ok(root.join(relative))
}

/// Creates the directory for a directory entry.
pub(crate) fn create_directory(entry: &Entry, root: &Path, options: &ExtractionOptions) -> Result<PathBuf> {
    let path = target_path(entry, root, options)?;
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// An open output file awaiting content.
pub(crate) struct PreparedFile {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
}

/// Creates the output file for a file entry, along with its parent
/// directories.
///
/// An existing path fails with [`Error::Collision`] unless `overwrite`
/// is set. The existence check uses `symlink_metadata` so a dangling
/// symlink at the target still counts as a collision.
pub(crate) fn prepare_file(entry: &Entry, root: &Path, options: &ExtractionOptions) -> Result<PreparedFile> {
    let path = target_path(entry, root, options)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if !options.overwrite && fs::symlink_metadata(&path).is_ok() {
        return Err(Error::Collision { path });
    }

    let file = File::create(&path)?;
    Ok(PreparedFile { path, file })
}

/// Applies recorded metadata to an extracted file per the options.
///
/// Metadata application is best-effort: failures are logged, not
/// propagated, because the content itself was written successfully.
pub(crate) fn finalize(entry: &Entry, path: &Path, options: &ExtractionOptions) {
    if options.preserve_timestamp {
        if let Some(mtime) = entry.last_modified {
            let ft = filetime::FileTime::from_system_time(mtime);
            if let Err(e) = filetime::set_file_mtime(path, ft) {
                log::warn!(
                    "Failed to set modification time on '{}': {}",
                    path.display(),
                    e
                );
            }
        }
    }

    if options.preserve_attributes {
        if let Some(attrs) = entry.attributes {
            apply_attributes(path, attrs);
        }
    }
}

/// Applies attribute bits to an extracted file.
///
/// Unix mode bits live in the high half of the attribute word; a zero
/// mode means the archive recorded no Unix permissions.
#[cfg(unix)]
fn apply_attributes(path: &Path, attrs: u32) {
    use std::os::unix::fs::PermissionsExt;

    let mode = (attrs >> 16) & 0o7777;
    if mode != 0 {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            log::warn!("Failed to set permissions on '{}': {}", path.display(), e);
        }
    }
}

#[cfg(windows)]
fn apply_attributes(path: &Path, attrs: u32) {
    // DOS read-only flag in the low attribute bits.
    if attrs & 0x01 != 0 {
        if let Ok(metadata) = fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_readonly(true);
            if let Err(e) = fs::set_permissions(path, perms) {
                log::warn!(
                    "Failed to set read-only attribute on '{}': {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn apply_attributes(path: &Path, attrs: u32) {
    log::debug!(
        "Attribute preservation not supported on this platform for '{}' ({:#x})",
        path.display(),
        attrs
    );
}

/// Removes a partially written file after a failed extraction.
pub(crate) fn discard_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!(
            "Failed to clean up partial file '{}': {}",
            path.display(),
            e
        );
    }
}

/// Writes one entry's decoded content from `reader` to its destination
/// under `root` and returns the written path.
///
/// Directory entries are created without consuming the reader. File
/// entries are streamed to disk; on a read error the partial file is
/// removed before the error propagates.
pub fn write_entry<R: Read>(
    entry: &Entry,
    reader: &mut R,
    root: &Path,
    options: &ExtractionOptions,
) -> Result<PathBuf> {
    if entry.is_directory {
        return create_directory(entry, root, options);
    }

    let prepared = prepare_file(entry, root, options)?;
    let mut file = prepared.file;

    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                drop(file);
                discard_file(&prepared.path);
                return Err(Error::Io(e));
            }
        };
        file.write_all(&buf[..n])?;
    }
    file.flush()?;
    drop(file);

    finalize(entry, &prepared.path, options);
    Ok(prepared.path)
}

/// Writer that discards everything.
///
/// Unselected members of a solid run are still decoded to keep the
/// decoder positioned; their bytes go here.
pub(crate) struct Sink {
    bytes: u64,
}

impl Sink {
    pub(crate) fn new() -> Self {
        Self { bytes: 0 }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
