//! Archive format detection.
//!
//! This module identifies the container format of a byte stream from its
//! leading signature bytes, with a file-extension fallback for sources
//! whose signature is ambiguous or absent (old tar files, renamed
//! downloads). The probe is bounded and always restores the stream
//! position, so a failed detection leaves the caller free to retry.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::{Error, Result};

/// Detected container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatKind {
    /// 7z archive.
    SevenZip,
    /// ZIP archive.
    Zip,
    /// RAR archive (v4).
    Rar,
    /// RAR5 archive (v5+). Recognized but not extractable.
    Rar5,
    /// gzip compressed stream (single member, possibly wrapping a tar).
    Gzip,
    /// bzip2 compressed stream (single member, possibly wrapping a tar).
    Bzip2,
    /// TAR archive.
    Tar,
}

impl FormatKind {
    /// Returns the typical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FormatKind::SevenZip => "7z",
            FormatKind::Zip => "zip",
            FormatKind::Rar | FormatKind::Rar5 => "rar",
            FormatKind::Gzip => "gz",
            FormatKind::Bzip2 => "bz2",
            FormatKind::Tar => "tar",
        }
    }

    /// Returns a human-readable name for this format.
    pub fn name(&self) -> &'static str {
        match self {
            FormatKind::SevenZip => "7-Zip",
            FormatKind::Zip => "ZIP",
            FormatKind::Rar => "RAR",
            FormatKind::Rar5 => "RAR5",
            FormatKind::Gzip => "gzip",
            FormatKind::Bzip2 => "bzip2",
            FormatKind::Tar => "TAR",
        }
    }

    /// Returns whether entries of this format can be decoded independently
    /// once the index is parsed.
    ///
    /// Streamed wrappers (gzip, bzip2) and solid containers decode
    /// front-to-back only.
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            FormatKind::SevenZip | FormatKind::Zip | FormatKind::Rar | FormatKind::Tar
        )
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Known signatures, tried in order. Longer signatures come before their
/// prefixes (RAR5 before RAR4).
const SIGNATURES: &[(&[u8], FormatKind)] = &[
    // 7z: '7' 'z' 0xBC 0xAF 0x27 0x1C
    (
        &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
        FormatKind::SevenZip,
    ),
    // ZIP: 'P' 'K' 0x03 0x04 (local file header)
    (&[0x50, 0x4B, 0x03, 0x04], FormatKind::Zip),
    // ZIP: 'P' 'K' 0x05 0x06 (empty archive, EOCD first)
    (&[0x50, 0x4B, 0x05, 0x06], FormatKind::Zip),
    // RAR5: 'R' 'a' 'r' '!' 0x1A 0x07 0x01 0x00
    (
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00],
        FormatKind::Rar5,
    ),
    // RAR: 'R' 'a' 'r' '!' 0x1A 0x07 0x00
    (
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00],
        FormatKind::Rar,
    ),
    // gzip: 0x1F 0x8B
    (&[0x1F, 0x8B], FormatKind::Gzip),
    // bzip2: 'B' 'Z' 'h'
    (&[0x42, 0x5A, 0x68], FormatKind::Bzip2),
];

/// TAR USTAR signature at offset 257.
const TAR_USTAR_SIGNATURE: &[u8] = b"ustar";

/// Detects the container format by examining magic bytes.
///
/// Reads at most a small probe window and restores the stream position
/// before returning, whether or not a format matched. Returns `None` when
/// no signature matches; I/O errors from the underlying stream propagate.
///
/// # Example
///
/// ```rust
/// use unarc::sniff::{detect, FormatKind};
/// use std::io::Cursor;
///
/// let mut data = Cursor::new(vec![0x50, 0x4B, 0x03, 0x04, 0, 0, 0, 0]);
/// assert_eq!(detect(&mut data).unwrap(), Some(FormatKind::Zip));
/// ```
pub fn detect<R: Read + Seek>(reader: &mut R) -> Result<Option<FormatKind>> {
    let start_pos = reader.stream_position().map_err(Error::Io)?;

    let mut header = [0u8; 16];
    let bytes_read = reader.read(&mut header).map_err(Error::Io)?;

    for (signature, format) in SIGNATURES {
        if bytes_read >= signature.len() && header.starts_with(signature) {
            reader.seek(SeekFrom::Start(start_pos)).map_err(Error::Io)?;
            return Ok(Some(*format));
        }
    }

    // TAR has no leading magic; USTAR archives carry "ustar" at offset 257.
    if bytes_read >= 16 {
        reader
            .seek(SeekFrom::Start(start_pos + 257))
            .map_err(Error::Io)?;
        let mut tar_header = [0u8; 5];
        if reader.read(&mut tar_header).map_err(Error::Io)? == 5
            && tar_header == *TAR_USTAR_SIGNATURE
        {
            reader.seek(SeekFrom::Start(start_pos)).map_err(Error::Io)?;
            return Ok(Some(FormatKind::Tar));
        }
    }

    reader.seek(SeekFrom::Start(start_pos)).map_err(Error::Io)?;
    Ok(None)
}

/// Detects the container format from a file extension alone.
///
/// ```rust
/// use unarc::sniff::{detect_from_extension, FormatKind};
///
/// assert_eq!(detect_from_extension("zip"), Some(FormatKind::Zip));
/// assert_eq!(detect_from_extension("TGZ"), Some(FormatKind::Gzip));
/// assert_eq!(detect_from_extension("dat"), None);
/// ```
pub fn detect_from_extension(extension: &str) -> Option<FormatKind> {
    match extension.to_lowercase().as_str() {
        "7z" => Some(FormatKind::SevenZip),
        "zip" | "jar" | "war" | "apk" | "ipa" => Some(FormatKind::Zip),
        "rar" => Some(FormatKind::Rar),
        "gz" | "gzip" | "tgz" => Some(FormatKind::Gzip),
        "bz2" | "bzip2" | "tbz2" => Some(FormatKind::Bzip2),
        "tar" => Some(FormatKind::Tar),
        _ => None,
    }
}

/// Detects the format with a file-name hint as fallback.
///
/// Signature detection wins when it matches; otherwise the extension of
/// `path` decides. Split-set numeric suffixes (`archive.zip.001`) are
/// stripped before the extension is examined, so the hint works on the
/// first part of a multi-volume set.
pub fn detect_with_hint<R: Read + Seek>(
    reader: &mut R,
    path: Option<&Path>,
) -> Result<Option<FormatKind>> {
    if let Some(format) = detect(reader)? {
        return Ok(Some(format));
    }

    let Some(path) = path else { return Ok(None) };

    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if let Some(base) = strip_volume_suffix(name) {
        name = base;
    }

    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return Ok(None),
    };
    Ok(detect_from_extension(ext))
}

/// Strips a trailing `.NNN` volume suffix, returning the base name.
///
/// `backup.zip.002` -> `backup.zip`. Returns `None` when the name has no
/// all-digit final component.
pub fn strip_volume_suffix(name: &str) -> Option<&str> {
    let (base, suffix) = name.rsplit_once('.')?;
    if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
        Some(base)
    } else {
        None
    }
}
