//! TAR container driver.
//!
//! Walks the 512-byte header blocks of a ustar archive, including the
//! GNU and PAX long-name extensions. Payloads are stored verbatim, so
//! every entry is directly addressable and the index carries no decode
//! runs.

use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::entry::{CompressionType, Entry};
use crate::sniff::FormatKind;
use crate::{Error, Result};

use super::{ArchiveIndex, Capabilities};

const BLOCK_SIZE: u64 = 512;

/// Extension records (long names, PAX key-value data) are read into
/// memory whole, so their declared size is bounded.
const MAX_EXTENSION_SIZE: u64 = 1 << 20;

/// Type flags from the ustar header.
const TYPE_REGULAR: u8 = b'0';
const TYPE_REGULAR_OLD: u8 = 0;
const TYPE_HARDLINK: u8 = b'1';
const TYPE_SYMLINK: u8 = b'2';
const TYPE_DIRECTORY: u8 = b'5';
const TYPE_GNU_LONGNAME: u8 = b'L';
const TYPE_PAX_EXTENDED: u8 = b'x';
const TYPE_PAX_GLOBAL: u8 = b'g';

/// A parsed 512-byte header block.
#[derive(Debug)]
struct TarHeader {
    name: String,
    mode: u32,
    size: u64,
    mtime: i64,
    typeflag: u8,
    prefix: String,
}

/// Reads a NUL-terminated ASCII field.
fn read_string_field(block: &[u8], offset: usize, len: usize) -> String {
    let field = &block[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Reads an octal numeric field, tolerating leading spaces and a
/// NUL or space terminator.
fn read_octal_field(block: &[u8], offset: usize, len: usize) -> Result<u64> {
    let field = &block[offset..offset + len];

    // GNU base-256 extension for sizes past the octal range.
    if field[0] & 0x80 != 0 {
        let mut value = (field[0] & 0x7F) as u64;
        for &b in &field[1..] {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(b as u64))
                .ok_or_else(|| Error::InvalidFormat("numeric field overflow".into()))?;
        }
        return Ok(value);
    }

    let mut value = 0u64;
    let mut seen_digit = false;
    for &b in field {
        match b {
            b'0'..=b'7' => {
                value = value
                    .checked_mul(8)
                    .and_then(|v| v.checked_add((b - b'0') as u64))
                    .ok_or_else(|| Error::InvalidFormat("numeric field overflow".into()))?;
                seen_digit = true;
            }
            b' ' if !seen_digit => continue,
            b' ' | 0 => break,
            _ => return Err(Error::InvalidFormat("invalid octal digit in header".into())),
        }
    }
    Ok(value)
}

/// Verifies the header checksum: the unsigned byte sum of the block with
/// the checksum field treated as spaces.
fn verify_checksum(block: &[u8; 512], offset: u64) -> Result<()> {
    let recorded = read_octal_field(block, 148, 8)?;

    let mut sum: u64 = 0;
    for (i, &b) in block.iter().enumerate() {
        sum += if (148..156).contains(&i) { 32 } else { b as u64 };
    }

    if sum != recorded {
        return Err(Error::corrupt_header(
            offset,
            format!("header checksum mismatch: expected {recorded}, got {sum}"),
        ));
    }
    Ok(())
}

fn parse_header(block: &[u8; 512], offset: u64) -> Result<TarHeader> {
    verify_checksum(block, offset)?;

    Ok(TarHeader {
        name: read_string_field(block, 0, 100),
        mode: read_octal_field(block, 100, 8)? as u32,
        size: read_octal_field(block, 124, 12)?,
        mtime: read_octal_field(block, 136, 12)? as i64,
        typeflag: block[156],
        prefix: read_string_field(block, 345, 155),
    })
}

/// Extracts `path=value` records from a PAX extended header payload.
///
/// Each record is `"<len> <key>=<value>\n"` with `len` counting the whole
/// record.
fn pax_path(data: &[u8]) -> Option<String> {
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let len: usize = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
        if len <= space + 1 || len > rest.len() {
            return None;
        }

        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(value) = record.strip_prefix(b"path=") {
            return Some(String::from_utf8_lossy(value).into_owned());
        }
        rest = &rest[len..];
    }
    None
}

/// Walks the block chain from the reader's current position.
///
/// The skip callback advances past payload and padding bytes, so seekable
/// sources jump while decoded streams read through. Entry offsets are
/// tracked arithmetically from `base`.
fn walk<R: Read>(
    reader: &mut R,
    base: u64,
    skip: &mut dyn FnMut(&mut R, u64) -> std::io::Result<()>,
) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut offset = base;

    // Name overrides set by extension headers for the next real entry.
    let mut pending_long_name: Option<String> = None;

    loop {
        let mut block = [0u8; 512];
        match reader.read_exact(&mut block) {
            Ok(()) => {}
            // A tail shorter than a full block ends the archive.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        // Two zero blocks mark the end; one is accepted too.
        if block.iter().all(|&b| b == 0) {
            break;
        }

        let header = parse_header(&block, offset)?;
        let data_offset = offset + BLOCK_SIZE;
        let padded_size = header.size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        if matches!(header.typeflag, TYPE_GNU_LONGNAME | TYPE_PAX_EXTENDED)
            && header.size > MAX_EXTENSION_SIZE
        {
            return Err(Error::corrupt_header(
                offset,
                format!("extension record too large: {} bytes", header.size),
            ));
        }

        match header.typeflag {
            TYPE_GNU_LONGNAME => {
                let mut name_data = vec![0u8; header.size as usize];
                reader.read_exact(&mut name_data)?;
                let end = name_data.iter().position(|&b| b == 0).unwrap_or(name_data.len());
                pending_long_name = Some(String::from_utf8_lossy(&name_data[..end]).into_owned());
                skip(reader, padded_size - header.size)?;
            }

            TYPE_PAX_EXTENDED => {
                let mut pax_data = vec![0u8; header.size as usize];
                reader.read_exact(&mut pax_data)?;
                if let Some(path) = pax_path(&pax_data) {
                    pending_long_name = Some(path);
                }
                skip(reader, padded_size - header.size)?;
            }

            TYPE_PAX_GLOBAL => {
                skip(reader, padded_size)?;
            }

            TYPE_REGULAR | TYPE_REGULAR_OLD | TYPE_DIRECTORY | TYPE_HARDLINK | TYPE_SYMLINK => {
                let name = pending_long_name.take().unwrap_or_else(|| {
                    if header.prefix.is_empty() {
                        header.name.clone()
                    } else {
                        format!("{}/{}", header.prefix, header.name)
                    }
                });

                let index = entries.len();
                let mut entry = Entry::new(name, index);
                entry.is_directory =
                    header.typeflag == TYPE_DIRECTORY || entry.name.ends_with('/');
                entry.compressed_size = header.size;
                entry.uncompressed_size = Some(header.size);
                entry.compression = CompressionType::Store;
                entry.attributes = Some((header.mode & 0o7777) << 16);
                entry.last_modified = unix_to_system_time(header.mtime);
                if !entry.is_directory {
                    entry.data_offset = Some(data_offset);
                }
                entries.push(entry);
                skip(reader, padded_size)?;
            }

            // Device nodes, FIFOs and unknown vendor types are skipped
            // but their payload still occupies blocks.
            _ => {
                skip(reader, padded_size)?;
            }
        }

        offset = data_offset + padded_size;
    }

    Ok(entries)
}

/// Parses a TAR archive into the shared index, seeking past payloads.
pub(crate) fn read_index<R: Read + Seek>(reader: &mut R) -> Result<ArchiveIndex> {
    let base = reader.stream_position()?;
    let entries = walk(reader, base, &mut |r, n| {
        r.seek(SeekFrom::Current(n as i64)).map(|_| ())
    })?;

    Ok(ArchiveIndex {
        format: FormatKind::Tar,
        entries,
        runs: Vec::new(),
        capabilities: Capabilities {
            random_access: true,
            concurrent_reads: true,
        },
    })
}

/// Walks a TAR stream without seeking, reading through payloads.
///
/// Used for the tar.gz/tar.bz2 composition, where the blocks come out of
/// a decoder and entry offsets are positions in the decoded stream.
pub(super) fn read_entries<R: Read>(reader: &mut R) -> Result<Vec<Entry>> {
    walk(reader, 0, &mut |r, n| {
        let copied = std::io::copy(&mut r.take(n), &mut std::io::sink())?;
        if copied < n {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "archive truncated inside a payload",
            ));
        }
        Ok(())
    })
}

fn unix_to_system_time(secs: i64) -> Option<SystemTime> {
    if secs >= 0 {
        Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    }
}
