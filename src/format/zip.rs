//! ZIP container driver.
//!
//! Walks the central directory found through the end-of-central-directory
//! record, with ZIP64 fallbacks for archives that outgrow the 32-bit
//! fields. Every entry is directly addressable, so the index carries no
//! decode runs; payload offsets are resolved through each entry's local
//! file header, whose name and extra lengths may differ from the central
//! directory's.

use std::io::{Read, Seek, SeekFrom};

use crate::entry::{CompressionType, Entry};
use crate::sniff::FormatKind;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

use super::{ArchiveIndex, Capabilities, read_bytes, read_u16_le, read_u32_le, read_u64_le};

const EOCD_SIGNATURE: u32 = 0x06054B50; // PK\x05\x06
const EOCD64_SIGNATURE: u32 = 0x06064B50; // PK\x06\x06
const EOCD64_LOCATOR_SIGNATURE: u32 = 0x07064B50; // PK\x06\x07
const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014B50; // PK\x01\x02
const LOCAL_HEADER_SIGNATURE: u32 = 0x04034B50; // PK\x03\x04

const EOCD_SIZE: u64 = 22;
const EOCD64_LOCATOR_SIZE: u64 = 20;
const LOCAL_HEADER_SIZE: u64 = 30;

/// Longest possible EOCD record: fixed part plus a 65535-byte comment.
const MAX_EOCD_SEARCH: u64 = EOCD_SIZE + u16::MAX as u64;

/// General purpose flag bit 0: the entry is encrypted.
const FLAG_ENCRYPTED: u16 = 0x0001;

/// Compression method codes from the ZIP specification.
const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
const METHOD_BZIP2: u16 = 12;
const METHOD_LZMA: u16 = 14;

/// DOS directory attribute bit in the external attributes' low byte.
const DOS_ATTR_DIRECTORY: u32 = 0x10;

/// The end-of-central-directory record, normalized past ZIP64.
#[derive(Debug, Clone)]
struct EndOfCentralDirectory {
    num_entries: u64,
    central_dir_offset: u64,
}

/// Searches backward from the end of the stream for the EOCD record.
fn find_eocd<R: Read + Seek>(reader: &mut R) -> Result<(u64, EndOfCentralDirectory)> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_SIZE {
        return Err(Error::InvalidFormat("file too small for a ZIP archive".into()));
    }

    let search_len = MAX_EOCD_SEARCH.min(file_len);
    let search_start = file_len - search_len;
    reader.seek(SeekFrom::Start(search_start))?;
    let tail = read_bytes(reader, search_len as usize)?;

    // The record nearest the end wins; earlier matches can be payload
    // bytes that happen to contain the signature.
    let sig = EOCD_SIGNATURE.to_le_bytes();
    let mut candidate = tail.len().saturating_sub(EOCD_SIZE as usize);
    loop {
        if tail[candidate..candidate + 4] == sig {
            let eocd_pos = search_start + candidate as u64;
            let record = &tail[candidate..];

            let comment_len = u16::from_le_bytes([record[20], record[21]]) as u64;
            if eocd_pos + EOCD_SIZE + comment_len <= file_len {
                let num_entries = u16::from_le_bytes([record[10], record[11]]) as u64;
                let central_dir_offset =
                    u32::from_le_bytes([record[16], record[17], record[18], record[19]]) as u64;
                return Ok((
                    eocd_pos,
                    EndOfCentralDirectory {
                        num_entries,
                        central_dir_offset,
                    },
                ));
            }
        }
        if candidate == 0 {
            return Err(Error::InvalidFormat(
                "end of central directory record not found".into(),
            ));
        }
        candidate -= 1;
    }
}

/// Upgrades the EOCD through the ZIP64 locator when its 32-bit fields
/// are saturated.
fn resolve_zip64<R: Read + Seek>(
    reader: &mut R,
    eocd_pos: u64,
    eocd: EndOfCentralDirectory,
) -> Result<EndOfCentralDirectory> {
    let saturated =
        eocd.num_entries == u16::MAX as u64 || eocd.central_dir_offset == u32::MAX as u64;
    if !saturated || eocd_pos < EOCD64_LOCATOR_SIZE {
        return Ok(eocd);
    }

    reader.seek(SeekFrom::Start(eocd_pos - EOCD64_LOCATOR_SIZE))?;
    if read_u32_le(reader)? != EOCD64_LOCATOR_SIGNATURE {
        // No locator; the saturated values are the real ones.
        return Ok(eocd);
    }
    let _disk = read_u32_le(reader)?;
    let eocd64_offset = read_u64_le(reader)?;

    reader.seek(SeekFrom::Start(eocd64_offset))?;
    if read_u32_le(reader)? != EOCD64_SIGNATURE {
        return Err(Error::corrupt_header(
            eocd64_offset,
            "ZIP64 end of central directory signature mismatch",
        ));
    }
    let _record_size = read_u64_le(reader)?;
    let _version_made = read_u16_le(reader)?;
    let _version_needed = read_u16_le(reader)?;
    let _disk = read_u32_le(reader)?;
    let _cd_disk = read_u32_le(reader)?;
    let _entries_on_disk = read_u64_le(reader)?;
    let num_entries = read_u64_le(reader)?;
    let _cd_size = read_u64_le(reader)?;
    let central_dir_offset = read_u64_le(reader)?;

    Ok(EndOfCentralDirectory {
        num_entries,
        central_dir_offset,
    })
}

/// One central directory record before offset resolution.
#[derive(Debug, Clone)]
struct CentralRecord {
    name: String,
    flags: u16,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    external_attributes: u32,
    local_header_offset: u64,
}

fn read_central_record<R: Read + Seek>(reader: &mut R) -> Result<CentralRecord> {
    let pos = reader.stream_position()?;
    if read_u32_le(reader)? != CENTRAL_HEADER_SIGNATURE {
        return Err(Error::corrupt_header(
            pos,
            "central directory header signature mismatch",
        ));
    }

    let _version_made = read_u16_le(reader)?;
    let _version_needed = read_u16_le(reader)?;
    let flags = read_u16_le(reader)?;
    let method = read_u16_le(reader)?;
    let mod_time = read_u16_le(reader)?;
    let mod_date = read_u16_le(reader)?;
    let crc32 = read_u32_le(reader)?;
    let mut compressed_size = read_u32_le(reader)? as u64;
    let mut uncompressed_size = read_u32_le(reader)? as u64;
    let name_len = read_u16_le(reader)? as usize;
    let extra_len = read_u16_le(reader)? as usize;
    let comment_len = read_u16_le(reader)? as usize;
    let _disk_start = read_u16_le(reader)?;
    let _internal_attributes = read_u16_le(reader)?;
    let external_attributes = read_u32_le(reader)?;
    let mut local_header_offset = read_u32_le(reader)? as u64;

    let name_bytes = read_bytes(reader, name_len)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    let extra = read_bytes(reader, extra_len)?;
    apply_zip64_extra(
        &extra,
        &mut uncompressed_size,
        &mut compressed_size,
        &mut local_header_offset,
    );

    reader.seek(SeekFrom::Current(comment_len as i64))?;

    Ok(CentralRecord {
        name,
        flags,
        method,
        mod_time,
        mod_date,
        crc32,
        compressed_size,
        uncompressed_size,
        external_attributes,
        local_header_offset,
    })
}

/// Applies the ZIP64 extended information extra field (0x0001).
///
/// Only fields saturated in the fixed record are present, in the fixed
/// order: uncompressed size, compressed size, local header offset.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    local_header_offset: &mut u64,
) {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < size {
            return;
        }

        if id == 0x0001 {
            let mut field = &rest[..size];
            let mut take = |target: &mut u64| {
                if field.len() >= 8 {
                    *target = u64::from_le_bytes(field[..8].try_into().unwrap());
                    field = &field[8..];
                }
            };
            if *uncompressed_size == u32::MAX as u64 {
                take(uncompressed_size);
            }
            if *compressed_size == u32::MAX as u64 {
                take(compressed_size);
            }
            if *local_header_offset == u32::MAX as u64 {
                take(local_header_offset);
            }
            return;
        }

        rest = &rest[size..];
    }
}

/// Resolves the payload offset through the local file header.
///
/// The local header's own name and extra lengths decide where the data
/// starts; they are allowed to differ from the central directory copy.
fn resolve_data_offset<R: Read + Seek>(reader: &mut R, record: &CentralRecord) -> Result<u64> {
    reader.seek(SeekFrom::Start(record.local_header_offset))?;
    if read_u32_le(reader)? != LOCAL_HEADER_SIGNATURE {
        return Err(Error::corrupt_header(
            record.local_header_offset,
            format!("local file header signature mismatch for {:?}", record.name),
        ));
    }

    reader.seek(SeekFrom::Current(22))?; // to the name length field
    let name_len = read_u16_le(reader)? as u64;
    let extra_len = read_u16_le(reader)? as u64;

    Ok(record.local_header_offset + LOCAL_HEADER_SIZE + name_len + extra_len)
}

fn method_for(method: u16) -> CompressionType {
    match method {
        METHOD_STORE => CompressionType::Store,
        METHOD_DEFLATE => CompressionType::Deflate,
        METHOD_BZIP2 => CompressionType::BZip2,
        // ZIP-flavored LZMA prefixes the stream with its own header, which
        // the 7z decoder does not understand.
        METHOD_LZMA => CompressionType::Other(METHOD_LZMA as u64),
        other => CompressionType::Other(other as u64),
    }
}

/// Parses a ZIP archive into the shared index.
pub(crate) fn read_index<R: Read + Seek>(reader: &mut R) -> Result<ArchiveIndex> {
    let (eocd_pos, eocd) = find_eocd(reader)?;
    let eocd = resolve_zip64(reader, eocd_pos, eocd)?;

    let mut records = Vec::with_capacity(eocd.num_entries.min(1 << 16) as usize);
    reader.seek(SeekFrom::Start(eocd.central_dir_offset))?;
    for _ in 0..eocd.num_entries {
        records.push(read_central_record(reader)?);
    }

    let mut entries = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let is_directory = record.name.ends_with('/')
            || (record.external_attributes & DOS_ATTR_DIRECTORY != 0
                && record.uncompressed_size == 0);

        let mut entry = Entry::new(record.name.replace('\\', "/"), index);
        entry.is_directory = is_directory;
        entry.compressed_size = record.compressed_size;
        entry.uncompressed_size = Some(record.uncompressed_size);
        entry.compression = method_for(record.method);
        entry.is_encrypted = record.flags & FLAG_ENCRYPTED != 0;
        entry.attributes = Some(record.external_attributes);
        entry.last_modified = Timestamp::from_dos_datetime(record.mod_date, record.mod_time)
            .map(|t| t.as_system_time());

        if !is_directory {
            entry.crc32 = Some(record.crc32);
            entry.data_offset = Some(resolve_data_offset(reader, &record)?);
        }

        entries.push(entry);
    }

    Ok(ArchiveIndex {
        format: FormatKind::Zip,
        entries,
        runs: Vec::new(),
        capabilities: Capabilities {
            random_access: true,
            concurrent_reads: true,
        },
    })
}
