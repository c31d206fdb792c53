//! 7z container driver.
//!
//! Parses the signature header, the next header (pack info, folder
//! definitions, substreams, file metadata), and flattens the result into
//! the shared index model. Each folder becomes one decode run; folders
//! holding several substreams are the format's solid blocks.
//!
//! Encoded (compressed) next headers and multi-coder filter chains are
//! recognized but rejected as unsupported features.

use std::io::{Read, Seek, SeekFrom};

use crate::entry::{CompressionType, Entry};
use crate::options::OpenOptions;
use crate::sniff::FormatKind;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

use super::{ArchiveIndex, Capabilities, SolidRun, read_bytes, read_u8, read_u32_le, read_u64_le};

/// The 7z file signature: `'7' 'z' 0xBC 0xAF 0x27 0x1C`.
pub(crate) const SIGNATURE: &[u8; 6] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Size of the signature header: signature, version, start header CRC,
/// and the 20-byte next header locator.
pub(crate) const SIGNATURE_HEADER_SIZE: u64 = 32;

/// Highest archive version this driver reads.
const VERSION_MAJOR: u8 = 0;
const VERSION_MINOR: u8 = 4;

/// Parsing limits against hostile headers.
const MAX_ENTRIES: u64 = 1_000_000;
const MAX_CODERS_PER_FOLDER: u64 = 16;
const MAX_NAME_LENGTH: usize = 32768;
const MAX_HEADER_SIZE: u64 = 1 << 26;

/// Property IDs used in 7z headers.
mod property_id {
    pub const END: u8 = 0x00;
    pub const HEADER: u8 = 0x01;
    pub const MAIN_STREAMS_INFO: u8 = 0x04;
    pub const FILES_INFO: u8 = 0x05;
    pub const PACK_INFO: u8 = 0x06;
    pub const UNPACK_INFO: u8 = 0x07;
    pub const SUBSTREAMS_INFO: u8 = 0x08;
    pub const SIZE: u8 = 0x09;
    pub const CRC: u8 = 0x0A;
    pub const FOLDER: u8 = 0x0B;
    pub const CODERS_UNPACK_SIZE: u8 = 0x0C;
    pub const NUM_UNPACK_STREAM: u8 = 0x0D;
    pub const EMPTY_STREAM: u8 = 0x0E;
    pub const EMPTY_FILE: u8 = 0x0F;
    pub const NAME: u8 = 0x11;
    pub const MTIME: u8 = 0x14;
    pub const WIN_ATTRIBUTES: u8 = 0x15;
    pub const ENCODED_HEADER: u8 = 0x17;
}

/// Known coder method IDs (big-endian byte sequences as stored).
mod method_id {
    pub const COPY: &[u8] = &[0x00];
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    pub const LZMA2: &[u8] = &[0x21];
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
    pub const AES_256_SHA_256: &[u8] = &[0x06, 0xF1, 0x07, 0x01];
}

/// Reads the 7z variable-length integer encoding.
///
/// The first byte's high bits give the count of extra bytes:
/// `0xxxxxxx` is the value itself, `10xxxxxx` carries one extra byte,
/// and so on up to `11111111` followed by a full 8-byte value.
pub(crate) fn read_variable_u64<R: Read>(r: &mut R) -> std::io::Result<u64> {
    let first = {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf)?;
        buf[0] as u64
    };

    let mut mask = 0x80u64;
    let mut value = 0u64;

    for i in 0..8 {
        if (first & mask) == 0 {
            return Ok(value | ((first & (mask - 1)) << (8 * i)));
        }
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        value |= (byte[0] as u64) << (8 * i);
        mask >>= 1;
    }

    Ok(value)
}

/// Reads a bit vector of `count` bits, MSB first within each byte.
fn read_bool_vector<R: Read>(r: &mut R, count: usize) -> std::io::Result<Vec<bool>> {
    let bytes = read_bytes(r, count.div_ceil(8))?;
    Ok((0..count)
        .map(|i| (bytes[i / 8] >> (7 - i % 8)) & 1 != 0)
        .collect())
}

/// Reads an all-defined marker byte, then a bit vector if it was zero.
fn read_all_or_bits<R: Read>(r: &mut R, count: usize) -> std::io::Result<Vec<bool>> {
    if read_u8(r)? != 0 {
        Ok(vec![true; count])
    } else {
        read_bool_vector(r, count)
    }
}

/// Reads a UTF-16LE null-terminated string.
fn read_utf16le_string<R: Read>(r: &mut R) -> Result<String> {
    let mut chars = Vec::new();

    loop {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        let code_unit = u16::from_le_bytes(buf);

        if code_unit == 0 {
            break;
        }
        if chars.len() >= MAX_NAME_LENGTH {
            return Err(Error::InvalidFormat("file name too long".into()));
        }
        chars.push(code_unit);
    }

    String::from_utf16(&chars).map_err(|_| Error::InvalidFormat("invalid UTF-16 file name".into()))
}

/// The start header located right after the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StartHeader {
    next_header_offset: u64,
    next_header_size: u64,
    next_header_crc: u32,
}

impl StartHeader {
    /// Parses the signature and start header, verifying the locator CRC.
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut sig = [0u8; 6];
        r.read_exact(&mut sig)?;
        if sig != *SIGNATURE {
            return Err(Error::InvalidFormat("invalid 7z signature".into()));
        }

        let version_major = read_u8(r)?;
        let version_minor = read_u8(r)?;
        if version_major > VERSION_MAJOR
            || (version_major == VERSION_MAJOR && version_minor > VERSION_MINOR)
        {
            return Err(Error::UnsupportedFeature {
                feature: "unsupported 7z archive version",
            });
        }

        let start_header_crc = read_u32_le(r)?;

        let mut locator = [0u8; 20];
        r.read_exact(&mut locator)?;

        let calculated_crc = crc32fast::hash(&locator);
        if calculated_crc != start_header_crc {
            return Err(Error::corrupt_header(
                12,
                format!(
                    "start header CRC mismatch: expected {start_header_crc:#x}, got {calculated_crc:#x}"
                ),
            ));
        }

        Ok(Self {
            next_header_offset: u64::from_le_bytes(locator[0..8].try_into().unwrap()),
            next_header_size: u64::from_le_bytes(locator[8..16].try_into().unwrap()),
            next_header_crc: u32::from_le_bytes(locator[16..20].try_into().unwrap()),
        })
    }
}

/// Positions and sizes of the packed streams.
#[derive(Debug, Clone, Default)]
struct PackInfo {
    pack_pos: u64,
    pack_sizes: Vec<u64>,
}

impl PackInfo {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let pack_pos = read_variable_u64(r)?;
        let num_streams = read_variable_u64(r)?;

        if num_streams > MAX_ENTRIES {
            return Err(Error::InvalidFormat(format!(
                "too many pack streams: {num_streams}"
            )));
        }

        let num_streams = num_streams as usize;
        let mut pack_sizes = Vec::with_capacity(num_streams);

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::SIZE => {
                    for _ in 0..num_streams {
                        pack_sizes.push(read_variable_u64(r)?);
                    }
                }

                property_id::CRC => {
                    let defined = read_all_or_bits(r, num_streams)?;
                    for &has_crc in &defined {
                        if has_crc {
                            let _ = read_u32_le(r)?;
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property ID in pack info: {other:#x}"),
                    ));
                }
            }
        }

        if pack_sizes.len() != num_streams {
            return Err(Error::InvalidFormat("pack info missing sizes".into()));
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
        })
    }
}

/// One coder within a folder.
#[derive(Debug, Clone)]
struct Coder {
    method_id: Vec<u8>,
    num_out_streams: u64,
    properties: Vec<u8>,
}

/// A folder: the unit of decompression. One or more coders plus the
/// plumbing connecting their streams.
#[derive(Debug, Clone)]
struct Folder {
    coders: Vec<Coder>,
    num_packed_streams: usize,
    unpack_sizes: Vec<u64>,
    unpack_crc: Option<u32>,
}

impl Folder {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let num_coders = read_variable_u64(r)?;
        if num_coders == 0 || num_coders > MAX_CODERS_PER_FOLDER {
            return Err(Error::InvalidFormat(format!(
                "invalid coder count in folder: {num_coders}"
            )));
        }

        let mut coders = Vec::with_capacity(num_coders as usize);
        let mut total_in_streams = 0u64;
        let mut total_out_streams = 0u64;

        for _ in 0..num_coders {
            let flags = read_u8(r)?;
            let method_id_size = (flags & 0x0F) as usize;
            let is_complex = (flags & 0x10) != 0;
            let has_attributes = (flags & 0x20) != 0;

            let method_id = read_bytes(r, method_id_size)?;

            let (num_in_streams, num_out_streams) = if is_complex {
                (read_variable_u64(r)?, read_variable_u64(r)?)
            } else {
                (1, 1)
            };

            let properties = if has_attributes {
                let props_size = read_variable_u64(r)? as usize;
                if props_size > 1 << 20 {
                    return Err(Error::InvalidFormat("coder properties too large".into()));
                }
                read_bytes(r, props_size)?
            } else {
                Vec::new()
            };

            total_in_streams += num_in_streams;
            total_out_streams += num_out_streams;

            coders.push(Coder {
                method_id,
                num_out_streams,
                properties,
            });
        }

        // Bind pairs wire one coder's output to another's input. They are
        // parsed to keep the stream position correct even though chained
        // folders are rejected at index build time.
        let num_bind_pairs = total_out_streams.saturating_sub(1);
        for i in 0..num_bind_pairs {
            let in_index = read_variable_u64(r)?;
            let out_index = read_variable_u64(r)?;
            if in_index >= total_in_streams || out_index >= total_out_streams {
                return Err(Error::InvalidFormat(format!(
                    "bind pair {i} references a stream out of range"
                )));
            }
        }

        let num_packed = total_in_streams.saturating_sub(num_bind_pairs);
        if num_packed != 1 {
            // Explicit packed stream indices.
            for _ in 0..num_packed {
                let _ = read_variable_u64(r)?;
            }
        }

        Ok(Self {
            coders,
            num_packed_streams: num_packed as usize,
            unpack_sizes: Vec::new(),
            unpack_crc: None,
        })
    }

    fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Decoded size of the folder's final output stream.
    fn final_unpack_size(&self) -> Option<u64> {
        self.unpack_sizes.last().copied()
    }

    fn uses_encryption(&self) -> bool {
        self.coders
            .iter()
            .any(|c| c.method_id.as_slice() == method_id::AES_256_SHA_256)
    }
}

/// Folder definitions plus their decoded sizes.
#[derive(Debug, Clone, Default)]
struct UnpackInfo {
    folders: Vec<Folder>,
}

impl UnpackInfo {
    fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut folders = Vec::new();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::FOLDER => {
                    let num_folders = read_variable_u64(r)?;
                    if num_folders > MAX_ENTRIES {
                        return Err(Error::InvalidFormat(format!(
                            "too many folders: {num_folders}"
                        )));
                    }

                    if read_u8(r)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external folder definitions",
                        });
                    }

                    for _ in 0..num_folders {
                        folders.push(Folder::parse(r)?);
                    }
                }

                property_id::CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        let num_sizes = folder.total_out_streams() as usize;
                        folder.unpack_sizes = Vec::with_capacity(num_sizes);
                        for _ in 0..num_sizes {
                            folder.unpack_sizes.push(read_variable_u64(r)?);
                        }
                    }
                }

                property_id::CRC => {
                    let defined = read_all_or_bits(r, folders.len())?;
                    for (folder, &has_crc) in folders.iter_mut().zip(defined.iter()) {
                        if has_crc {
                            folder.unpack_crc = Some(read_u32_le(r)?);
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property ID in unpack info: {other:#x}"),
                    ));
                }
            }
        }

        Ok(Self { folders })
    }
}

/// Per-file stream layout within folders, for solid blocks.
#[derive(Debug, Clone, Default)]
struct SubStreamsInfo {
    num_streams_in_folders: Vec<u64>,
    unpack_sizes: Vec<u64>,
    digests: Vec<Option<u32>>,
}

impl SubStreamsInfo {
    /// Builds the default layout of one stream per folder.
    fn from_folders(folders: &[Folder]) -> Self {
        Self {
            num_streams_in_folders: vec![1; folders.len()],
            unpack_sizes: folders
                .iter()
                .filter_map(|f| f.final_unpack_size())
                .collect(),
            digests: folders.iter().map(|f| f.unpack_crc).collect(),
        }
    }

    fn parse<R: Read>(r: &mut R, folders: &[Folder]) -> Result<Self> {
        let mut num_streams_in_folders = vec![1u64; folders.len()];
        let mut unpack_sizes = Vec::new();
        let mut digests = Vec::new();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::NUM_UNPACK_STREAM => {
                    for streams in num_streams_in_folders.iter_mut() {
                        *streams = read_variable_u64(r)?;
                    }
                }

                property_id::SIZE => {
                    // The last substream size in each folder is implicit.
                    for (folder_idx, &num_streams) in num_streams_in_folders.iter().enumerate() {
                        if num_streams == 0 {
                            continue;
                        }

                        let folder_size = folders[folder_idx].final_unpack_size().unwrap_or(0);
                        let mut remaining = folder_size;

                        for _ in 0..num_streams - 1 {
                            let size = read_variable_u64(r)?;
                            unpack_sizes.push(size);
                            remaining = remaining.saturating_sub(size);
                        }
                        unpack_sizes.push(remaining);
                    }
                }

                property_id::CRC => {
                    // Folders carrying their own CRC with a single stream
                    // are skipped in the defined vector.
                    let mut streams_needing_crc = 0usize;
                    for (folder_idx, &num_streams) in num_streams_in_folders.iter().enumerate() {
                        if folders[folder_idx].unpack_crc.is_none() || num_streams != 1 {
                            streams_needing_crc += num_streams as usize;
                        }
                    }

                    let defined = read_all_or_bits(r, streams_needing_crc)?;
                    let mut defined_iter = defined.iter();

                    for (folder_idx, &num_streams) in num_streams_in_folders.iter().enumerate() {
                        let folder = &folders[folder_idx];

                        if folder.unpack_crc.is_some() && num_streams == 1 {
                            digests.push(folder.unpack_crc);
                        } else {
                            for _ in 0..num_streams {
                                match defined_iter.next() {
                                    Some(true) => digests.push(Some(read_u32_le(r)?)),
                                    _ => digests.push(None),
                                }
                            }
                        }
                    }
                }

                other => {
                    return Err(Error::corrupt_header(
                        0,
                        format!("unexpected property ID in substreams info: {other:#x}"),
                    ));
                }
            }
        }

        if unpack_sizes.is_empty() {
            for (folder_idx, &num_streams) in num_streams_in_folders.iter().enumerate() {
                if num_streams == 1 {
                    if let Some(size) = folders[folder_idx].final_unpack_size() {
                        unpack_sizes.push(size);
                    }
                }
            }
        }

        if digests.is_empty() {
            for (folder_idx, &num_streams) in num_streams_in_folders.iter().enumerate() {
                if num_streams == 1 {
                    digests.push(folders[folder_idx].unpack_crc);
                } else {
                    digests.extend(std::iter::repeat_n(None, num_streams as usize));
                }
            }
        }

        Ok(Self {
            num_streams_in_folders,
            unpack_sizes,
            digests,
        })
    }
}

/// Per-entry metadata from the files info section.
#[derive(Debug, Clone, Default)]
struct FileRecord {
    name: String,
    is_directory: bool,
    has_stream: bool,
    mtime: Option<u64>,
    attributes: Option<u32>,
}

fn parse_files_info<R: Read>(r: &mut R) -> Result<Vec<FileRecord>> {
    let num_files = read_variable_u64(r)?;
    if num_files > MAX_ENTRIES {
        return Err(Error::InvalidFormat(format!("too many files: {num_files}")));
    }

    let num_files = num_files as usize;
    let mut records: Vec<FileRecord> = (0..num_files).map(|_| FileRecord::default()).collect();

    let mut empty_streams = vec![false; num_files];
    let mut empty_files = Vec::new();

    loop {
        let prop_id = read_u8(r)?;
        if prop_id == property_id::END {
            break;
        }

        let prop_size = read_variable_u64(r)?;

        match prop_id {
            property_id::NAME => {
                if read_u8(r)? != 0 {
                    return Err(Error::UnsupportedFeature {
                        feature: "external file names",
                    });
                }
                for record in &mut records {
                    record.name = read_utf16le_string(r)?;
                }
            }

            property_id::EMPTY_STREAM => {
                empty_streams = read_bool_vector(r, num_files)?;
            }

            property_id::EMPTY_FILE => {
                let num_empty = empty_streams.iter().filter(|&&x| x).count();
                empty_files = read_bool_vector(r, num_empty)?;
            }

            property_id::MTIME => {
                let defined = read_all_or_bits(r, num_files)?;
                if read_u8(r)? != 0 {
                    return Err(Error::UnsupportedFeature {
                        feature: "external timestamps",
                    });
                }
                for (record, &has_time) in records.iter_mut().zip(defined.iter()) {
                    if has_time {
                        record.mtime = Some(read_u64_le(r)?);
                    }
                }
            }

            property_id::WIN_ATTRIBUTES => {
                let defined = read_all_or_bits(r, num_files)?;
                if read_u8(r)? != 0 {
                    return Err(Error::UnsupportedFeature {
                        feature: "external attributes",
                    });
                }
                for (record, &has_attr) in records.iter_mut().zip(defined.iter()) {
                    if has_attr {
                        record.attributes = Some(read_u32_le(r)?);
                    }
                }
            }

            _ => {
                // Unknown or irrelevant property, skip by its size.
                let _ = read_bytes(r, prop_size as usize)?;
            }
        }
    }

    // Entries without a stream are directories unless the empty-file
    // vector marks them as zero-byte files.
    let mut empty_idx = 0;
    for (i, &is_empty) in empty_streams.iter().enumerate() {
        if is_empty {
            records[i].has_stream = false;
            records[i].is_directory = !empty_files.get(empty_idx).copied().unwrap_or(false);
            empty_idx += 1;
        } else {
            records[i].has_stream = true;
        }
    }

    Ok(records)
}

/// The parsed next header.
#[derive(Debug, Clone, Default)]
struct ArchiveHeader {
    pack_info: Option<PackInfo>,
    unpack_info: Option<UnpackInfo>,
    substreams_info: Option<SubStreamsInfo>,
    files: Vec<FileRecord>,
}

fn parse_main_header<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let mut header = ArchiveHeader::default();

    loop {
        match read_u8(r)? {
            property_id::END => break,

            property_id::MAIN_STREAMS_INFO => {
                parse_streams_info(r, &mut header)?;
            }

            property_id::FILES_INFO => {
                header.files = parse_files_info(r)?;
            }

            other => {
                return Err(Error::corrupt_header(
                    0,
                    format!("unexpected property ID in header: {other:#x}"),
                ));
            }
        }
    }

    Ok(header)
}

fn parse_streams_info<R: Read>(r: &mut R, header: &mut ArchiveHeader) -> Result<()> {
    loop {
        match read_u8(r)? {
            property_id::END => break,

            property_id::PACK_INFO => {
                header.pack_info = Some(PackInfo::parse(r)?);
            }

            property_id::UNPACK_INFO => {
                header.unpack_info = Some(UnpackInfo::parse(r)?);
            }

            property_id::SUBSTREAMS_INFO => {
                let folders = header
                    .unpack_info
                    .as_ref()
                    .map_or(&[] as &[Folder], |u| &u.folders);
                header.substreams_info = Some(SubStreamsInfo::parse(r, folders)?);
            }

            other => {
                return Err(Error::corrupt_header(
                    0,
                    format!("unexpected property ID in streams info: {other:#x}"),
                ));
            }
        }
    }

    Ok(())
}

/// Maps a coder method ID to the entry model's compression type.
fn method_for(coder: &Coder) -> CompressionType {
    match coder.method_id.as_slice() {
        method_id::COPY => CompressionType::Store,
        method_id::LZMA => CompressionType::Lzma,
        method_id::LZMA2 => CompressionType::Lzma2,
        method_id::DEFLATE => CompressionType::Deflate,
        method_id::BZIP2 => CompressionType::BZip2,
        method_id::PPMD => CompressionType::Ppmd,
        bytes => {
            let mut id = 0u64;
            for &b in bytes.iter().take(8) {
                id = (id << 8) | u64::from(b);
            }
            CompressionType::Other(id)
        }
    }
}

/// Parses a 7z archive into the shared index.
pub(crate) fn read_index<R: Read + Seek>(
    reader: &mut R,
    _options: &OpenOptions,
) -> Result<ArchiveIndex> {
    let base = reader.stream_position()?;
    let start_header = StartHeader::parse(reader)?;

    let header = if start_header.next_header_size == 0 {
        ArchiveHeader::default()
    } else {
        // The header is read into memory whole; the size field comes
        // from the archive and must not dictate the allocation.
        if start_header.next_header_size > MAX_HEADER_SIZE {
            return Err(Error::corrupt_header(
                12,
                format!("next header size too large: {}", start_header.next_header_size),
            ));
        }
        let header_pos = base + SIGNATURE_HEADER_SIZE + start_header.next_header_offset;
        reader.seek(SeekFrom::Start(header_pos))?;

        let header_data = read_bytes(reader, start_header.next_header_size as usize)?;
        let actual_crc = crc32fast::hash(&header_data);
        if actual_crc != start_header.next_header_crc {
            return Err(Error::corrupt_header(
                header_pos,
                format!(
                    "next header CRC mismatch: expected {:#x}, got {actual_crc:#x}",
                    start_header.next_header_crc
                ),
            ));
        }

        match header_data.first() {
            Some(&property_id::HEADER) => {
                let mut cursor = std::io::Cursor::new(&header_data[1..]);
                parse_main_header(&mut cursor)?
            }
            Some(&property_id::ENCODED_HEADER) => {
                return Err(Error::UnsupportedFeature {
                    feature: "compressed 7z headers",
                });
            }
            Some(&other) => {
                return Err(Error::InvalidFormat(format!(
                    "expected header marker, got {other:#x}"
                )));
            }
            None => return Err(Error::InvalidFormat("empty header data".into())),
        }
    };

    build_index(base, header)
}

fn build_index(base: u64, header: ArchiveHeader) -> Result<ArchiveIndex> {
    let pack_info = header.pack_info.unwrap_or_default();
    let folders = header.unpack_info.unwrap_or_default().folders;
    let substreams = header
        .substreams_info
        .unwrap_or_else(|| SubStreamsInfo::from_folders(&folders));

    // Folder i's packed data follows folder i-1's in pack stream order.
    let data_start = base + SIGNATURE_HEADER_SIZE + pack_info.pack_pos;
    let mut runs = Vec::with_capacity(folders.len());
    let mut pack_stream_idx = 0usize;
    let mut pack_offset = data_start;

    for folder in &folders {
        if folder.coders.len() != 1 {
            return Err(Error::UnsupportedFeature {
                feature: "7z folders with coder chains",
            });
        }
        if folder.num_packed_streams != 1 {
            return Err(Error::UnsupportedFeature {
                feature: "7z folders with multiple packed streams",
            });
        }

        let pack_size = pack_info
            .pack_sizes
            .get(pack_stream_idx)
            .copied()
            .ok_or_else(|| Error::InvalidFormat("folder references missing pack stream".into()))?;

        let coder = &folder.coders[0];
        runs.push(SolidRun {
            pack_offset,
            pack_size,
            method: method_for(coder),
            properties: coder.properties.clone(),
            unpacked_size: folder.final_unpack_size().unwrap_or(0),
            members: Vec::new(),
        });

        pack_stream_idx += 1;
        pack_offset += pack_size;
    }

    // Walk files in archive order, handing each streamed file the next
    // substream slot across folders.
    let mut entries = Vec::with_capacity(header.files.len());
    let mut folder_idx = 0usize;
    let mut stream_in_folder = 0u64;
    let mut substream_idx = 0usize;
    let mut offset_in_run = 0u64;

    for (index, record) in header.files.into_iter().enumerate() {
        let mut entry = Entry::new(record.name.replace('\\', "/"), index);
        entry.is_directory = record.is_directory;
        entry.last_modified = record
            .mtime
            .map(|ft| Timestamp::from_filetime(ft).as_system_time());
        entry.attributes = record.attributes;

        if record.has_stream {
            // Skip folders with no substreams.
            while folder_idx < folders.len()
                && stream_in_folder
                    >= substreams
                        .num_streams_in_folders
                        .get(folder_idx)
                        .copied()
                        .unwrap_or(0)
            {
                folder_idx += 1;
                stream_in_folder = 0;
                offset_in_run = 0;
            }

            if folder_idx >= folders.len() {
                return Err(Error::InvalidFormat(
                    "file references missing data stream".into(),
                ));
            }

            let folder = &folders[folder_idx];
            let run = &mut runs[folder_idx];
            let size = substreams
                .unpack_sizes
                .get(substream_idx)
                .copied()
                .unwrap_or(0);
            let members_in_folder = substreams.num_streams_in_folders[folder_idx];

            entry.uncompressed_size = Some(size);
            entry.compressed_size = if stream_in_folder == 0 { run.pack_size } else { 0 };
            entry.compression = run.method;
            entry.crc32 = substreams.digests.get(substream_idx).copied().flatten();
            entry.is_encrypted = folder.uses_encryption();
            entry.run_id = Some(folder_idx);
            entry.run_position = Some(stream_in_folder as usize);
            entry.data_offset = Some(offset_in_run);
            if members_in_folder > 1 {
                entry.solid_group_id = Some(folder_idx as u32);
            }
            run.members.push(index);

            offset_in_run += size;
            stream_in_folder += 1;
            substream_idx += 1;
        }

        entries.push(entry);
    }

    let is_solid = runs.iter().any(|r| r.is_solid());
    Ok(ArchiveIndex {
        format: FormatKind::SevenZip,
        entries,
        runs,
        capabilities: Capabilities {
            random_access: true,
            concurrent_reads: !is_solid,
        },
    })
}

/// Writes the 7z variable-length integer encoding.
#[cfg(test)]
pub(crate) fn write_variable_u64(buf: &mut Vec<u8>, value: u64) {
    // One-byte form covers 0..=127.
    if value < 0x80 {
        buf.push(value as u8);
        return;
    }

    let bytes = value.to_le_bytes();

    // Find the shortest form whose first byte can hold the high bits.
    for extra in 1..8usize {
        let high_bits = 7 - extra;
        if value < 1u64 << (8 * extra + high_bits) {
            let first = !(0xFFu8 >> extra) | (value >> (8 * extra)) as u8;
            buf.push(first);
            buf.extend_from_slice(&bytes[..extra]);
            return;
        }
    }

    buf.push(0xFF);
    buf.extend_from_slice(&bytes);
}
