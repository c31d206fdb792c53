//! RAR container driver.
//!
//! Walks the RAR4 block chain: marker, main header, then file headers
//! until the end-of-archive block. Entries are enumerable regardless of
//! method; stored payloads are directly extractable while RAR-compressed
//! payloads surface the proprietary method and fail at decode time.
//!
//! RAR5 archives are detected by the sniffer but not parsed.

use std::io::{Read, Seek, SeekFrom};

use crate::entry::{CompressionType, Entry};
use crate::sniff::FormatKind;
use crate::timestamp::Timestamp;
use crate::{Error, Result};

use super::{ArchiveIndex, Capabilities, read_u8, read_u16_le};

/// RAR4 marker block: `Rar!` 0x1A 0x07 0x00.
const MARKER: &[u8; 7] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

/// Block types.
const BLOCK_MAIN: u8 = 0x73;
const BLOCK_FILE: u8 = 0x74;
const BLOCK_END: u8 = 0x7B;

/// Main header flag: the archive is solid.
const MHD_SOLID: u16 = 0x0008;
/// Main header flag: the archive headers are encrypted.
const MHD_PASSWORD: u16 = 0x0080;

/// File header flags.
const LHD_PASSWORD: u16 = 0x0004;
const LHD_LARGE: u16 = 0x0100;
const LHD_UNICODE: u16 = 0x0200;
/// All dictionary bits set marks a directory.
const LHD_WINDOW_MASK: u16 = 0x00E0;

/// Store method byte; 0x31..=0x35 are the compressed levels.
const METHOD_STORE: u8 = 0x30;

/// The common 7-byte block prelude.
#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    crc: u16,
    block_type: u8,
    flags: u16,
    size: u16,
}

impl BlockHeader {
    fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            crc: read_u16_le(r)?,
            block_type: read_u8(r)?,
            flags: read_u16_le(r)?,
            size: read_u16_le(r)?,
        })
    }
}

/// Verifies a block CRC: CRC-32 of the header bytes past the CRC field,
/// truncated to 16 bits.
fn verify_block_crc(header_bytes: &[u8], recorded: u16, offset: u64) -> Result<()> {
    let actual = (crc32fast::hash(&header_bytes[2..]) & 0xFFFF) as u16;
    if actual != recorded {
        return Err(Error::corrupt_header(
            offset,
            format!("block CRC mismatch: expected {recorded:#06x}, got {actual:#06x}"),
        ));
    }
    Ok(())
}

/// Parses a RAR archive into the shared index.
pub(crate) fn read_index<R: Read + Seek>(reader: &mut R, format: FormatKind) -> Result<ArchiveIndex> {
    if format == FormatKind::Rar5 {
        return Err(Error::UnsupportedFeature {
            feature: "RAR5 archives",
        });
    }

    let base = reader.stream_position()?;
    let mut marker = [0u8; 7];
    reader.read_exact(&mut marker)?;
    if marker != *MARKER {
        return Err(Error::InvalidFormat("invalid RAR marker block".into()));
    }

    let mut solid = false;
    let mut entries = Vec::new();
    let mut offset = base + 7;

    loop {
        reader.seek(SeekFrom::Start(offset))?;

        let prelude = match BlockHeader::read(reader) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        if (prelude.size as u64) < 7 {
            return Err(Error::corrupt_header(offset, "block size below minimum"));
        }

        // Re-read the whole header for the CRC check.
        reader.seek(SeekFrom::Start(offset))?;
        let mut header_bytes = vec![0u8; prelude.size as usize];
        reader.read_exact(&mut header_bytes)?;

        let mut data_size = 0u64;

        match prelude.block_type {
            BLOCK_MAIN => {
                verify_block_crc(&header_bytes, prelude.crc, offset)?;
                if prelude.flags & MHD_PASSWORD != 0 {
                    return Err(Error::PasswordRequired);
                }
                solid = prelude.flags & MHD_SOLID != 0;
            }

            BLOCK_FILE => {
                let (entry, pack_size) =
                    parse_file_header(&header_bytes, prelude, offset, solid, entries.len())?;
                data_size = pack_size;
                entries.push(entry);
            }

            BLOCK_END => break,

            // Comment, auth and other service blocks carry their data
            // size in an additional field when flagged; skip them by
            // header size plus that field.
            _ => {
                if prelude.flags & 0x8000 != 0 {
                    if header_bytes.len() < 11 {
                        return Err(Error::corrupt_header(offset, "service block too short"));
                    }
                    data_size =
                        u32::from_le_bytes(header_bytes[7..11].try_into().unwrap()) as u64;
                }
            }
        }

        offset += prelude.size as u64 + data_size;
    }

    Ok(ArchiveIndex {
        format: FormatKind::Rar,
        entries,
        runs: Vec::new(),
        capabilities: Capabilities {
            random_access: true,
            concurrent_reads: !solid,
        },
    })
}

/// Parses a file block header into an entry plus its packed data size.
fn parse_file_header(
    header: &[u8],
    prelude: BlockHeader,
    offset: u64,
    solid: bool,
    index: usize,
) -> Result<(Entry, u64)> {
    verify_block_crc(header, prelude.crc, offset)?;

    // Common prelude (7) plus the fixed file fields (25).
    if header.len() < 32 {
        return Err(Error::corrupt_header(offset, "file header too short"));
    }

    let field = |range: std::ops::Range<usize>| -> &[u8] { &header[range] };
    let mut pack_size = u32::from_le_bytes(field(7..11).try_into().unwrap()) as u64;
    let mut unp_size = u32::from_le_bytes(field(11..15).try_into().unwrap()) as u64;
    let _host_os = header[15];
    let file_crc = u32::from_le_bytes(field(16..20).try_into().unwrap());
    let ftime = u32::from_le_bytes(field(20..24).try_into().unwrap());
    let _unp_ver = header[24];
    let method = header[25];
    let name_size = u16::from_le_bytes(field(26..28).try_into().unwrap()) as usize;
    let attributes = u32::from_le_bytes(field(28..32).try_into().unwrap());

    let mut pos = 32;
    if prelude.flags & LHD_LARGE != 0 {
        if header.len() < pos + 8 {
            return Err(Error::corrupt_header(offset, "file header too short"));
        }
        let high_pack = u32::from_le_bytes(field(pos..pos + 4).try_into().unwrap()) as u64;
        let high_unp = u32::from_le_bytes(field(pos + 4..pos + 8).try_into().unwrap()) as u64;
        pack_size |= high_pack << 32;
        unp_size |= high_unp << 32;
        pos += 8;
    }

    if header.len() < pos + name_size {
        return Err(Error::corrupt_header(offset, "file name exceeds header"));
    }
    let name_bytes = &header[pos..pos + name_size];

    // Unicode names store the 8-bit name, a NUL, then an encoded form;
    // the 8-bit prefix is good enough for the index.
    let name_end = if prelude.flags & LHD_UNICODE != 0 {
        name_bytes.iter().position(|&b| b == 0).unwrap_or(name_size)
    } else {
        name_size
    };
    let name = String::from_utf8_lossy(&name_bytes[..name_end])
        .into_owned()
        .replace('\\', "/");

    // Salt and extended time fields trail the name inside the header
    // size, so the data offset needs no adjustment for them.
    let is_directory = prelude.flags & LHD_WINDOW_MASK == LHD_WINDOW_MASK;
    let compressed = method != METHOD_STORE;

    let mut entry = Entry::new(name, index);
    entry.is_directory = is_directory;
    entry.compressed_size = pack_size;
    entry.uncompressed_size = Some(unp_size);
    entry.compression = if compressed {
        CompressionType::Rar
    } else {
        CompressionType::Store
    };
    entry.crc32 = if is_directory { None } else { Some(file_crc) };
    entry.attributes = Some(attributes);
    entry.is_encrypted = prelude.flags & LHD_PASSWORD != 0;
    entry.last_modified =
        Timestamp::from_dos_datetime((ftime >> 16) as u16, ftime as u16).map(|t| t.as_system_time());
    if solid && compressed {
        entry.solid_group_id = Some(0);
    }
    if !is_directory {
        entry.data_offset = Some(offset + prelude.size as u64);
    }

    Ok((entry, pack_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn finish_block(mut block: Vec<u8>) -> Vec<u8> {
        let crc = (crc32fast::hash(&block[2..]) & 0xFFFF) as u16;
        block[0..2].copy_from_slice(&crc.to_le_bytes());
        block
    }

    fn main_header(flags: u16) -> Vec<u8> {
        let mut block = vec![0u8; 13];
        block[2] = BLOCK_MAIN;
        block[3..5].copy_from_slice(&flags.to_le_bytes());
        block[5..7].copy_from_slice(&13u16.to_le_bytes());
        finish_block(block)
    }

    fn file_header(name: &str, data: &[u8], method: u8, flags: u16) -> Vec<u8> {
        let size = 32 + name.len();
        let mut block = vec![0u8; size];
        block[2] = BLOCK_FILE;
        block[3..5].copy_from_slice(&flags.to_le_bytes());
        block[5..7].copy_from_slice(&(size as u16).to_le_bytes());
        block[7..11].copy_from_slice(&(data.len() as u32).to_le_bytes());
        block[11..15].copy_from_slice(&(data.len() as u32).to_le_bytes());
        block[16..20].copy_from_slice(&crc32fast::hash(data).to_le_bytes());
        let dos_date: u16 = (2024 - 1980) << 9 | 3 << 5 | 10;
        let dos_time: u16 = 9 << 11 | 15 << 5;
        let ftime = (dos_date as u32) << 16 | dos_time as u32;
        block[20..24].copy_from_slice(&ftime.to_le_bytes());
        block[24] = 29; // unpack version
        block[25] = method;
        block[26..28].copy_from_slice(&(name.len() as u16).to_le_bytes());
        block[28..32].copy_from_slice(&0x20u32.to_le_bytes());
        block[32..].copy_from_slice(name.as_bytes());
        finish_block(block)
    }

    fn end_header() -> Vec<u8> {
        let mut block = vec![0u8; 7];
        block[2] = BLOCK_END;
        block[5..7].copy_from_slice(&7u16.to_le_bytes());
        finish_block(block)
    }

    fn build_rar(main_flags: u16, files: &[(&str, &[u8], u8, u16)]) -> Vec<u8> {
        let mut out = MARKER.to_vec();
        out.extend_from_slice(&main_header(main_flags));
        for (name, data, method, flags) in files {
            out.extend_from_slice(&file_header(name, data, *method, *flags));
            out.extend_from_slice(data);
        }
        out.extend_from_slice(&end_header());
        out
    }

    #[test]
    fn test_read_index_stored_file() {
        let data = build_rar(0, &[("readme.txt", b"stored payload", METHOD_STORE, 0)]);
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();

        assert_eq!(index.entries.len(), 1);
        let entry = &index.entries[0];
        assert_eq!(entry.name, "readme.txt");
        assert_eq!(entry.compression, CompressionType::Store);
        assert_eq!(entry.uncompressed_size, Some(14));
        assert_eq!(entry.crc32, Some(crc32fast::hash(b"stored payload")));
        assert!(entry.last_modified.is_some());
        assert!(!entry.is_solid());

        let offset = entry.data_offset.unwrap() as usize;
        assert_eq!(&data[offset..offset + 14], b"stored payload");
    }

    #[test]
    fn test_compressed_entry_surfaces_rar_method() {
        let data = build_rar(0, &[("packed.bin", b"\x01\x02\x03", 0x33, 0)]);
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();
        assert_eq!(index.entries[0].compression, CompressionType::Rar);
    }

    #[test]
    fn test_solid_archive_marks_compressed_entries() {
        let data = build_rar(
            MHD_SOLID,
            &[
                ("a.bin", b"aa", 0x33, 0),
                ("b.txt", b"bb", METHOD_STORE, 0),
            ],
        );
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();

        assert!(index.entries[0].is_solid());
        assert!(!index.entries[1].is_solid());
        assert!(!index.capabilities.concurrent_reads);
    }

    #[test]
    fn test_encrypted_entry_flag() {
        let data = build_rar(0, &[("secret.txt", b"x", METHOD_STORE, LHD_PASSWORD)]);
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();
        assert!(index.entries[0].is_encrypted);
    }

    #[test]
    fn test_directory_entry() {
        let data = build_rar(0, &[("subdir", b"", METHOD_STORE, LHD_WINDOW_MASK)]);
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();
        assert!(index.entries[0].is_directory);
        assert!(index.entries[0].data_offset.is_none());
    }

    #[test]
    fn test_backslash_names_normalized() {
        let data = build_rar(0, &[("dir\\file.txt", b"x", METHOD_STORE, 0)]);
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Rar).unwrap();
        assert_eq!(index.entries[0].name, "dir/file.txt");
    }

    #[test]
    fn test_header_crc_mismatch() {
        let mut data = build_rar(0, &[("a.txt", b"x", METHOD_STORE, 0)]);
        data[7 + 13 + 3] ^= 0xFF; // flip a file header flag byte
        let mut cursor = Cursor::new(&data);
        let err = read_index(&mut cursor, FormatKind::Rar).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_encrypted_headers_rejected() {
        let data = build_rar(MHD_PASSWORD, &[]);
        let mut cursor = Cursor::new(&data);
        let err = read_index(&mut cursor, FormatKind::Rar).unwrap_err();
        assert!(matches!(err, Error::PasswordRequired));
    }

    #[test]
    fn test_rar5_rejected() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_index(&mut cursor, FormatKind::Rar5).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }

    #[test]
    fn test_bad_marker() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        let err = read_index(&mut cursor, FormatKind::Rar).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
