//! Single-stream wrapper driver for gzip and bzip2.
//!
//! These wrappers carry exactly one compressed stream, so the index is a
//! single decode run. When the decoded bytes turn out to be a TAR archive
//! (the tar.gz / tar.bz2 composition), the inner members are enumerated
//! instead, with offsets in the decoded stream, and the whole file is one
//! solid run.

use std::io::{BufReader, Read, Seek, SeekFrom};
use std::time::{Duration, UNIX_EPOCH};

use crate::entry::{CompressionType, Entry};
use crate::sniff::FormatKind;
use crate::{Error, Result};

use super::{ArchiveIndex, Capabilities, SolidRun, read_u8, read_u16_le, read_u32_le, tar};

/// gzip FLG bits.
const FLAG_HCRC: u8 = 0x02;
const FLAG_EXTRA: u8 = 0x04;
const FLAG_NAME: u8 = 0x08;
const FLAG_COMMENT: u8 = 0x10;

/// Fallback entry name when the wrapper stores none.
const DEFAULT_NAME: &str = "data";

/// Metadata from a gzip member header.
#[derive(Debug, Default)]
struct GzipHeader {
    name: Option<String>,
    mtime: u32,
}

/// Parses a gzip member header, leaving the reader at the deflate
/// payload.
fn parse_gzip_header<R: Read>(reader: &mut R) -> Result<GzipHeader> {
    let mut fixed = [0u8; 10];
    reader.read_exact(&mut fixed)?;
    if fixed[0] != 0x1F || fixed[1] != 0x8B {
        return Err(Error::InvalidFormat("invalid gzip magic".into()));
    }
    if fixed[2] != 8 {
        return Err(Error::UnsupportedFeature {
            feature: "gzip compression methods other than deflate",
        });
    }

    let flags = fixed[3];
    let mtime = u32::from_le_bytes(fixed[4..8].try_into().unwrap());

    if flags & FLAG_EXTRA != 0 {
        let extra_len = read_u16_le(reader)? as u64;
        std::io::copy(&mut reader.take(extra_len), &mut std::io::sink())?;
    }

    let mut name = None;
    if flags & FLAG_NAME != 0 {
        name = Some(read_nul_terminated(reader)?);
    }
    if flags & FLAG_COMMENT != 0 {
        read_nul_terminated(reader)?;
    }
    if flags & FLAG_HCRC != 0 {
        let _ = read_u16_le(reader)?;
    }

    Ok(GzipHeader { name, mtime })
}

fn read_nul_terminated<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let b = read_u8(reader)?;
        if b == 0 {
            break;
        }
        if bytes.len() >= 4096 {
            return Err(Error::InvalidFormat("gzip header string too long".into()));
        }
        bytes.push(b);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Builds a throwaway decoder over the packed payload for the ustar
/// check and for the inner TAR walk. `None` when the matching codec
/// feature is compiled out.
fn payload_decoder<'a, R: Read + 'a>(
    input: R,
    format: FormatKind,
) -> Option<Box<dyn Read + 'a>> {
    #[cfg(not(any(feature = "deflate", feature = "bzip2")))]
    let _ = input;

    match format {
        #[cfg(feature = "deflate")]
        FormatKind::Gzip => Some(Box::new(flate2::bufread::DeflateDecoder::new(
            BufReader::new(input),
        ))),
        #[cfg(feature = "bzip2")]
        FormatKind::Bzip2 => Some(Box::new(bzip2::read::BzDecoder::new(input))),
        _ => None,
    }
}

/// Checks whether the decoded stream starts with a ustar header block.
fn looks_like_tar(decoded: &mut dyn Read) -> bool {
    let mut block = [0u8; 512];
    if decoded.read_exact(&mut block).is_err() {
        return false;
    }
    block[257..262] == *b"ustar"
}

/// Parses a gzip or bzip2 wrapper into the shared index.
pub(crate) fn read_index<R: Read + Seek>(
    reader: &mut R,
    format: FormatKind,
) -> Result<ArchiveIndex> {
    let base = reader.stream_position()?;
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(base))?;

    let (header, pack_offset, pack_size, trailer) = match format {
        FormatKind::Gzip => {
            let header = parse_gzip_header(reader)?;
            let pack_offset = reader.stream_position()?;
            if file_len < pack_offset + 8 {
                return Err(Error::InvalidFormat("gzip stream missing trailer".into()));
            }

            reader.seek(SeekFrom::Start(file_len - 8))?;
            let crc = read_u32_le(reader)?;
            let isize = read_u32_le(reader)?;

            (
                header,
                pack_offset,
                file_len - pack_offset - 8,
                Some((crc, isize as u64)),
            )
        }
        FormatKind::Bzip2 => {
            let mut magic = [0u8; 4];
            reader.read_exact(&mut magic)?;
            if &magic[..3] != b"BZh" || !magic[3].is_ascii_digit() {
                return Err(Error::InvalidFormat("invalid bzip2 magic".into()));
            }
            (GzipHeader::default(), base, file_len - base, None)
        }
        other => {
            return Err(Error::InvalidFormat(format!(
                "stream driver cannot handle {other}"
            )));
        }
    };

    let method = match format {
        FormatKind::Gzip => CompressionType::Deflate,
        _ => CompressionType::BZip2,
    };

    // Check the decoded bytes for an inner TAR archive. The throwaway
    // decoder is consumed inside its own scope so the source can be
    // re-borrowed for the full walk.
    reader.seek(SeekFrom::Start(pack_offset))?;
    let is_tar = match payload_decoder(reader.by_ref().take(pack_size), format) {
        Some(mut decoded) => looks_like_tar(&mut decoded),
        None => false,
    };

    let mut inner_entries = None;
    if is_tar {
        reader.seek(SeekFrom::Start(pack_offset))?;
        if let Some(mut decoder) = payload_decoder(reader.by_ref().take(pack_size), format) {
            inner_entries = Some(tar::read_entries(&mut decoder)?);
        }
    }

    let mut run = SolidRun {
        pack_offset,
        pack_size,
        method,
        properties: Vec::new(),
        unpacked_size: trailer.map(|(_, isize)| isize).unwrap_or(0),
        members: Vec::new(),
    };

    let entries = match inner_entries {
        Some(mut entries) => {
            let members: Vec<usize> = entries
                .iter()
                .filter(|e| e.data_offset.is_some())
                .map(|e| e.index)
                .collect();
            let solid = members.len() > 1;

            for (position, &index) in members.iter().enumerate() {
                let entry = &mut entries[index];
                entry.run_id = Some(0);
                entry.run_position = Some(position);
                if solid {
                    entry.solid_group_id = Some(0);
                }
            }
            run.members = members;
            entries
        }
        None => {
            let name = header.name.clone().unwrap_or_else(|| DEFAULT_NAME.into());
            let mut entry = Entry::new(name, 0);
            entry.compressed_size = pack_size;
            // ISIZE is the uncompressed length modulo 2^32, so it can
            // only bound the decode for the low 32 bits.
            entry.uncompressed_size = trailer.map(|(_, isize)| isize);
            entry.size_is_modular = trailer.is_some();
            entry.compression = method;
            entry.crc32 = trailer.map(|(crc, _)| crc);
            entry.data_offset = Some(0);
            entry.run_id = Some(0);
            entry.run_position = Some(0);
            if header.mtime != 0 {
                entry.last_modified = Some(UNIX_EPOCH + Duration::from_secs(header.mtime as u64));
            }
            run.members = vec![0];
            vec![entry]
        }
    };

    Ok(ArchiveIndex {
        format,
        entries,
        runs: vec![run],
        capabilities: Capabilities {
            random_access: false,
            concurrent_reads: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn gzip_wrap(name: Option<&str>, mtime: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x1F, 0x8B, 0x08];
        out.push(if name.is_some() { FLAG_NAME } else { 0 });
        out.extend_from_slice(&mtime.to_le_bytes());
        out.push(0); // XFL
        out.push(0xFF); // OS: unknown
        if let Some(name) = name {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(payload).unwrap();
        out.extend_from_slice(&encoder.finish().unwrap());

        out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out
    }

    fn ustar_block(name: &str, size: u64, typeflag: u8) -> [u8; 512] {
        let mut block = [0u8; 512];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(b"0000644");
        block[108..115].copy_from_slice(b"0001750");
        block[116..123].copy_from_slice(b"0001750");
        block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
        block[136..147].copy_from_slice(b"14000000000");
        block[156] = typeflag;
        block[257..262].copy_from_slice(b"ustar");
        block[263..265].copy_from_slice(b"00");

        let mut sum: u64 = 32 * 8;
        for (i, &b) in block.iter().enumerate() {
            if !(148..156).contains(&i) {
                sum += b as u64;
            }
        }
        block[148..154].copy_from_slice(format!("{sum:06o}").as_bytes());
        block[155] = b' ';
        block
    }

    fn make_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, data) in files {
            out.extend_from_slice(&ustar_block(name, data.len() as u64, b'0'));
            out.extend_from_slice(data);
            let padding = (512 - data.len() % 512) % 512;
            out.extend_from_slice(&vec![0u8; padding]);
        }
        out.extend_from_slice(&[0u8; 1024]);
        out
    }

    #[test]
    fn test_gzip_header_with_name() {
        let data = gzip_wrap(Some("notes.txt"), 1_600_000_000, b"x");
        let mut cursor = Cursor::new(&data);
        let header = parse_gzip_header(&mut cursor).unwrap();
        assert_eq!(header.name.as_deref(), Some("notes.txt"));
        assert_eq!(header.mtime, 1_600_000_000);
    }

    #[test]
    fn test_gzip_rejects_bad_magic() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        let err = read_index(&mut cursor, FormatKind::Gzip).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_gzip_single_entry() {
        let payload = b"plain single-member payload";
        let data = gzip_wrap(Some("notes.txt"), 1_600_000_000, payload);

        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Gzip).unwrap();

        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.runs.len(), 1);
        assert!(!index.capabilities.random_access);

        let entry = &index.entries[0];
        assert_eq!(entry.name, "notes.txt");
        assert_eq!(entry.compression, CompressionType::Deflate);
        assert_eq!(entry.uncompressed_size, Some(payload.len() as u64));
        // The trailer length is only the size modulo 2^32.
        assert!(entry.size_is_modular);
        assert_eq!(entry.crc32, Some(crc32fast::hash(payload)));
        assert_eq!(entry.run_id, Some(0));
        assert!(entry.last_modified.is_some());
        assert!(!entry.is_solid());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_gzip_unnamed_entry_gets_fallback() {
        let data = gzip_wrap(None, 0, b"payload");
        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Gzip).unwrap();
        assert_eq!(index.entries[0].name, DEFAULT_NAME);
        assert!(index.entries[0].last_modified.is_none());
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_tar_gz_members_enumerated() {
        let tar = make_tar(&[("first.txt", b"first"), ("second.txt", b"second!")]);
        let data = gzip_wrap(None, 0, &tar);

        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Gzip).unwrap();

        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.runs.len(), 1);
        assert!(index.is_solid());

        let first = &index.entries[0];
        assert_eq!(first.name, "first.txt");
        // Inner tar headers record exact sizes.
        assert!(!first.size_is_modular);
        assert_eq!(first.data_offset, Some(512));
        assert_eq!(first.run_id, Some(0));
        assert_eq!(first.solid_group_id, Some(0));

        let second = &index.entries[1];
        assert_eq!(second.name, "second.txt");
        assert_eq!(second.data_offset, Some(1536));
        assert_eq!(second.run_position, Some(1));

        assert_eq!(index.runs[0].members, vec![0, 1]);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_bzip2_single_entry() {
        let payload = b"bzip2 wrapped payload";
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(payload).unwrap();
        let data = encoder.finish().unwrap();

        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Bzip2).unwrap();

        let entry = &index.entries[0];
        assert_eq!(entry.name, DEFAULT_NAME);
        assert_eq!(entry.compression, CompressionType::BZip2);
        // bzip2 has no size trailer.
        assert!(entry.uncompressed_size.is_none());
        assert_eq!(index.runs[0].pack_offset, 0);
        assert_eq!(index.runs[0].pack_size, data.len() as u64);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_tar_bz2_members_enumerated() {
        let tar = make_tar(&[("only.bin", b"solo")]);
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&tar).unwrap();
        let data = encoder.finish().unwrap();

        let mut cursor = Cursor::new(&data);
        let index = read_index(&mut cursor, FormatKind::Bzip2).unwrap();

        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].name, "only.bin");
        // A single member is streamed but not solid.
        assert!(index.entries[0].solid_group_id.is_none());
        assert!(!index.is_solid());
    }

    #[test]
    fn test_bzip2_bad_magic() {
        let mut cursor = Cursor::new(vec![0u8; 16]);
        let err = read_index(&mut cursor, FormatKind::Bzip2).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
