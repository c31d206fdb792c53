//! Shared fixture builders for integration tests.
//!
//! Archives are built byte by byte so the tests depend only on the
//! container specifications, not on an external archiver.

#![allow(dead_code)]

/// Builds a zip archive of stored (uncompressed) entries. Names ending
/// in `/` become directory entries.
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    let dos_date: u16 = (2024 - 1980) << 9 | 6 << 5 | 15;
    let dos_time: u16 = 12 << 11 | 30 << 5;

    for (name, data) in files {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);

        out.extend_from_slice(&0x04034B50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // method: store
        out.extend_from_slice(&dos_time.to_le_bytes());
        out.extend_from_slice(&dos_date.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        central.extend_from_slice(&0x02014B50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&dos_time.to_le_bytes());
        central.extend_from_slice(&dos_date.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        let external: u32 = if name.ends_with('/') { 0x10 } else { 0x20 };
        central.extend_from_slice(&external.to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x06054B50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn tar_block(name: &str, size: u64, typeflag: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..name.len()].copy_from_slice(name.as_bytes());
    block[100..107].copy_from_slice(b"0000644");
    block[108..115].copy_from_slice(b"0001750");
    block[116..123].copy_from_slice(b"0001750");
    block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
    block[136..147].copy_from_slice(format!("{:011o}", 1_600_000_000u64).as_bytes());
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
    block[154] = 0;
    block[155] = b' ';
    block
}

/// Builds a ustar archive. Names ending in `/` become directory entries.
pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in files {
        let typeflag = if name.ends_with('/') { b'5' } else { b'0' };
        out.extend_from_slice(&tar_block(name, data.len() as u64, typeflag));
        out.extend_from_slice(data);
        let padding = (512 - data.len() % 512) % 512;
        out.extend_from_slice(&vec![0u8; padding]);
    }
    out.extend_from_slice(&[0u8; 1024]);
    out
}

/// Wraps bytes in a gzip stream carrying the given original file name.
#[cfg(feature = "deflate")]
pub fn gzip_wrap(name: Option<&str>, payload: &[u8]) -> Vec<u8> {
    use flate2::{Compression, write::DeflateEncoder};
    use std::io::Write;

    let mut out = vec![0x1F, 0x8B, 0x08, 0, 0, 0, 0, 0, 0, 255];
    if let Some(name) = name {
        out[3] = 0x08; // FNAME
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    out.extend_from_slice(&encoder.finish().unwrap());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    // 7z variable-length integer, single-byte form suffices here.
    assert!(value < 0x80, "fixture values stay below 128");
    out.push(value as u8);
}

/// Builds a 7z archive holding one stored (Copy) file.
pub fn build_7z_store(name: &str, content: &[u8]) -> Vec<u8> {
    let mut header = Vec::new();
    header.push(0x01); // header
    header.push(0x04); // main streams info

    header.push(0x06); // pack info
    write_varint(&mut header, 0);
    write_varint(&mut header, 1);
    header.push(0x09); // size
    write_varint(&mut header, content.len() as u64);
    header.push(0x00);

    header.push(0x07); // unpack info
    header.push(0x0B); // folder
    write_varint(&mut header, 1);
    header.push(0x00); // not external
    write_varint(&mut header, 1); // one coder
    header.push(0x01); // 1-byte method id
    header.push(0x00); // copy
    header.push(0x0C); // coders unpack size
    write_varint(&mut header, content.len() as u64);
    header.push(0x00);

    header.push(0x00); // end streams info

    header.push(0x05); // files info
    write_varint(&mut header, 1);
    header.push(0x11); // names
    let mut names = vec![0x00u8];
    for unit in name.encode_utf16() {
        names.extend_from_slice(&unit.to_le_bytes());
    }
    names.extend_from_slice(&[0, 0]);
    write_varint(&mut header, names.len() as u64);
    header.extend_from_slice(&names);
    header.push(0x00);

    header.push(0x00); // end header

    let mut data = Vec::new();
    data.extend_from_slice(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]);
    data.push(0x00);
    data.push(0x04);

    let mut locator = Vec::new();
    locator.extend_from_slice(&(content.len() as u64).to_le_bytes());
    locator.extend_from_slice(&(header.len() as u64).to_le_bytes());
    locator.extend_from_slice(&crc32fast::hash(&header).to_le_bytes());

    data.extend_from_slice(&crc32fast::hash(&locator).to_le_bytes());
    data.extend_from_slice(&locator);
    data.extend_from_slice(content);
    data.extend_from_slice(&header);
    data
}

fn rar_finish_block(mut block: Vec<u8>) -> Vec<u8> {
    let crc = (crc32fast::hash(&block[2..]) & 0xFFFF) as u16;
    block[0..2].copy_from_slice(&crc.to_le_bytes());
    block
}

/// Builds a RAR4 archive of stored files.
pub fn build_rar_store(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = vec![0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

    let mut main = vec![0u8; 13];
    main[2] = 0x73;
    main[5..7].copy_from_slice(&13u16.to_le_bytes());
    out.extend_from_slice(&rar_finish_block(main));

    for (name, data) in files {
        let size = 32 + name.len();
        let mut block = vec![0u8; size];
        block[2] = 0x74;
        block[5..7].copy_from_slice(&(size as u16).to_le_bytes());
        block[7..11].copy_from_slice(&(data.len() as u32).to_le_bytes());
        block[11..15].copy_from_slice(&(data.len() as u32).to_le_bytes());
        block[16..20].copy_from_slice(&crc32fast::hash(data).to_le_bytes());
        let dos_date: u16 = (2024 - 1980) << 9 | 3 << 5 | 10;
        let dos_time: u16 = 9 << 11 | 15 << 5;
        let ftime = (dos_date as u32) << 16 | dos_time as u32;
        block[20..24].copy_from_slice(&ftime.to_le_bytes());
        block[24] = 29;
        block[25] = 0x30; // store
        block[26..28].copy_from_slice(&(name.len() as u16).to_le_bytes());
        block[28..32].copy_from_slice(&0x20u32.to_le_bytes());
        block[32..].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&rar_finish_block(block));
        out.extend_from_slice(data);
    }

    let mut end = vec![0u8; 7];
    end[2] = 0x7B;
    end[5..7].copy_from_slice(&7u16.to_le_bytes());
    out.extend_from_slice(&rar_finish_block(end));
    out
}
