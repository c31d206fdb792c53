//! LZMA and LZMA2 codec implementations.

use std::io::{self, Read};

use super::Decoder;
use crate::entry::CompressionType;
use crate::{Error, Result};

/// LZMA decoder.
pub struct LzmaDecoder<R> {
    inner: lzma_rust2::LzmaReader<R>,
}

impl<R> std::fmt::Debug for LzmaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> LzmaDecoder<R> {
    /// Creates a new LZMA decoder.
    ///
    /// `properties` are the container-native 5 bytes: one properties byte
    /// followed by a little-endian dictionary size.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties are truncated or invalid.
    pub fn new(input: R, properties: &[u8], uncompressed_size: u64) -> Result<Self> {
        if properties.len() < 5 {
            return Err(Error::InvalidFormat(
                "LZMA properties too short (need 5 bytes)".into(),
            ));
        }

        let props_byte = properties[0];
        let dict_size = u32::from_le_bytes(properties[1..5].try_into().unwrap());

        let reader = lzma_rust2::LzmaReader::new_with_props(
            input,
            uncompressed_size,
            props_byte,
            dict_size,
            None,
        )
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;

        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for LzmaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for LzmaDecoder<R> {
    fn method(&self) -> CompressionType {
        CompressionType::Lzma
    }
}

/// LZMA2 decoder.
pub struct Lzma2Decoder<R> {
    inner: lzma_rust2::Lzma2Reader<R>,
}

impl<R> std::fmt::Debug for Lzma2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lzma2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Lzma2Decoder<R> {
    /// Creates a new LZMA2 decoder.
    ///
    /// `properties` is the container-native single byte encoding the
    /// dictionary size.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties are truncated or invalid.
    pub fn new(input: R, properties: &[u8]) -> Result<Self> {
        if properties.is_empty() {
            return Err(Error::InvalidFormat(
                "LZMA2 properties too short (need 1 byte)".into(),
            ));
        }

        let dict_size = decode_dict_size(properties[0])?;
        let reader = lzma_rust2::Lzma2Reader::new(input, dict_size, None);

        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for Lzma2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Lzma2Decoder<R> {
    fn method(&self) -> CompressionType {
        CompressionType::Lzma2
    }
}

/// Decodes the LZMA2 dictionary size property byte.
fn decode_dict_size(prop: u8) -> Result<u32> {
    if prop > 40 {
        return Err(Error::InvalidFormat(format!(
            "invalid LZMA2 dictionary size property: {prop}"
        )));
    }

    if prop == 40 {
        return Ok(0xFFFF_FFFF);
    }

    let base_log = u32::from(prop) / 2 + 12;
    let size = if prop % 2 == 0 {
        1u32 << base_log
    } else {
        3u32 << (base_log - 1)
    };

    Ok(size)
}
