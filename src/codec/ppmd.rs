//! PPMd codec implementation.
//!
//! PPMd (the PPMdH variant) is what 7z archives use for method 0x030401.
//! The container properties are 5 bytes: 1 byte of model order and a
//! little-endian 4-byte memory size.

use std::io::{self, Read};

use ppmd_rust::Ppmd7Decoder;
use ppmd_rust::{PPMD7_MAX_MEM_SIZE, PPMD7_MAX_ORDER, PPMD7_MIN_MEM_SIZE, PPMD7_MIN_ORDER};

use super::Decoder;
use crate::entry::CompressionType;
use crate::{Error, Result};

/// PPMd decoder with a fixed output size.
///
/// PPMd has no end-of-stream marker; the decoder has to stop at the size
/// the container recorded, or it would read garbage past the payload.
pub struct SizedPpmdDecoder<R: Read> {
    inner: Ppmd7Decoder<R>,
    remaining: u64,
}

impl<R: Read> std::fmt::Debug for SizedPpmdDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizedPpmdDecoder")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Send> SizedPpmdDecoder<R> {
    /// Creates a new PPMd decoder producing exactly `uncompressed_size`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the properties are truncated, the order or
    /// memory size is out of range, or decoder initialization fails.
    pub fn new(input: R, properties: &[u8], uncompressed_size: u64) -> Result<Self> {
        if properties.len() < 5 {
            return Err(Error::InvalidFormat(
                "PPMd properties too short (need 5 bytes)".into(),
            ));
        }

        let order = properties[0] as u32;
        let mem_size = u32::from_le_bytes(properties[1..5].try_into().unwrap());

        if !(PPMD7_MIN_ORDER..=PPMD7_MAX_ORDER).contains(&order) {
            return Err(Error::InvalidFormat(format!(
                "PPMd order {} out of range [{}-{}]",
                order, PPMD7_MIN_ORDER, PPMD7_MAX_ORDER
            )));
        }

        if !(PPMD7_MIN_MEM_SIZE..=PPMD7_MAX_MEM_SIZE).contains(&mem_size) {
            return Err(Error::InvalidFormat(format!(
                "PPMd memory size {} out of range [{}-{}]",
                mem_size, PPMD7_MIN_MEM_SIZE, PPMD7_MAX_MEM_SIZE
            )));
        }

        let inner = Ppmd7Decoder::new(input, order, mem_size)
            .map_err(|e| Error::InvalidFormat(format!("PPMd init failed: {e}")))?;

        Ok(Self {
            inner,
            remaining: uncompressed_size,
        })
    }
}

impl<R: Read + Send> Read for SizedPpmdDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        let max_read = (self.remaining as usize).min(buf.len());
        let n = self.inner.read(&mut buf[..max_read])?;
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok(n)
    }
}

impl<R: Read + Send> Decoder for SizedPpmdDecoder<R> {
    fn method(&self) -> CompressionType {
        CompressionType::Ppmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn props(order: u8, mem_size: u32) -> Vec<u8> {
        let mut p = vec![order];
        p.extend_from_slice(&mem_size.to_le_bytes());
        p
    }

    #[test]
    fn test_ppmd_rejects_short_properties() {
        let err = SizedPpmdDecoder::new(Cursor::new(Vec::<u8>::new()), &[6], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_ppmd_rejects_bad_order() {
        let err =
            SizedPpmdDecoder::new(Cursor::new(vec![0u8; 8]), &props(1, 1 << 20), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_ppmd_rejects_bad_mem_size() {
        let err = SizedPpmdDecoder::new(Cursor::new(vec![0u8; 8]), &props(6, 16), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_ppmd_roundtrip() {
        use ppmd_rust::Ppmd7Encoder;
        use std::io::Write;

        let data = b"PPMd roundtrip data. The model adapts as it reads the stream.";
        let order = 6u32;
        let mem_size = 16 << 20;

        let mut compressed = Vec::new();
        {
            let mut encoder = Ppmd7Encoder::new(&mut compressed, order, mem_size).unwrap();
            encoder.write_all(data).unwrap();
            encoder.finish(false).unwrap();
        }

        let mut decoder = SizedPpmdDecoder::new(
            Cursor::new(compressed),
            &props(order as u8, mem_size),
            data.len() as u64,
        )
        .unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
