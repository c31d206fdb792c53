//! bzip2 codec implementation.

use std::io::{self, Read};

use bzip2::read::BzDecoder;

use super::Decoder;
use crate::entry::CompressionType;

/// bzip2 decoder.
pub struct Bzip2Decoder<R> {
    inner: BzDecoder<R>,
}

impl<R> std::fmt::Debug for Bzip2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Bzip2Decoder<R> {
    /// Creates a new bzip2 decoder.
    pub fn new(input: R) -> Self {
        Self {
            inner: BzDecoder::new(input),
        }
    }
}

impl<R: Read + Send> Read for Bzip2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Bzip2Decoder<R> {
    fn method(&self) -> CompressionType {
        CompressionType::BZip2
    }
}
