//! Deflate codec implementation.

use std::io::{self, Read};

use flate2::bufread::DeflateDecoder as FlateDecoder;

use super::Decoder;
use crate::entry::CompressionType;

/// Deflate decoder over a raw (headerless) deflate stream.
pub struct DeflateDecoder<R> {
    inner: FlateDecoder<R>,
}

impl<R> std::fmt::Debug for DeflateDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateDecoder").finish_non_exhaustive()
    }
}

impl<R: io::BufRead + Send> DeflateDecoder<R> {
    /// Creates a new Deflate decoder over a buffered source.
    pub fn new(input: R) -> Self {
        Self {
            inner: FlateDecoder::new(input),
        }
    }
}

impl<R: io::BufRead + Send> Read for DeflateDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: io::BufRead + Send> Decoder for DeflateDecoder<R> {
    fn method(&self) -> CompressionType {
        CompressionType::Deflate
    }
}
