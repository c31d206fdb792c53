//! Decompression codec infrastructure.
//!
//! Container drivers consume codecs as opaque decode engines: each codec
//! wraps an ecosystem decoder behind the [`Decoder`] trait, which is just
//! [`Read`] plus a method tag. Decoders for the methods the drivers need
//! are built through [`build_decoder`], which maps a [`CompressionType`]
//! and the container's codec properties onto the right engine or fails
//! with [`Error::UnsupportedMethod`](crate::Error::UnsupportedMethod)
//! when the corresponding cargo feature is disabled.

mod copy;

#[cfg(feature = "deflate")]
mod deflate;

#[cfg(feature = "bzip2")]
mod bzip2;

#[cfg(feature = "lzma")]
mod lzma;

#[cfg(feature = "ppmd")]
mod ppmd;

use std::io::Read;

use crate::entry::CompressionType;
use crate::{Error, Result};

pub use copy::CopyDecoder;

#[cfg(feature = "deflate")]
pub use deflate::DeflateDecoder;

#[cfg(feature = "bzip2")]
pub use self::bzip2::Bzip2Decoder;

#[cfg(feature = "lzma")]
pub use lzma::{Lzma2Decoder, LzmaDecoder};

#[cfg(feature = "ppmd")]
pub use ppmd::SizedPpmdDecoder;

/// A decoder that reads compressed data and produces uncompressed output.
pub trait Decoder: Read + Send {
    /// Returns the compression method this decoder handles.
    fn method(&self) -> CompressionType;
}

impl std::fmt::Debug for dyn Decoder + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("method", &self.method())
            .finish()
    }
}

/// Builds a decoder for the given method and container-native properties.
///
/// `uncompressed_size` caps the output for methods without an
/// end-of-stream marker (Store, PPMd) and is advisory for the rest.
///
/// # Errors
///
/// Returns [`Error::UnsupportedMethod`](crate::Error::UnsupportedMethod)
/// for methods this build cannot decode, and
/// [`Error::InvalidFormat`](crate::Error::InvalidFormat) for malformed
/// properties.
pub(crate) fn build_decoder<'a, R: Read + Send + 'a>(
    input: R,
    method: CompressionType,
    properties: &[u8],
    uncompressed_size: u64,
) -> Result<Box<dyn Decoder + 'a>> {
    #[cfg(not(all(feature = "deflate", feature = "bzip2", feature = "lzma", feature = "ppmd")))]
    let _ = properties;

    match method {
        CompressionType::Store => Ok(Box::new(CopyDecoder::new(input, uncompressed_size))),

        #[cfg(feature = "deflate")]
        CompressionType::Deflate => {
            let buf_reader = std::io::BufReader::new(input);
            Ok(Box::new(deflate::DeflateDecoder::new(buf_reader)))
        }

        #[cfg(feature = "bzip2")]
        CompressionType::BZip2 => Ok(Box::new(self::bzip2::Bzip2Decoder::new(input))),

        #[cfg(feature = "lzma")]
        CompressionType::Lzma => {
            let decoder = lzma::LzmaDecoder::new(input, properties, uncompressed_size)?;
            Ok(Box::new(decoder))
        }

        #[cfg(feature = "lzma")]
        CompressionType::Lzma2 => {
            let decoder = lzma::Lzma2Decoder::new(input, properties)?;
            Ok(Box::new(decoder))
        }

        #[cfg(feature = "ppmd")]
        CompressionType::Ppmd => {
            // PPMd has no end-of-stream marker; the decoder stops at the
            // recorded size.
            let decoder = ppmd::SizedPpmdDecoder::new(input, properties, uncompressed_size)?;
            Ok(Box::new(decoder))
        }

        other => Err(Error::unsupported_method(other.to_string())),
    }
}
