//! # unarc
//!
//! A pure-Rust library for reading and extracting archives in the common
//! container formats: 7z, zip, tar, RAR4, gzip, and bzip2 (including
//! `tar.gz` and `tar.bz2`).
//!
//! The crate presents one format-agnostic model. An [`Archive`] detects
//! its container from signature bytes, parses the entry index up front,
//! and exposes uniform [`Entry`] metadata. An [`Extractor`] decodes
//! payloads on demand, enforcing the sequencing rules of solid and
//! streamed archives and verifying recorded checksums along the way.
//!
//! ## Quick Start
//!
//! ### Extracting an Archive
//!
//! ```rust,no_run
//! use unarc::{Archive, ExtractionOptions, Result};
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     // Open from a file path; the format is detected automatically.
//!     let mut archive = Archive::open_path("backup.7z")?;
//!
//!     // List entries
//!     for entry in archive.entries() {
//!         println!(
//!             "{:>10}  {}",
//!             entry.uncompressed_size.unwrap_or(0),
//!             entry.name()
//!         );
//!     }
//!
//!     // Extract everything to a directory
//!     let summary = archive
//!         .extractor()?
//!         .extract_all(Path::new("./output"), &ExtractionOptions::default())?;
//!     println!("{} extracted, {} failed", summary.extracted(), summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ### Reading a Single Entry into Memory
//!
//! ```rust,no_run
//! use unarc::{Archive, Result};
//!
//! fn main() -> Result<()> {
//!     let mut archive = Archive::open_path("bundle.zip")?;
//!     let data = archive.extractor()?.read_entry(0)?;
//!     println!("{} bytes", data.len());
//!     Ok(())
//! }
//! ```
//!
//! ### Cancelling a Long Extraction
//!
//! ```rust,no_run
//! use unarc::{Archive, CancellationToken, ExtractionOptions};
//! use std::path::Path;
//!
//! # fn main() -> unarc::Result<()> {
//! let token = CancellationToken::new();
//! let handle = token.clone();
//! // Fire the token from a signal handler or another thread:
//! // handle.cancel();
//!
//! let mut archive = Archive::open_path("huge.tar.gz")?;
//! let result = archive
//!     .extractor()?
//!     .with_cancellation(&token)
//!     .extract_all(Path::new("./output"), &ExtractionOptions::default());
//! # let _ = result;
//! # Ok(())
//! # }
//! ```
//!
//! ## Solid Archives
//!
//! Entries of a solid 7z block or a `tar.gz` share one decoder. A full
//! pass through [`Extractor::extract_all`] decodes each block exactly
//! once; single-entry access is possible but must follow container
//! order and re-decodes the block from its start each time.
//! [`Entry::is_solid`] and [`Archive::is_solid`] tell you which regime
//! an archive is in.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `lzma` | Yes | LZMA and LZMA2 decoding (7z) |
//! | `deflate` | Yes | Deflate decoding (zip, gzip) |
//! | `bzip2` | Yes | BZip2 decoding |
//! | `ppmd` | Yes | PPMd variant H decoding (7z) |
//!
//! With a feature disabled, archives using that method still open and
//! enumerate; extracting an affected entry fails with
//! [`Error::UnsupportedMethod`].
//!
//! ## Scope
//!
//! This crate reads archives; it does not write them. Encrypted
//! archives and entries are enumerable, but extraction fails with
//! [`Error::PasswordRequired`]. RAR entries are enumerable; the
//! proprietary RAR compression is not decoded, and RAR5 containers are
//! rejected at open.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

/// Default buffer size for read operations (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

pub mod archive;
pub mod cancel;
pub mod codec;
pub mod destination;
pub mod entry;
pub mod error;
pub mod options;
pub mod sniff;
pub mod volume;

mod extract;
mod timestamp;

pub(crate) mod format;

pub use archive::{Archive, FileSource, SourceKind};
pub use cancel::CancellationToken;
pub use destination::write_entry;
pub use entry::{CompressionType, Entry, EntrySelector, SelectAll};
pub use error::{Error, Result};
pub use extract::{EntryOutcome, ExtractionSummary, Extractor};
pub use format::Capabilities;
pub use options::{ExtractionOptions, OpenOptions};
pub use sniff::FormatKind;
pub use volume::MultiVolumeReader;
