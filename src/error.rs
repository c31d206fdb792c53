//! Error types for archive operations.
//!
//! This module provides the [`Error`] enum which represents all failure
//! modes across the supported container formats, along with a convenient
//! [`Result<T>`] type alias.
//!
//! # Error Classes
//!
//! Errors fall into a small number of classes with different propagation
//! rules:
//!
//! | Class | Variants | Propagation |
//! |-------|----------|-------------|
//! | Format | [`UnknownFormat`][Error::UnknownFormat], [`InvalidFormat`][Error::InvalidFormat], [`CorruptHeader`][Error::CorruptHeader], [`ChecksumMismatch`][Error::ChecksumMismatch] | aborts `open` |
//! | Sequencing | [`OutOfOrder`][Error::OutOfOrder] | usage error, not retried |
//! | Codec | [`Codec`][Error::Codec], [`UnsupportedMethod`][Error::UnsupportedMethod], [`SolidRunPoisoned`][Error::SolidRunPoisoned] | per entry for indexed archives, whole pass for solid ones |
//! | I/O | [`Io`][Error::Io], [`VolumeMissing`][Error::VolumeMissing] | propagated, never swallowed |
//! | Collision | [`Collision`][Error::Collision] | scoped to one output path |
//!
//! # Using the `?` Operator
//!
//! ```rust,no_run
//! use unarc::{Archive, Result};
//!
//! fn list(path: &str) -> Result<()> {
//!     let archive = Archive::open_path(path)?;
//!     for entry in archive.entries() {
//!         println!("{}", entry.name());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Matching Specific Variants
//!
//! ```rust,no_run
//! use unarc::{Archive, Error};
//!
//! fn open_or_explain(path: &str) {
//!     match Archive::open_path(path) {
//!         Ok(_) => println!("opened"),
//!         Err(Error::UnknownFormat) => println!("not an archive we recognize"),
//!         Err(Error::CorruptHeader { offset, reason }) => {
//!             println!("damaged at byte {:#x}: {}", offset, reason);
//!         }
//!         Err(e) => println!("error: {}", e),
//!     }
//! }
//! ```

use std::io;
use std::path::PathBuf;

/// Helper struct for formatting Codec error messages.
struct CodecDisplay<'a> {
    entry_index: usize,
    entry_name: Option<&'a str>,
    method: &'a str,
    reason: &'a str,
}

impl std::fmt::Display for CodecDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Decode failed for entry {}", self.entry_index)?;
        if let Some(name) = self.entry_name {
            write!(f, " ({})", name)?;
        }
        write!(f, " using {}: {}", self.method, self.reason)
    }
}

/// Helper struct for formatting ChecksumMismatch error messages.
struct ChecksumDisplay<'a> {
    entry_index: Option<usize>,
    entry_name: Option<&'a str>,
    expected: u32,
    actual: u32,
}

impl std::fmt::Display for ChecksumDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checksum mismatch")?;
        if let Some(idx) = self.entry_index {
            write!(f, " for entry {}", idx)?;
        }
        if let Some(name) = self.entry_name {
            write!(f, " ({})", name)?;
        }
        write!(f, ": expected {:#x}, got {:#x}", self.expected, self.actual)
    }
}

/// The main error type for archive operations.
///
/// Each variant carries enough context to diagnose the failure: byte
/// offsets for structural corruption, entry indices and names for decode
/// failures, and paths for destination collisions and missing volumes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying source or destination.
    ///
    /// This wraps [`std::io::Error`]. Common causes include a file that
    /// cannot be opened, a short read from a truncated source, or a
    /// permission failure while writing extracted output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The leading bytes of the source match no supported container format.
    ///
    /// Returned by [`Archive::open`][crate::Archive::open] when signature
    /// probing and the file-name fallback both come up empty. The source
    /// stream is left positioned where it was before the probe.
    #[error("Unrecognized archive format")]
    UnknownFormat,

    /// The container signature matched but the structure does not.
    ///
    /// The string describes what was expected versus what was found.
    #[error("Invalid archive: {0}")]
    InvalidFormat(String),

    /// A structural header is corrupt or truncated.
    ///
    /// The offset is relative to the start of the source and points at the
    /// field where parsing gave up.
    #[error("Corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// The byte offset where corruption was detected.
        offset: u64,
        /// A description of the corruption.
        reason: String,
    },

    /// A stored CRC does not match the computed one.
    ///
    /// In the header region this is a format-class error and aborts
    /// `open`; on entry payloads it indicates the extracted bytes differ
    /// from what was archived.
    #[error("{}", ChecksumDisplay { entry_index: *entry_index, entry_name: entry_name.as_deref(), expected: *expected, actual: *actual })]
    ChecksumMismatch {
        /// The entry index, if the mismatch is on an entry payload.
        entry_index: Option<usize>,
        /// The entry name, if known.
        entry_name: Option<String>,
        /// The CRC recorded in the archive.
        expected: u32,
        /// The CRC computed over the actual bytes.
        actual: u32,
    },

    /// An out-of-order decode request against a solid or streamed archive.
    ///
    /// Entries that share a compression context must be decoded in
    /// container order. Requesting entry `requested` while `expected` has
    /// not been consumed is a usage error; retrying without consuming the
    /// intervening entries will fail the same way.
    #[error("Out-of-order decode: entry {requested} requested but entry {expected} is next in the solid run")]
    OutOfOrder {
        /// The entry index that must be consumed next.
        expected: usize,
        /// The entry index that was requested.
        requested: usize,
    },

    /// The decompression engine rejected the data mid-stream.
    ///
    /// For indexed archives this is scoped to one entry and siblings stay
    /// extractable. For solid archives it invalidates every later entry of
    /// the run; those report [`SolidRunPoisoned`][Error::SolidRunPoisoned].
    #[error("{}", CodecDisplay { entry_index: *entry_index, entry_name: entry_name.as_deref(), method, reason })]
    Codec {
        /// The entry index where decoding failed.
        entry_index: usize,
        /// The entry name, if known.
        entry_name: Option<String>,
        /// The compression method in use.
        method: String,
        /// What the decode engine reported.
        reason: String,
    },

    /// An earlier entry of the same solid run failed to decode.
    ///
    /// Solid entries share decoder state, so once entry `failed_at` fails
    /// the stream position for everything after it is unknowable. The
    /// archive must be reopened to retry any of them.
    #[error("Entry {entry_index} unavailable: solid run poisoned by failure at entry {failed_at}")]
    SolidRunPoisoned {
        /// The entry that was requested.
        entry_index: usize,
        /// The entry whose decode failure poisoned the run.
        failed_at: usize,
    },

    /// The archive uses a compression method this build cannot decode.
    ///
    /// Either the method is genuinely unsupported (e.g. proprietary RAR
    /// compression) or the corresponding cargo feature is disabled.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// A printable name or numeric ID of the method.
        method: String,
    },

    /// A structural feature of the archive is not supported.
    ///
    /// Examples: 7z encoded (compressed) headers, RAR5 containers.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// The name of the unsupported feature.
        feature: &'static str,
    },

    /// A volume file is missing or short in a multi-volume set.
    ///
    /// This is an I/O-class error, not a format error: the parts that are
    /// present parse fine, the data simply is not all there. Entries whose
    /// payload lies entirely in present volumes remain extractable.
    #[error("Volume {volume} missing: expected at '{path}'")]
    VolumeMissing {
        /// The volume number (1-indexed) that is missing.
        volume: u32,
        /// The expected path of the missing volume.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The destination path already exists and overwrite is disabled.
    ///
    /// Scoped to one output path; sibling entries continue to extract.
    #[error("Destination already exists: {}", path.display())]
    Collision {
        /// The path that already exists.
        path: PathBuf,
    },

    /// An entry path would escape the destination root.
    ///
    /// Rejected before any bytes are written.
    #[error("Unsafe entry path: {path}")]
    UnsafePath {
        /// The offending archive-internal path.
        path: String,
    },

    /// The operation was cancelled through a [`CancellationToken`].
    ///
    /// Partially written output has been removed and the archive stream
    /// released before this is returned.
    ///
    /// [`CancellationToken`]: crate::CancellationToken
    #[error("Operation cancelled")]
    Cancelled,

    /// A decode handle was used after its archive was closed.
    #[error("Archive is closed")]
    ArchiveClosed,

    /// A second extraction pass was started while one is in flight.
    ///
    /// Solid archives permit one pass at a time.
    #[error("An extraction pass is already in progress")]
    ExtractionInProgress,

    /// The archive or an entry is encrypted and no usable password exists.
    ///
    /// Decryption is outside the scope of this crate; the error surfaces
    /// the condition so callers can route the archive elsewhere.
    #[error("Password required for encrypted content")]
    PasswordRequired,
}

impl Error {
    /// Returns `true` for format-class errors: the source is not a valid
    /// archive of any supported kind, or its structure is damaged.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownFormat
                | Error::InvalidFormat(_)
                | Error::CorruptHeader { .. }
                | Error::ChecksumMismatch { .. }
        )
    }

    /// Returns `true` if this is a sequencing violation against a solid
    /// or streamed archive.
    pub fn is_sequencing(&self) -> bool {
        matches!(self, Error::OutOfOrder { .. })
    }

    /// Returns `true` for codec-class errors.
    ///
    /// For a solid archive any of these ends the extraction pass; for an
    /// indexed archive they are scoped to a single entry.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Error::Codec { .. }
                | Error::SolidRunPoisoned { .. }
                | Error::UnsupportedMethod { .. }
        )
    }

    /// Returns `true` for I/O-class errors, including missing volumes.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_) | Error::VolumeMissing { .. })
    }

    /// Returns `true` if this is a data corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptHeader { .. } | Error::ChecksumMismatch { .. }
        )
    }

    /// Returns `true` if this error might be resolved by the caller.
    ///
    /// - `Collision`: retry with overwrite enabled or a different root
    /// - `VolumeMissing`: the user can supply the missing part
    /// - `Cancelled`: the operation can be restarted
    /// - `Io` (transient kinds only): `WouldBlock`, `Interrupted`, `TimedOut`
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Collision { .. } => true,
            Error::VolumeMissing { .. } => true,
            Error::Cancelled => true,
            Error::PasswordRequired => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns the entry index associated with this error, if any.
    pub fn entry_index(&self) -> Option<usize> {
        match self {
            Error::Codec { entry_index, .. } => Some(*entry_index),
            Error::SolidRunPoisoned { entry_index, .. } => Some(*entry_index),
            Error::OutOfOrder { requested, .. } => Some(*requested),
            Error::ChecksumMismatch { entry_index, .. } => *entry_index,
            _ => None,
        }
    }

    /// Returns the entry name associated with this error, if any.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Error::Codec { entry_name, .. } => entry_name.as_deref(),
            Error::ChecksumMismatch { entry_name, .. } => entry_name.as_deref(),
            Error::UnsafePath { path } => Some(path.as_str()),
            Error::VolumeMissing { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }

    /// Creates a CorruptHeader error.
    pub fn corrupt_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a Codec error with entry context.
    pub fn codec(
        entry_index: usize,
        entry_name: Option<String>,
        method: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Codec {
            entry_index,
            entry_name,
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Creates a ChecksumMismatch error for an entry payload.
    pub fn checksum_mismatch(
        entry_index: usize,
        entry_name: Option<String>,
        expected: u32,
        actual: u32,
    ) -> Self {
        Error::ChecksumMismatch {
            entry_index: Some(entry_index),
            entry_name,
            expected,
            actual,
        }
    }

    /// Creates an UnsupportedMethod error from a printable method name.
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Error::UnsupportedMethod {
            method: method.into(),
        }
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
