//! Archive entry types and selectors.
//!
//! [`Entry`] is the format-agnostic view of one archive member. Drivers
//! fill it in from their own header structures; everything a caller needs
//! to decide whether and how to extract lives here, while the bytes
//! themselves are produced on demand by the extraction engine.

use std::time::SystemTime;

/// The compression method applied to an entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionType {
    /// Stored without compression.
    Store,
    /// Deflate (zip, gzip).
    Deflate,
    /// LZMA (7z).
    Lzma,
    /// LZMA2 (7z).
    Lzma2,
    /// bzip2.
    BZip2,
    /// PPMd variant H (7z).
    Ppmd,
    /// Proprietary RAR compression. Enumerable but not decodable.
    Rar,
    /// Any other method, identified by its container-native numeric ID.
    Other(u64),
}

impl CompressionType {
    /// Returns a printable name for this method.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionType::Store => "Store",
            CompressionType::Deflate => "Deflate",
            CompressionType::Lzma => "LZMA",
            CompressionType::Lzma2 => "LZMA2",
            CompressionType::BZip2 => "BZip2",
            CompressionType::Ppmd => "PPMd",
            CompressionType::Rar => "RAR",
            CompressionType::Other(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionType::Other(id) => write!(f, "Unknown({:#x})", id),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// One archive member.
///
/// Entries are immutable metadata produced while the archive header or
/// index is parsed. The decoded content is not stored; ask the extraction
/// engine for it.
///
/// This struct is marked `#[non_exhaustive]`; pattern matching requires a
/// `..` wildcard.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Entry {
    /// The path within the archive, `/`-separated.
    pub name: String,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Size of the compressed payload in bytes.
    ///
    /// For solid runs this is the member's share of the shared block and
    /// may be zero for every member but the first.
    pub compressed_size: u64,
    /// Uncompressed size in bytes, when the container records it.
    ///
    /// Advisory only. Streamed wrappers may not know it until decode
    /// completes, and a lying archive may produce more or fewer bytes.
    pub uncompressed_size: Option<u64>,
    /// The compression method of the payload.
    pub compression: CompressionType,
    /// Modification time, when the container records one.
    pub last_modified: Option<SystemTime>,
    /// Platform attribute bits as stored (DOS/Windows attributes, with
    /// Unix mode bits in the high half for archives that store them).
    pub attributes: Option<u32>,
    /// CRC-32 of the uncompressed payload, when the container records it.
    pub crc32: Option<u32>,
    /// Identifier of the solid run this entry belongs to.
    ///
    /// Entries sharing a group id share decoder state and must be decoded
    /// as one ordered run. `None` means the entry decodes independently.
    pub solid_group_id: Option<u32>,
    /// Whether the payload is encrypted.
    ///
    /// Encrypted payloads are enumerable but extraction fails with
    /// [`Error::PasswordRequired`](crate::Error::PasswordRequired).
    pub is_encrypted: bool,

    /// Index in the archive's entry list.
    pub(crate) index: usize,
    /// The recorded size is the true size modulo 2^32 (gzip ISIZE).
    pub(crate) size_is_modular: bool,
    /// Payload offset. Absolute within the archive stream for directly
    /// addressable entries, or within the decoded run stream for run
    /// members.
    pub(crate) data_offset: Option<u64>,
    /// Index of the decode run this entry's payload lives in.
    pub(crate) run_id: Option<usize>,
    /// Position within the decode run, for run members.
    pub(crate) run_position: Option<usize>,
}

impl Entry {
    pub(crate) fn new(name: String, index: usize) -> Self {
        Self {
            name,
            is_directory: false,
            compressed_size: 0,
            uncompressed_size: None,
            compression: CompressionType::Store,
            last_modified: None,
            attributes: None,
            crc32: None,
            solid_group_id: None,
            is_encrypted: false,
            index,
            size_is_modular: false,
            data_offset: None,
            run_id: None,
            run_position: None,
        }
    }

    /// The hard output limit for this entry's decode. `None` when the
    /// recorded size cannot bound the output.
    pub(crate) fn decode_limit(&self) -> Option<u64> {
        if self.size_is_modular {
            None
        } else {
            self.uncompressed_size
        }
    }

    /// Checks a decoded byte count against the recorded size. Modular
    /// sizes compare only the low 32 bits.
    pub(crate) fn size_matches(&self, decoded: u64) -> bool {
        match self.uncompressed_size {
            None => true,
            Some(size) if self.size_is_modular => decoded & 0xFFFF_FFFF == size,
            Some(size) => decoded == size,
        }
    }

    /// Returns the full path within the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file name (last component of the path).
    pub fn file_name(&self) -> &str {
        self.name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
    }

    /// Returns true if this is a file (not a directory).
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }

    /// Returns this entry's index in the archive's entry order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns true if this entry is part of a solid run.
    pub fn is_solid(&self) -> bool {
        self.solid_group_id.is_some()
    }
}

/// A selector for filtering entries during extraction.
///
/// | Type | Behavior |
/// |------|----------|
/// | `()` | Selects all entries |
/// | [`SelectAll`] | Selects all entries (explicit) |
/// | `&[&str]` | Selects entries matching any of the paths |
/// | `Fn(&Entry) -> bool` | Custom predicate |
pub trait EntrySelector {
    /// Returns true if the entry should be selected.
    fn select(&self, entry: &Entry) -> bool;
}

/// Selector that matches all entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl EntrySelector for SelectAll {
    fn select(&self, _entry: &Entry) -> bool {
        true
    }
}

impl EntrySelector for () {
    fn select(&self, _entry: &Entry) -> bool {
        true
    }
}

impl<F: Fn(&Entry) -> bool> EntrySelector for F {
    fn select(&self, entry: &Entry) -> bool {
        self(entry)
    }
}

impl EntrySelector for &[&str] {
    fn select(&self, entry: &Entry) -> bool {
        self.iter().any(|name| entry.name == *name)
    }
}
