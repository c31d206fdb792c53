//! Container format drivers.
//!
//! Each driver parses one container's headers into the shared
//! [`ArchiveIndex`] model: a flat entry list plus the decode runs their
//! payloads live in. Drivers only describe where payloads are and how
//! they are compressed; decoding itself happens in the extraction engine
//! through the codec layer.

pub(crate) mod rar;
pub(crate) mod sevenz;
pub(crate) mod stream;
pub(crate) mod tar;
pub(crate) mod zip;

use std::io::{self, Read, Seek};

use crate::Result;
use crate::entry::{CompressionType, Entry};
use crate::options::OpenOptions;
use crate::sniff::FormatKind;

/// What an opened archive supports.
///
/// This struct is marked `#[non_exhaustive]`; construct it through
/// [`Archive::capabilities`](crate::Archive::capabilities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Capabilities {
    /// Entries can be extracted in any order.
    ///
    /// False for streamed wrappers and for archives whose entries all sit
    /// in solid runs.
    pub random_access: bool,
    /// Independent entries could be read concurrently from separate
    /// handles on the same file.
    ///
    /// Advisory. The archive itself holds a single stream; the flag says
    /// whether per-entry decode state is independent.
    pub concurrent_reads: bool,
}

/// One decode run: a contiguous packed region that decodes to the
/// payloads of one or more entries.
///
/// Every 7z folder and every compressed stream wrapper is a run. A run
/// with more than one member is solid: members share decoder state and
/// must be decoded in `members` order.
#[derive(Debug, Clone)]
pub(crate) struct SolidRun {
    /// Absolute offset of the packed data in the archive stream.
    pub pack_offset: u64,
    /// Size of the packed data in bytes.
    pub pack_size: u64,
    /// Compression method of the run.
    pub method: CompressionType,
    /// Container-native codec properties.
    pub properties: Vec<u8>,
    /// Total decoded size of the run.
    pub unpacked_size: u64,
    /// Entry indices in decode order.
    pub members: Vec<usize>,
}

impl SolidRun {
    /// Returns true when members share decoder state.
    pub fn is_solid(&self) -> bool {
        self.members.len() > 1
    }
}

/// The parsed shape of an archive: entries, decode runs, capabilities.
#[derive(Debug)]
pub(crate) struct ArchiveIndex {
    /// The container format.
    pub format: FormatKind,
    /// All entries in archive order.
    pub entries: Vec<Entry>,
    /// Decode runs referenced by entries' `run_id`.
    pub runs: Vec<SolidRun>,
    /// What this archive supports.
    pub capabilities: Capabilities,
}

impl ArchiveIndex {
    /// Returns true if any run is solid.
    pub fn is_solid(&self) -> bool {
        self.runs.iter().any(|r| r.is_solid())
    }
}

/// Parses the archive at the reader's start into an index.
///
/// The dispatch is closed: every supported format has a driver here, and
/// an unrecognized [`FormatKind`] cannot reach this point because the
/// sniffer produced it.
pub(crate) fn read_index<R: Read + Seek>(
    reader: &mut R,
    format: FormatKind,
    options: &OpenOptions,
) -> Result<ArchiveIndex> {
    match format {
        FormatKind::SevenZip => sevenz::read_index(reader, options),
        FormatKind::Zip => zip::read_index(reader),
        FormatKind::Tar => tar::read_index(reader),
        FormatKind::Rar | FormatKind::Rar5 => rar::read_index(reader, format),
        FormatKind::Gzip | FormatKind::Bzip2 => stream::read_index(reader, format),
    }
}

pub(crate) fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16_le<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads an exact number of bytes into a new vector.
pub(crate) fn read_bytes<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
