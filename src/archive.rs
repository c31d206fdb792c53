//! Opening archives and the [`Archive`] handle.
//!
//! An [`Archive`] wraps any `Read + Seek` source, detects its container
//! format, and parses its index up front. Entry metadata lives on the
//! archive; decoded content comes from an [`Extractor`] borrowed through
//! [`Archive::extractor`].
//!
//! File-backed archives go through [`Archive::open_path`], which also
//! recognizes numbered split sets (`backup.zip.001`, `backup.zip.002`,
//! ...) and stitches them into one logical stream.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::entry::Entry;
use crate::extract::{Extractor, RunState};
use crate::format::{self, ArchiveIndex, Capabilities};
use crate::options::OpenOptions;
use crate::sniff::{self, FormatKind};
use crate::volume::MultiVolumeReader;
use crate::{Error, Result};

/// Where an archive's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceKind {
    /// A caller-supplied stream.
    Stream,
    /// A single file on disk.
    File,
    /// A numbered split set on disk.
    MultiVolume,
}

/// A file-backed archive source: one file or a split set.
///
/// Produced by [`Archive::open_path`]; callers normally never construct
/// one directly.
pub enum FileSource {
    /// A single file.
    Single(BufReader<File>),
    /// A numbered split set presented as one logical stream.
    Multi(MultiVolumeReader),
}

impl FileSource {
    fn open(path: &Path) -> Result<(Self, SourceKind)> {
        if MultiVolumeReader::is_volume_path(path) {
            let reader = MultiVolumeReader::open(path)?;
            return Ok((FileSource::Multi(reader), SourceKind::MultiVolume));
        }

        // A base path with a .001 sibling names a split set.
        let mut first_part = path.as_os_str().to_owned();
        first_part.push(".001");
        if Path::new(&first_part).exists() {
            let reader = MultiVolumeReader::open(path)?;
            return Ok((FileSource::Multi(reader), SourceKind::MultiVolume));
        }

        let file = File::open(path)?;
        Ok((FileSource::Single(BufReader::new(file)), SourceKind::File))
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileSource::Single(r) => r.read(buf),
            FileSource::Multi(r) => r.read(buf),
        }
    }
}

impl Seek for FileSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            FileSource::Single(r) => r.seek(pos),
            FileSource::Multi(r) => r.seek(pos),
        }
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Single(_) => f.write_str("FileSource::Single"),
            FileSource::Multi(r) => write!(f, "FileSource::Multi({:?})", r),
        }
    }
}

/// An opened archive: detected format, parsed entry index, and the
/// source stream the payloads decode from.
///
/// # Example
///
/// ```rust,no_run
/// use unarc::{Archive, ExtractionOptions};
/// use std::path::Path;
///
/// # fn main() -> unarc::Result<()> {
/// let mut archive = Archive::open_path("backup.7z")?;
/// for entry in archive.entries() {
///     println!("{:>10}  {}", entry.uncompressed_size.unwrap_or(0), entry.name());
/// }
/// archive
///     .extractor()?
///     .extract_all(Path::new("restored"), &ExtractionOptions::default())?;
/// # Ok(())
/// # }
/// ```
pub struct Archive<R: Read + Seek> {
    source: Option<R>,
    index: ArchiveIndex,
    run_states: Vec<RunState>,
    kind: SourceKind,
    leave_open: bool,
    closed: bool,
}

impl<R: Read + Seek> Archive<R> {
    /// Opens an archive from a stream with default options.
    ///
    /// The format is detected from the leading signature bytes.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFormat`] when no signature matches; format-class
    /// errors when the container's structure does not parse.
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with(reader, OpenOptions::default())
    }

    /// Opens an archive from a stream.
    pub fn open_with(reader: R, options: OpenOptions) -> Result<Self> {
        Self::from_source(reader, SourceKind::Stream, None, options)
    }

    fn from_source(
        mut reader: R,
        kind: SourceKind,
        hint: Option<&Path>,
        options: OpenOptions,
    ) -> Result<Self> {
        let format = sniff::detect_with_hint(&mut reader, hint)?.ok_or(Error::UnknownFormat)?;
        let mut index = format::read_index(&mut reader, format, &options)?;

        // A split set shares one seek cursor across parts.
        if kind == SourceKind::MultiVolume {
            index.capabilities.concurrent_reads = false;
        }

        log::debug!(
            "Opened {} archive: {} entries, {} decode runs",
            format,
            index.entries.len(),
            index.runs.len()
        );

        let run_states = vec![RunState::default(); index.runs.len()];
        Ok(Self {
            source: Some(reader),
            index,
            run_states,
            kind,
            leave_open: options.leave_open,
            closed: false,
        })
    }

    /// Returns all entries in archive order.
    pub fn entries(&self) -> &[Entry] {
        &self.index.entries
    }

    /// Returns the entry at `index`, if it exists.
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.index.entries.get(index)
    }

    /// Returns the detected container format.
    pub fn format(&self) -> FormatKind {
        self.index.format
    }

    /// Returns true if any entries share decoder state and must be
    /// extracted in order.
    pub fn is_solid(&self) -> bool {
        self.index.is_solid()
    }

    /// Returns what this archive supports.
    pub fn capabilities(&self) -> Capabilities {
        self.index.capabilities
    }

    /// Returns where this archive's bytes come from.
    pub fn source_kind(&self) -> SourceKind {
        self.kind
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the archive. Always succeeds; closing twice is a no-op.
    ///
    /// The source stream is released unless the archive was opened with
    /// [`OpenOptions::leave_open`], in which case it stays available
    /// through [`into_inner`](Self::into_inner). Entry metadata remains
    /// readable; extraction fails with [`Error::ArchiveClosed`].
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if !self.leave_open {
                self.source = None;
            }
            log::debug!("Archive closed");
        }
        Ok(())
    }

    /// Consumes the archive and hands back the source stream, if it is
    /// still held.
    pub fn into_inner(self) -> Option<R> {
        self.source
    }

    /// Borrows an extraction handle over this archive.
    ///
    /// # Errors
    ///
    /// [`Error::ArchiveClosed`] after [`close`](Self::close).
    pub fn extractor(&mut self) -> Result<Extractor<'_, R>>
    where
        R: Send,
    {
        if self.closed {
            return Err(Error::ArchiveClosed);
        }
        let source = self.source.as_mut().ok_or(Error::ArchiveClosed)?;
        Ok(Extractor::new(source, &self.index, &mut self.run_states))
    }
}

impl Archive<FileSource> {
    /// Opens an archive file with default options.
    ///
    /// Recognizes numbered split sets: both `backup.zip.001` and the
    /// bare `backup.zip` (when a `.001` sibling exists) open the whole
    /// set as one logical stream. Format detection falls back to the
    /// file extension for signatureless containers such as pre-POSIX
    /// tar.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with(path, OpenOptions::default())
    }

    /// Opens an archive file.
    pub fn open_path_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let (source, kind) = FileSource::open(path)?;
        if let FileSource::Multi(reader) = &source {
            log::debug!(
                "Split set at '{}': {} parts, {} bytes",
                path.display(),
                reader.volume_count(),
                reader.total_size()
            );
        }
        Archive::from_source(source, kind, Some(path), options)
    }
}

impl<R: Read + Seek> std::fmt::Debug for Archive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("format", &self.index.format)
            .field("entries", &self.index.entries.len())
            .field("runs", &self.index.runs.len())
            .field("kind", &self.kind)
            .field("closed", &self.closed)
            .finish()
    }
}
