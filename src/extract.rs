//! The extraction engine.
//!
//! An [`Extractor`] borrows the archive's source stream and decodes entry
//! payloads through the codec layer. Directly addressable entries decode
//! independently in any order. Entries inside a decode run share one
//! compressed region: a full pass ([`Extractor::extract_all`]) decodes
//! each run exactly once front to back, while single-entry access
//! restarts the run's decoder and drains up to the requested member.
//!
//! Runs carry sequencing state across calls. A solid run enforces
//! container order for single-entry access, and a decode failure inside
//! it poisons every later member until the archive is reopened.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::codec::{self, Decoder};
use crate::destination::{self, Sink};
use crate::entry::{Entry, EntrySelector, SelectAll};
use crate::format::{ArchiveIndex, SolidRun};
use crate::options::ExtractionOptions;
use crate::{Error, READ_BUFFER_SIZE, Result};

/// Per-run sequencing state, held by the archive across extractor
/// lifetimes.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunState {
    /// Position within the run's member list that must decode next.
    pub(crate) next_position: usize,
    /// Entry index whose decode failure poisoned the run.
    pub(crate) poisoned_at: Option<usize>,
}

impl RunState {
    /// Returns true while a pass over this run has started but not
    /// finished. Poisoned runs are dead, not in progress.
    fn is_mid_pass(&self, run: &SolidRun) -> bool {
        self.poisoned_at.is_none()
            && self.next_position > 0
            && self.next_position < run.members.len()
    }
}

/// The result of extracting one entry during a pass.
#[derive(Debug)]
pub struct EntryOutcome {
    /// The entry's index in the archive.
    pub index: usize,
    /// The entry's archive-internal path.
    pub name: String,
    /// The written path, or why this entry failed.
    pub result: Result<PathBuf>,
}

/// Per-entry outcomes of an extraction pass.
///
/// A pass returns a summary instead of failing on the first bad entry:
/// collisions, checksum mismatches, and per-entry decode failures are
/// recorded here while sibling entries continue to extract. Only errors
/// that end the whole pass (cancellation, a poisoning failure inside a
/// solid run) surface as `Err` from the pass itself.
#[derive(Debug, Default)]
pub struct ExtractionSummary {
    /// One outcome per entry the pass attempted, in attempt order.
    pub outcomes: Vec<EntryOutcome>,
}

impl ExtractionSummary {
    /// Returns true if every attempted entry succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Returns the number of entries extracted successfully.
    pub fn extracted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Returns the number of entries that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.extracted()
    }

    /// Iterates over the failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    fn record(&mut self, entry: &Entry, result: Result<PathBuf>) {
        self.outcomes.push(EntryOutcome {
            index: entry.index,
            name: entry.name.clone(),
            result,
        });
    }
}

/// A chunked copy failure, classified by which side failed.
enum CopyError {
    /// The decoder rejected its input.
    Read(io::Error),
    /// The destination refused the output; `copied` bytes were consumed
    /// from the reader, including the chunk whose write failed.
    Write { error: io::Error, copied: u64 },
    /// The cancellation token fired between chunks.
    Cancelled,
}

/// Copies up to `limit` decoded bytes from `reader` to `writer`,
/// feeding `hasher` along the way and polling `cancel` between chunks.
///
/// Returns the byte count actually copied; a count short of the limit
/// means the decoded stream ended early.
fn copy_limited(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    limit: Option<u64>,
    mut hasher: Option<&mut crc32fast::Hasher>,
    cancel: &CancellationToken,
) -> std::result::Result<u64, CopyError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let want = match limit {
            Some(limit) => {
                let remaining = limit - copied;
                if remaining == 0 {
                    break;
                }
                buf.len().min(remaining as usize)
            }
            None => buf.len(),
        };
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        if let Some(h) = hasher.as_deref_mut() {
            h.update(&buf[..n]);
        }
        if let Err(error) = writer.write_all(&buf[..n]) {
            return Err(CopyError::Write {
                error,
                copied: copied + n as u64,
            });
        }
        copied += n as u64;
    }
    Ok(copied)
}

/// Discards exactly `amount` decoded bytes, failing if the stream ends
/// short.
fn drain(
    reader: &mut dyn Read,
    amount: u64,
    cancel: &CancellationToken,
) -> std::result::Result<(), CopyError> {
    let mut sink = Sink::new();
    let copied = copy_limited(reader, &mut sink, Some(amount), None, cancel)?;
    if copied != amount {
        return Err(CopyError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "decoded stream ended early",
        )));
    }
    Ok(())
}

/// Maps a mid-stream read failure onto the crate error, unwrapping a
/// crate error (a missing volume, for instance) that crossed the codec
/// boundary inside an `io::Error`.
fn read_failure(e: io::Error, index: usize, name: &str, method: &str) -> Error {
    match e.downcast::<Error>() {
        Ok(inner) => inner,
        Err(e) => Error::codec(index, Some(name.to_string()), method.to_string(), e.to_string()),
    }
}

/// Positions the source at a run's packed data and builds its decoder.
fn open_run_decoder<'s, R: Read + Seek + Send>(
    source: &'s mut R,
    run: &SolidRun,
) -> Result<Box<dyn Decoder + 's>> {
    source.seek(SeekFrom::Start(run.pack_offset))?;
    let input = source.take(run.pack_size);
    codec::build_decoder(input, run.method, &run.properties, run.unpacked_size)
}

/// Positions the source at a directly addressable entry's payload and
/// builds its decoder.
fn open_direct_decoder<'s, R: Read + Seek + Send>(
    source: &'s mut R,
    entry: &Entry,
) -> Result<Box<dyn Decoder + 's>> {
    let offset = entry.data_offset.ok_or_else(|| {
        Error::InvalidFormat(format!("entry {} has no payload location", entry.index))
    })?;
    source.seek(SeekFrom::Start(offset))?;
    let input = source.take(entry.compressed_size);
    let size = entry.decode_limit().unwrap_or(entry.compressed_size);
    codec::build_decoder(input, entry.compression, &[], size)
}

/// Why a single-entry decode failed, keeping setup failures apart from
/// mid-stream ones so the caller can poison solid runs correctly.
enum DecodeError {
    /// Seek or decoder construction failed; nothing was consumed.
    Setup(Error),
    /// The decoder rejected its input mid-stream.
    Decode(io::Error),
    /// The destination refused the output.
    Output(io::Error),
    /// Fewer bytes came out than the container declared.
    Truncated { copied: u64 },
    Cancelled,
}

impl From<CopyError> for DecodeError {
    fn from(e: CopyError) -> Self {
        match e {
            CopyError::Read(e) => DecodeError::Decode(e),
            CopyError::Write { error, .. } => DecodeError::Output(error),
            CopyError::Cancelled => DecodeError::Cancelled,
        }
    }
}

/// Decodes one entry's payload into `writer`.
///
/// For run members this restarts the run's decoder and drains the
/// leading bytes of earlier members before the entry's own payload.
fn decode_to_writer<R: Read + Seek + Send>(
    source: &mut R,
    runs: &[SolidRun],
    entry: &Entry,
    writer: &mut dyn Write,
    hasher: &mut crc32fast::Hasher,
    cancel: &CancellationToken,
) -> std::result::Result<u64, DecodeError> {
    let mut decoder = match entry.run_id {
        None => open_direct_decoder(source, entry).map_err(DecodeError::Setup)?,
        Some(run_id) => {
            let run = &runs[run_id];
            let mut decoder = open_run_decoder(source, run).map_err(DecodeError::Setup)?;
            let lead = entry.data_offset.unwrap_or(0);
            if lead > 0 {
                drain(decoder.as_mut(), lead, cancel)?;
            }
            decoder
        }
    };

    let copied = copy_limited(
        decoder.as_mut(),
        writer,
        entry.decode_limit(),
        Some(hasher),
        cancel,
    )?;
    if !entry.size_matches(copied) {
        return Err(DecodeError::Truncated { copied });
    }
    Ok(copied)
}

/// A live extraction handle over an opened archive.
///
/// Created by [`Archive::extractor`](crate::Archive::extractor). The
/// handle borrows the archive's stream exclusively; sequencing state for
/// decode runs persists on the archive between handles.
pub struct Extractor<'a, R: Read + Seek + Send> {
    source: &'a mut R,
    index: &'a ArchiveIndex,
    run_states: &'a mut Vec<RunState>,
    cancel: CancellationToken,
}

impl<'a, R: Read + Seek + Send> Extractor<'a, R> {
    pub(crate) fn new(
        source: &'a mut R,
        index: &'a ArchiveIndex,
        run_states: &'a mut Vec<RunState>,
    ) -> Self {
        Self {
            source,
            index,
            run_states,
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches a cancellation token. Cancellation is observed between
    /// entries and between decoded chunks within an entry; a cancelled
    /// operation removes its partial output before returning
    /// [`Error::Cancelled`].
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = token.clone();
        self
    }

    fn entry_checked(&self, index: usize) -> Result<Entry> {
        self.index.entries.get(index).cloned().ok_or_else(|| {
            Error::InvalidFormat(format!(
                "entry index {} out of range ({} entries)",
                index,
                self.index.entries.len()
            ))
        })
    }

    /// Enforces decode order for solid run members.
    fn check_sequence(&self, entry: &Entry) -> Result<()> {
        let (run_id, position) = match (entry.run_id, entry.run_position) {
            (Some(r), Some(p)) => (r, p),
            _ => return Ok(()),
        };
        let run = &self.index.runs[run_id];
        let state = &self.run_states[run_id];
        if let Some(failed_at) = state.poisoned_at {
            return Err(Error::SolidRunPoisoned {
                entry_index: entry.index,
                failed_at,
            });
        }
        if !run.is_solid() {
            return Ok(());
        }
        // A completed run may start a fresh pass from its first member.
        let fresh_restart = position == 0 && state.next_position == run.members.len();
        if position != state.next_position && !fresh_restart {
            let expected = if state.next_position < run.members.len() {
                run.members[state.next_position]
            } else {
                run.members[0]
            };
            return Err(Error::OutOfOrder {
                expected,
                requested: entry.index,
            });
        }
        Ok(())
    }

    fn advance(&mut self, entry: &Entry) {
        if let (Some(run_id), Some(position)) = (entry.run_id, entry.run_position) {
            if self.index.runs[run_id].is_solid() {
                self.run_states[run_id].next_position = position + 1;
            }
        }
    }

    fn poison(&mut self, entry: &Entry) {
        if let Some(run_id) = entry.run_id {
            if self.index.runs[run_id].is_solid() {
                self.run_states[run_id].poisoned_at = Some(entry.index);
            }
        }
    }

    /// Decodes one entry into `writer`, verifying size and checksum and
    /// updating run sequencing state.
    fn decode_entry(&mut self, entry: &Entry, writer: &mut dyn Write) -> Result<u64> {
        if entry.is_encrypted {
            return Err(Error::PasswordRequired);
        }
        self.check_sequence(entry)?;

        let mut hasher = crc32fast::Hasher::new();
        let decoded = decode_to_writer(
            &mut *self.source,
            &self.index.runs,
            entry,
            writer,
            &mut hasher,
            &self.cancel,
        );
        match decoded {
            Ok(copied) => {
                // The member's bytes are consumed either way, so the
                // stream stays aligned across a checksum failure.
                self.advance(entry);
                if let Some(expected) = entry.crc32 {
                    let actual = hasher.finalize();
                    if actual != expected {
                        return Err(Error::checksum_mismatch(
                            entry.index,
                            Some(entry.name.clone()),
                            expected,
                            actual,
                        ));
                    }
                }
                Ok(copied)
            }
            Err(DecodeError::Setup(e)) => Err(e),
            Err(DecodeError::Decode(e)) => {
                self.poison(entry);
                Err(read_failure(
                    e,
                    entry.index,
                    &entry.name,
                    &entry.compression.to_string(),
                ))
            }
            Err(DecodeError::Truncated { copied }) => {
                self.poison(entry);
                Err(Error::codec(
                    entry.index,
                    Some(entry.name.clone()),
                    entry.compression.to_string(),
                    format!(
                        "decoded {} of {} bytes",
                        copied,
                        entry.uncompressed_size.unwrap_or(0)
                    ),
                ))
            }
            Err(DecodeError::Output(e)) => Err(Error::Io(e)),
            Err(DecodeError::Cancelled) => Err(Error::Cancelled),
        }
    }

    /// Extracts a single entry to `root` and returns the written path.
    ///
    /// Directly addressable entries extract in any order. Solid run
    /// members must be requested in container order; each request
    /// restarts the run's decoder and discards the bytes of members that
    /// came before, so a full pass through
    /// [`extract_all`](Self::extract_all) is much cheaper for more than
    /// a handful of entries.
    pub fn extract_entry(
        &mut self,
        index: usize,
        root: &Path,
        options: &ExtractionOptions,
    ) -> Result<PathBuf> {
        let entry = self.entry_checked(index)?;
        if entry.is_directory {
            return destination::create_directory(&entry, root, options);
        }

        let prepared = destination::prepare_file(&entry, root, options)?;
        let mut file = prepared.file;
        let result = self
            .decode_entry(&entry, &mut file)
            .and_then(|n| {
                file.flush()?;
                Ok(n)
            });
        drop(file);
        match result {
            Ok(_) => {
                destination::finalize(&entry, &prepared.path, options);
                Ok(prepared.path)
            }
            Err(e) => {
                destination::discard_file(&prepared.path);
                Err(e)
            }
        }
    }

    /// Decodes a single entry into memory.
    ///
    /// The same sequencing rules as [`extract_entry`](Self::extract_entry)
    /// apply. Directory entries yield an empty buffer.
    pub fn read_entry(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self.entry_checked(index)?;
        if entry.is_directory {
            return Ok(Vec::new());
        }
        let mut buf = Vec::new();
        self.decode_entry(&entry, &mut buf)?;
        Ok(buf)
    }

    /// Advances past an entry without decoding it.
    ///
    /// For solid run members this consumes the entry's slot in the
    /// sequencing order so a later member can be requested. A no-op for
    /// everything else.
    pub fn skip_entry(&mut self, index: usize) -> Result<()> {
        let entry = self.entry_checked(index)?;
        self.check_sequence(&entry)?;
        self.advance(&entry);
        Ok(())
    }

    /// Extracts every entry to `root`.
    ///
    /// Equivalent to [`extract_entries`](Self::extract_entries) with a
    /// select-all filter.
    pub fn extract_all(
        &mut self,
        root: &Path,
        options: &ExtractionOptions,
    ) -> Result<ExtractionSummary> {
        self.extract_entries(SelectAll, root, options)
    }

    /// Extracts the selected entries to `root` in one pass.
    ///
    /// Each decode run is decoded exactly once front to back; unselected
    /// members inside a run are decoded and discarded to keep the
    /// decoder aligned. Per-entry failures (collisions, checksum
    /// mismatches, decode failures of independent entries) are recorded
    /// in the summary while the pass continues. Cancellation and decode
    /// failures inside solid runs end the pass with an error.
    ///
    /// Starting a pass while a run is mid-sequence from single-entry
    /// access fails with [`Error::ExtractionInProgress`].
    pub fn extract_entries<S: EntrySelector>(
        &mut self,
        selector: S,
        root: &Path,
        options: &ExtractionOptions,
    ) -> Result<ExtractionSummary> {
        for (run_id, run) in self.index.runs.iter().enumerate() {
            if self.run_states[run_id].is_mid_pass(run) {
                return Err(Error::ExtractionInProgress);
            }
        }
        self.cancel.check()?;

        let selected: Vec<bool> = self
            .index
            .entries
            .iter()
            .map(|e| selector.select(e))
            .collect();
        let mut summary = ExtractionSummary::default();

        // Directories first so nested files land inside them. With flat
        // extraction there is no structure to recreate.
        if options.extract_full_path {
            for entry in &self.index.entries {
                if entry.is_directory && selected[entry.index] {
                    let result = destination::create_directory(entry, root, options);
                    summary.record(entry, result);
                }
            }
        }

        let direct: Vec<usize> = self
            .index
            .entries
            .iter()
            .filter(|e| !e.is_directory && e.run_id.is_none() && selected[e.index])
            .map(|e| e.index)
            .collect();
        for index in direct {
            let entry = self.index.entries[index].clone();
            match self.extract_entry(index, root, options) {
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                result => summary.record(&entry, result),
            }
        }

        for run_id in 0..self.index.runs.len() {
            let run = &self.index.runs[run_id];
            if !run.members.iter().any(|&m| selected[m]) {
                continue;
            }
            extract_run(
                &mut *self.source,
                run,
                &self.index.entries,
                &mut self.run_states[run_id],
                &selected,
                root,
                options,
                &self.cancel,
                &mut summary,
            )?;
        }

        log::debug!(
            "Extraction pass finished: {} extracted, {} failed",
            summary.extracted(),
            summary.failed()
        );
        Ok(summary)
    }
}

/// Decodes one run front to back, writing selected members and
/// discarding the rest.
#[allow(clippy::too_many_arguments)]
fn extract_run<R: Read + Seek + Send>(
    source: &mut R,
    run: &SolidRun,
    entries: &[Entry],
    state: &mut RunState,
    selected: &[bool],
    root: &Path,
    options: &ExtractionOptions,
    cancel: &CancellationToken,
    summary: &mut ExtractionSummary,
) -> Result<()> {
    if let Some(failed_at) = state.poisoned_at {
        for &member in &run.members {
            if selected[member] {
                summary.record(
                    &entries[member],
                    Err(Error::SolidRunPoisoned {
                        entry_index: member,
                        failed_at,
                    }),
                );
            }
        }
        return Ok(());
    }

    // An encrypted run cannot be decoded at all.
    if run.members.iter().any(|&m| entries[m].is_encrypted) {
        for &member in &run.members {
            if selected[member] {
                summary.record(&entries[member], Err(Error::PasswordRequired));
            }
        }
        return Ok(());
    }

    state.next_position = 0;
    let mut decoder = match open_run_decoder(source, run) {
        Ok(d) => d,
        Err(e) if e.is_io_error() => return Err(e),
        Err(e) => {
            let reason = e.to_string();
            for &member in &run.members {
                if selected[member] {
                    let entry = &entries[member];
                    summary.record(
                        entry,
                        Err(Error::codec(
                            member,
                            Some(entry.name.clone()),
                            run.method.to_string(),
                            reason.clone(),
                        )),
                    );
                }
            }
            return Ok(());
        }
    };

    let mut decoded_pos = 0u64;
    for (position, &member) in run.members.iter().enumerate() {
        state.next_position = position;
        if cancel.is_cancelled() {
            state.next_position = 0;
            return Err(Error::Cancelled);
        }

        let entry = &entries[member];

        // Framing bytes between the previous member and this one (tar
        // headers inside a compressed stream, for example) must be
        // consumed before the member's own payload starts.
        let lead = entry.data_offset.unwrap_or(decoded_pos);
        if lead < decoded_pos {
            let err = Error::codec(
                member,
                Some(entry.name.clone()),
                run.method.to_string(),
                "member payload overlaps the previous member",
            );
            if run.is_solid() {
                state.poisoned_at = Some(member);
                return Err(err);
            }
            if selected[member] {
                summary.record(entry, Err(err));
            }
            state.next_position = position + 1;
            continue;
        }
        if lead > decoded_pos {
            match drain(decoder.as_mut(), lead - decoded_pos, cancel) {
                Ok(()) => {}
                Err(CopyError::Cancelled) => {
                    state.next_position = 0;
                    return Err(Error::Cancelled);
                }
                Err(CopyError::Read(e)) | Err(CopyError::Write { error: e, .. }) => {
                    let err = read_failure(e, member, &entry.name, &run.method.to_string());
                    if run.is_solid() {
                        state.poisoned_at = Some(member);
                        return Err(err);
                    }
                    if selected[member] {
                        summary.record(entry, Err(err));
                    }
                    state.next_position = position + 1;
                    continue;
                }
            }
        }
        decoded_pos = lead;

        let size = if entry.is_directory {
            Some(0)
        } else {
            entry.decode_limit()
        };

        let mut prepared = None;
        if selected[member] && !entry.is_directory {
            match destination::prepare_file(entry, root, options) {
                Ok(p) => prepared = Some(p),
                // The member's bytes still get drained below so the
                // decoder stays aligned for later members.
                Err(e) => summary.record(entry, Err(e)),
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        let mut sink = Sink::new();
        let copy_result = match prepared.as_mut() {
            Some(p) => copy_limited(decoder.as_mut(), &mut p.file, size, Some(&mut hasher), cancel),
            None => copy_limited(decoder.as_mut(), &mut sink, size, None, cancel),
        };

        match copy_result {
            Ok(copied) => {
                decoded_pos += copied;
                if !entry.is_directory && !entry.size_matches(copied) {
                    if let Some(p) = prepared.take() {
                        drop(p.file);
                        destination::discard_file(&p.path);
                    }
                    let err = Error::codec(
                        member,
                        Some(entry.name.clone()),
                        run.method.to_string(),
                        format!(
                            "decoded {} of {} bytes",
                            copied,
                            entry.uncompressed_size.unwrap_or(0)
                        ),
                    );
                    if run.is_solid() {
                        state.poisoned_at = Some(member);
                        return Err(err);
                    }
                    summary.record(entry, Err(err));
                    state.next_position = position + 1;
                    continue;
                }

                if let Some(p) = prepared.take() {
                    let mut file = p.file;
                    let path = p.path;
                    let crc_ok = match entry.crc32 {
                        Some(expected) => {
                            let actual = hasher.finalize();
                            if actual != expected {
                                summary.record(
                                    entry,
                                    Err(Error::checksum_mismatch(
                                        member,
                                        Some(entry.name.clone()),
                                        expected,
                                        actual,
                                    )),
                                );
                                false
                            } else {
                                true
                            }
                        }
                        None => true,
                    };
                    if !crc_ok {
                        drop(file);
                        destination::discard_file(&path);
                    } else if let Err(e) = file.flush() {
                        drop(file);
                        destination::discard_file(&path);
                        summary.record(entry, Err(Error::Io(e)));
                    } else {
                        drop(file);
                        destination::finalize(entry, &path, options);
                        summary.record(entry, Ok(path));
                    }
                }
                state.next_position = position + 1;
            }
            Err(CopyError::Cancelled) => {
                if let Some(p) = prepared.take() {
                    drop(p.file);
                    destination::discard_file(&p.path);
                }
                state.next_position = 0;
                return Err(Error::Cancelled);
            }
            Err(CopyError::Read(e)) => {
                if let Some(p) = prepared.take() {
                    drop(p.file);
                    destination::discard_file(&p.path);
                }
                let err = read_failure(e, member, &entry.name, &run.method.to_string());
                if run.is_solid() {
                    state.poisoned_at = Some(member);
                    return Err(err);
                }
                summary.record(entry, Err(err));
                state.next_position = position + 1;
            }
            Err(CopyError::Write { error, copied }) => {
                if let Some(p) = prepared.take() {
                    drop(p.file);
                    destination::discard_file(&p.path);
                }
                summary.record(entry, Err(Error::Io(error)));
                decoded_pos += copied;
                // The destination failed, not the decoder. Drain what is
                // left of the member so later members stay reachable.
                if let Some(expected_size) = size {
                    match drain(decoder.as_mut(), expected_size - copied, cancel) {
                        Ok(()) => decoded_pos = lead + expected_size,
                        Err(CopyError::Cancelled) => {
                            state.next_position = 0;
                            return Err(Error::Cancelled);
                        }
                        Err(CopyError::Read(e)) | Err(CopyError::Write { error: e, .. }) => {
                            let err = read_failure(e, member, &entry.name, &run.method.to_string());
                            if run.is_solid() {
                                state.poisoned_at = Some(member);
                                return Err(err);
                            }
                        }
                    }
                }
                state.next_position = position + 1;
            }
        }
    }
    state.next_position = run.members.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CompressionType;
    use crate::format::Capabilities;
    use crate::sniff::FormatKind;
    use std::fs;
    use std::io::Cursor;

    fn file_entry(name: &str, index: usize, data: &[u8]) -> Entry {
        let mut e = Entry::new(name.into(), index);
        e.compressed_size = data.len() as u64;
        e.uncompressed_size = Some(data.len() as u64);
        e.crc32 = Some(crc32fast::hash(data));
        e
    }

    /// Two independent stored entries back to back.
    fn direct_index() -> (Cursor<Vec<u8>>, ArchiveIndex, Vec<RunState>) {
        let data = b"first payloadsecond one".to_vec();
        let mut a = file_entry("a.txt", 0, b"first payload");
        a.data_offset = Some(0);
        let mut b = file_entry("sub/b.txt", 1, b"second one");
        b.data_offset = Some(13);

        let index = ArchiveIndex {
            format: FormatKind::Zip,
            entries: vec![a, b],
            runs: Vec::new(),
            capabilities: Capabilities {
                random_access: true,
                concurrent_reads: true,
            },
        };
        (Cursor::new(data), index, Vec::new())
    }

    /// One solid run whose decoded stream is the concatenation of two
    /// member payloads.
    fn solid_index() -> (Cursor<Vec<u8>>, ArchiveIndex, Vec<RunState>) {
        let data = b"aaaabbbbbb".to_vec();
        let mut a = file_entry("a.txt", 0, b"aaaa");
        a.compressed_size = 10;
        a.data_offset = Some(0);
        a.run_id = Some(0);
        a.run_position = Some(0);
        a.solid_group_id = Some(0);
        let mut b = file_entry("b.txt", 1, b"bbbbbb");
        b.compressed_size = 0;
        b.data_offset = Some(4);
        b.run_id = Some(0);
        b.run_position = Some(1);
        b.solid_group_id = Some(0);

        let run = SolidRun {
            pack_offset: 0,
            pack_size: 10,
            method: CompressionType::Store,
            properties: Vec::new(),
            unpacked_size: 10,
            members: vec![0, 1],
        };
        let index = ArchiveIndex {
            format: FormatKind::SevenZip,
            entries: vec![a, b],
            runs: vec![run],
            capabilities: Capabilities {
                random_access: true,
                concurrent_reads: false,
            },
        };
        (Cursor::new(data), index, vec![RunState::default()])
    }

    #[test]
    fn test_extract_entry_direct() {
        let (mut source, index, mut states) = direct_index();
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let path = ex
            .extract_entry(1, dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(path, dir.path().join("sub/b.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"second one");

        // Direct entries come out in any order.
        let path = ex
            .extract_entry(0, dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first payload");
    }

    #[test]
    fn test_read_entry() {
        let (mut source, index, mut states) = direct_index();
        let mut ex = Extractor::new(&mut source, &index, &mut states);
        assert_eq!(ex.read_entry(0).unwrap(), b"first payload");
    }

    #[test]
    fn test_read_entry_out_of_range() {
        let (mut source, index, mut states) = direct_index();
        let mut ex = Extractor::new(&mut source, &index, &mut states);
        assert!(matches!(ex.read_entry(9), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_solid_enforces_order() {
        let (mut source, index, mut states) = solid_index();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let err = ex.read_entry(1).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrder {
                expected: 0,
                requested: 1
            }
        ));

        assert_eq!(ex.read_entry(0).unwrap(), b"aaaa");
        assert_eq!(ex.read_entry(1).unwrap(), b"bbbbbb");

        // A finished run restarts from its first member.
        assert_eq!(ex.read_entry(0).unwrap(), b"aaaa");
    }

    #[test]
    fn test_skip_entry_advances_run() {
        let (mut source, index, mut states) = solid_index();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        ex.skip_entry(0).unwrap();
        assert_eq!(ex.read_entry(1).unwrap(), b"bbbbbb");
    }

    #[test]
    fn test_extract_all_solid() {
        let (mut source, index, mut states) = solid_index();
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.extracted(), 2);
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"aaaa");
        assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"bbbbbb");
    }

    #[test]
    fn test_extract_entries_selector_drains_unselected() {
        let (mut source, index, mut states) = solid_index();
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let names: &[&str] = &["b.txt"];
        let summary = ex
            .extract_entries(names, dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.is_complete());
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"bbbbbb");
    }

    #[test]
    fn test_checksum_mismatch_discards_file() {
        let (mut source, mut index, mut states) = direct_index();
        index.entries[0].crc32 = Some(0xDEADBEEF);
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let err = ex
            .extract_entry(0, dir.path(), &ExtractionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_extract_all_records_per_entry_failures() {
        let (mut source, mut index, mut states) = direct_index();
        index.entries[0].crc32 = Some(0xDEADBEEF);
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.extracted(), 1);
        assert_eq!(summary.failed(), 1);
        let failure = summary.failures().next().unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(fs::read(dir.path().join("sub/b.txt")).unwrap(), b"second one");
    }

    #[test]
    fn test_truncated_solid_run_poisons() {
        let (mut source, mut index, mut states) = solid_index();
        // Declare more bytes than the run can produce.
        index.entries[1].uncompressed_size = Some(100);
        index.runs[0].unpacked_size = 104;
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let err = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Codec { entry_index: 1, .. }));
        assert!(!dir.path().join("b.txt").exists());

        // Every member of the poisoned run is now unavailable.
        let err = ex.read_entry(0).unwrap_err();
        assert!(matches!(err, Error::SolidRunPoisoned { failed_at: 1, .. }));
        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::new().overwrite(true))
            .unwrap();
        assert_eq!(summary.extracted(), 0);
        assert!(summary.failures().all(|o| matches!(
            o.result,
            Err(Error::SolidRunPoisoned { failed_at: 1, .. })
        )));
    }

    #[test]
    fn test_cancelled_before_pass() {
        let (mut source, index, mut states) = solid_index();
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let mut ex = Extractor::new(&mut source, &index, &mut states).with_cancellation(&token);

        let err = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_mid_sequence_blocks_full_pass() {
        let (mut source, index, mut states) = solid_index();
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        ex.extract_entry(0, dir.path(), &ExtractionOptions::default())
            .unwrap();
        let err = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionInProgress));

        // Completing the run in order unblocks the next pass.
        ex.skip_entry(1).unwrap();
        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::new().overwrite(true))
            .unwrap();
        assert!(summary.is_complete());
    }

    #[test]
    fn test_collision_keeps_run_aligned() {
        let (mut source, index, mut states) = solid_index();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"already here").unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.extracted(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(matches!(
            summary.failures().next().unwrap().result,
            Err(Error::Collision { .. })
        ));
        // The later member still decoded to the right bytes.
        assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"bbbbbb");
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"already here");
    }

    #[test]
    fn test_encrypted_entry_requires_password() {
        let (mut source, mut index, mut states) = direct_index();
        index.entries[0].is_encrypted = true;
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let err = ex.read_entry(0).unwrap_err();
        assert!(matches!(err, Error::PasswordRequired));

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.extracted(), 1);
        assert!(matches!(
            summary.failures().next().unwrap().result,
            Err(Error::PasswordRequired)
        ));
    }

    /// One run whose decoded stream interleaves member payloads with
    /// framing bytes, the way a tar stream inside gzip does.
    fn gapped_index() -> (Cursor<Vec<u8>>, ArchiveIndex, Vec<RunState>) {
        let data = b"XXXXaaaaYYYYbbbbbb".to_vec();
        let mut a = file_entry("a.txt", 0, b"aaaa");
        a.compressed_size = 0;
        a.data_offset = Some(4);
        a.run_id = Some(0);
        a.run_position = Some(0);
        a.solid_group_id = Some(0);
        let mut b = file_entry("b.txt", 1, b"bbbbbb");
        b.compressed_size = 0;
        b.data_offset = Some(12);
        b.run_id = Some(0);
        b.run_position = Some(1);
        b.solid_group_id = Some(0);

        let run = SolidRun {
            pack_offset: 0,
            pack_size: 18,
            method: CompressionType::Store,
            properties: Vec::new(),
            unpacked_size: 18,
            members: vec![0, 1],
        };
        let index = ArchiveIndex {
            format: FormatKind::Gzip,
            entries: vec![a, b],
            runs: vec![run],
            capabilities: Capabilities {
                random_access: true,
                concurrent_reads: false,
            },
        };
        (Cursor::new(data), index, vec![RunState::default()])
    }

    #[test]
    fn test_extract_all_skips_member_framing() {
        let (mut source, index, mut states) = gapped_index();
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert!(summary.is_complete());
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"aaaa");
        assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"bbbbbb");
    }

    #[test]
    fn test_collision_still_drains_member_framing() {
        let (mut source, index, mut states) = gapped_index();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"already here").unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.extracted(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"bbbbbb");
    }

    struct RejectingWriter;

    impl Write for RejectingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_counts_consumed_bytes() {
        let mut reader: &[u8] = b"0123456789";
        let mut writer = RejectingWriter;
        let err = copy_limited(
            &mut reader,
            &mut writer,
            Some(10),
            None,
            &CancellationToken::new(),
        )
        .unwrap_err();
        match err {
            CopyError::Write { copied, .. } => assert_eq!(copied, 10),
            _ => panic!("expected a write failure"),
        }
        // Everything handed to the failed writer left the reader.
        assert!(reader.is_empty());
    }

    #[test]
    fn test_modular_size_checks_low_bits_only() {
        let (mut source, mut index, mut states) = direct_index();
        index.entries[0].size_is_modular = true;
        let mut ex = Extractor::new(&mut source, &index, &mut states);
        assert_eq!(ex.read_entry(0).unwrap(), b"first payload");
    }

    #[test]
    fn test_modular_size_mismatch_is_codec_error() {
        let (mut source, mut index, mut states) = direct_index();
        // The payload is 13 bytes; a recorded length of 12 cannot be the
        // true length modulo 2^32.
        index.entries[0].size_is_modular = true;
        index.entries[0].uncompressed_size = Some(12);
        index.entries[0].crc32 = None;
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let err = ex.read_entry(0).unwrap_err();
        assert!(matches!(err, Error::Codec { entry_index: 0, .. }));
    }

    #[test]
    fn test_unsupported_method_recorded_per_member() {
        let (mut source, mut index, mut states) = solid_index();
        index.runs[0].method = CompressionType::Rar;
        let dir = tempfile::tempdir().unwrap();
        let mut ex = Extractor::new(&mut source, &index, &mut states);

        let summary = ex
            .extract_all(dir.path(), &ExtractionOptions::default())
            .unwrap();
        assert_eq!(summary.extracted(), 0);
        assert_eq!(summary.failed(), 2);
        assert!(summary.failures().all(|o| matches!(o.result, Err(Error::Codec { .. }))));
    }
}
