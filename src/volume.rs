//! Multi-volume archive reader.
//!
//! Split archives store one logical byte stream across numbered part
//! files (`archive.7z.001`, `archive.7z.002`, ...). [`MultiVolumeReader`]
//! presents the parts as a single `Read + Seek` stream, opening each part
//! lazily on first access. A part that disappears between enumeration and
//! access surfaces as [`Error::VolumeMissing`](crate::Error::VolumeMissing).

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A reader that spans the numbered parts of a split archive.
///
/// The logical stream is the concatenation of all parts in order. Reads
/// cross part boundaries transparently; seeks map the logical position
/// back to a part and an offset within it.
pub struct MultiVolumeReader {
    /// Part file handles, opened lazily.
    volumes: Vec<Option<BufReader<File>>>,
    /// Size of each part in bytes.
    volume_sizes: Vec<u64>,
    /// Base path without the numeric suffix.
    base_path: PathBuf,
    /// Current position in the logical stream.
    position: u64,
    /// Current part index (0-based).
    current_volume: usize,
    /// Position within the current part.
    volume_position: u64,
    /// Total size across all parts.
    total_size: u64,
}

impl MultiVolumeReader {
    /// Opens a split archive.
    ///
    /// Accepts the path to any numbered part (`archive.7z.001`) or the
    /// base path (`archive.7z`, when `archive.7z.001` exists). All parts
    /// are discovered by probing consecutive numbers from `.001`.
    ///
    /// # Errors
    ///
    /// Returns an error if no part files are found or the path does not
    /// look like a split set.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let base_path = Self::detect_base_path(path)?;
        let (volume_sizes, total_size) = Self::detect_volumes(&base_path)?;

        if volume_sizes.is_empty() {
            return Err(Error::InvalidFormat("no volume files found".to_string()));
        }

        let volumes = (0..volume_sizes.len()).map(|_| None).collect();

        Ok(Self {
            volumes,
            volume_sizes,
            base_path,
            position: 0,
            current_volume: 0,
            volume_position: 0,
            total_size,
        })
    }

    /// Returns true if the path carries an all-digit split suffix.
    pub fn is_volume_path(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Strips the numeric suffix, or probes for a `.001` sibling when the
    /// path has none.
    fn detect_base_path(path: &Path) -> Result<PathBuf> {
        if Self::is_volume_path(path) {
            return Ok(path.with_extension(""));
        }

        // A base path counts as a split set only when its first part exists.
        let first = Self::volume_path_for(path, 1);
        if first.exists() {
            return Ok(path.to_path_buf());
        }

        Err(Error::InvalidFormat(format!(
            "not a split archive (no {} found)",
            first.display()
        )))
    }

    /// Probes consecutive part numbers and records their sizes.
    fn detect_volumes(base_path: &Path) -> Result<(Vec<u64>, u64)> {
        let mut sizes = Vec::new();
        let mut total = 0u64;
        let mut volume_num = 1u32;

        loop {
            let volume_path = Self::volume_path_for(base_path, volume_num);
            match std::fs::metadata(&volume_path) {
                Ok(meta) => {
                    sizes.push(meta.len());
                    total += meta.len();
                    volume_num += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok((sizes, total))
    }

    fn volume_path_for(base: &Path, num: u32) -> PathBuf {
        let mut path = base.as_os_str().to_owned();
        path.push(format!(".{num:03}"));
        PathBuf::from(path)
    }

    /// Opens a part file lazily.
    fn open_volume(&mut self, index: usize) -> Result<&mut BufReader<File>> {
        if self.volumes[index].is_none() {
            let path = Self::volume_path_for(&self.base_path, (index + 1) as u32);
            let file = File::open(&path).map_err(|e| Error::VolumeMissing {
                volume: (index + 1) as u32,
                path: path.to_string_lossy().to_string(),
                source: e,
            })?;
            self.volumes[index] = Some(BufReader::new(file));
        }
        Ok(self.volumes[index].as_mut().unwrap())
    }

    /// Maps a logical position to a part index and offset within it.
    fn position_to_volume(&self, pos: u64) -> (usize, u64) {
        let mut remaining = pos;
        for (i, &size) in self.volume_sizes.iter().enumerate() {
            if remaining < size {
                return (i, remaining);
            }
            remaining -= size;
        }
        let last = self.volume_sizes.len().saturating_sub(1);
        (last, self.volume_sizes.get(last).copied().unwrap_or(0))
    }

    /// Returns the base path of the split set.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the number of parts.
    pub fn volume_count(&self) -> u32 {
        self.volume_sizes.len() as u32
    }

    /// Returns the size of each part in bytes.
    pub fn volume_sizes(&self) -> &[u64] {
        &self.volume_sizes
    }

    /// Returns the part the cursor currently sits in (1-indexed).
    pub fn current_volume(&self) -> u32 {
        (self.current_volume + 1) as u32
    }

    /// Returns the logical size across all parts.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

impl Read for MultiVolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.total_size {
            return Ok(0);
        }

        let mut buf_offset = 0;

        while buf_offset < buf.len() && self.position < self.total_size {
            let current_volume_size = self.volume_sizes[self.current_volume];
            let remaining_in_volume = current_volume_size - self.volume_position;

            if remaining_in_volume == 0 {
                self.current_volume += 1;
                self.volume_position = 0;
                if self.current_volume >= self.volumes.len() {
                    break;
                }
                continue;
            }

            let to_read = (buf.len() - buf_offset).min(remaining_in_volume as usize);
            let seek_pos = self.volume_position;
            let current_vol = self.current_volume;

            let volume = self.open_volume(current_vol).map_err(io::Error::other)?;
            volume.seek(SeekFrom::Start(seek_pos))?;

            let n = volume.read(&mut buf[buf_offset..buf_offset + to_read])?;
            if n == 0 {
                // Part shorter than its recorded size.
                break;
            }

            buf_offset += n;
            self.position += n as u64;
            self.volume_position += n as u64;
        }

        Ok(buf_offset)
    }
}

impl Seek for MultiVolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.total_size as i64 + p,
            SeekFrom::Current(p) => self.position as i64 + p,
        };

        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot seek before start of stream",
            ));
        }

        self.position = (new_pos as u64).min(self.total_size);

        let (vol_idx, vol_pos) = self.position_to_volume(self.position);
        self.current_volume = vol_idx;
        self.volume_position = vol_pos;

        Ok(self.position)
    }
}

impl std::fmt::Debug for MultiVolumeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiVolumeReader")
            .field("base_path", &self.base_path)
            .field("volume_count", &self.volume_sizes.len())
            .field("total_size", &self.total_size)
            .field("position", &self.position)
            .field("current_volume", &(self.current_volume + 1))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_volumes(dir: &Path, base_name: &str, sizes: &[usize]) -> PathBuf {
        let base_path = dir.join(base_name);
        for (i, &size) in sizes.iter().enumerate() {
            let volume_path = PathBuf::from(format!("{}.{:03}", base_path.display(), i + 1));
            let mut file = File::create(&volume_path).unwrap();
            let data: Vec<u8> = (0..size).map(|j| ((i * 7 + j) % 256) as u8).collect();
            file.write_all(&data).unwrap();
        }
        base_path
    }

    #[test]
    fn test_is_volume_path() {
        assert!(MultiVolumeReader::is_volume_path(Path::new(
            "archive.7z.001"
        )));
        assert!(MultiVolumeReader::is_volume_path(Path::new(
            "archive.zip.012"
        )));
        assert!(!MultiVolumeReader::is_volume_path(Path::new("archive.7z")));
        assert!(!MultiVolumeReader::is_volume_path(Path::new("archive.r01x")));
    }

    #[test]
    fn test_detect_base_path_from_part() {
        let result = MultiVolumeReader::detect_base_path(Path::new("archive.7z.001"));
        assert_eq!(result.unwrap(), PathBuf::from("archive.7z"));

        let result = MultiVolumeReader::detect_base_path(Path::new("/path/to/archive.7z.123"));
        assert_eq!(result.unwrap(), PathBuf::from("/path/to/archive.7z"));
    }

    #[test]
    fn test_volume_path_generation() {
        let base = PathBuf::from("test.7z");
        assert_eq!(
            MultiVolumeReader::volume_path_for(&base, 1),
            PathBuf::from("test.7z.001")
        );
        assert_eq!(
            MultiVolumeReader::volume_path_for(&base, 100),
            PathBuf::from("test.7z.100")
        );
    }

    #[test]
    fn test_open_split_set() {
        let dir = TempDir::new().unwrap();
        let base_path = create_test_volumes(dir.path(), "test.7z", &[100, 100, 50]);

        let reader = MultiVolumeReader::open(format!("{}.001", base_path.display())).unwrap();

        assert_eq!(reader.volume_count(), 3);
        assert_eq!(reader.volume_sizes(), &[100, 100, 50]);
        assert_eq!(reader.total_size(), 250);
        assert_eq!(reader.current_volume(), 1);
    }

    #[test]
    fn test_read_across_volumes() {
        let dir = TempDir::new().unwrap();
        let base_path = create_test_volumes(dir.path(), "test.7z", &[100, 100, 50]);

        let mut reader = MultiVolumeReader::open(format!("{}.001", base_path.display())).unwrap();

        let mut buffer = vec![0u8; 250];
        reader.read_exact(&mut buffer).unwrap();

        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[100], 7);
        assert_eq!(buffer[200], 14);
    }

    #[test]
    fn test_seek_operations() {
        let dir = TempDir::new().unwrap();
        let base_path = create_test_volumes(dir.path(), "test.7z", &[100, 100, 50]);

        let mut reader = MultiVolumeReader::open(format!("{}.001", base_path.display())).unwrap();

        let pos = reader.seek(SeekFrom::Start(150)).unwrap();
        assert_eq!(pos, 150);
        assert_eq!(reader.current_volume(), 2);

        let pos = reader.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(pos, 0);
        assert_eq!(reader.current_volume(), 1);

        let pos = reader.seek(SeekFrom::End(-50)).unwrap();
        assert_eq!(pos, 200);
        assert_eq!(reader.current_volume(), 3);

        reader.seek(SeekFrom::Start(100)).unwrap();
        let pos = reader.seek(SeekFrom::Current(25)).unwrap();
        assert_eq!(pos, 125);
    }

    #[test]
    fn test_missing_part_fails() {
        let dir = TempDir::new().unwrap();
        let result = MultiVolumeReader::open(dir.path().join("nonexistent.7z.001"));
        assert!(result.is_err());
    }

    #[test]
    fn test_part_removed_after_open() {
        let dir = TempDir::new().unwrap();
        let base_path = create_test_volumes(dir.path(), "test.7z", &[100, 100]);

        let mut reader = MultiVolumeReader::open(format!("{}.001", base_path.display())).unwrap();
        std::fs::remove_file(format!("{}.002", base_path.display())).unwrap();

        let mut buffer = vec![0u8; 200];
        assert!(reader.read_exact(&mut buffer).is_err());
    }

    #[test]
    fn test_position_to_volume() {
        let dir = TempDir::new().unwrap();
        let base_path = create_test_volumes(dir.path(), "test.7z", &[100, 100, 50]);
        let reader = MultiVolumeReader::open(format!("{}.001", base_path.display())).unwrap();

        assert_eq!(reader.position_to_volume(50), (0, 50));
        assert_eq!(reader.position_to_volume(100), (1, 0));
        assert_eq!(reader.position_to_volume(225), (2, 25));
    }
}
