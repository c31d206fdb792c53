//! Timestamp conversions for the container formats.
//!
//! Each container stores modification times differently:
//! - 7z and RAR5 use Windows FILETIME (100-nanosecond intervals since
//!   January 1, 1601 UTC)
//! - zip and RAR4 use MS-DOS date/time pairs (2-second resolution, local
//!   time as recorded)
//! - tar and gzip use Unix seconds
//!
//! [`Timestamp`] normalizes all of them into one value that converts to
//! [`SystemTime`] without losing the precision the source format had.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Difference between the FILETIME epoch (1601-01-01) and the Unix epoch
/// (1970-01-01) in 100-nanosecond intervals.
const FILETIME_UNIX_DIFF: u64 = 116444736000000000;

/// Number of 100-nanosecond intervals per second.
const INTERVALS_PER_SECOND: u64 = 10_000_000;

/// A modification time normalized from a container's native encoding.
///
/// Internally a Windows FILETIME value, the highest-precision encoding any
/// of the supported containers uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    filetime: u64,
}

impl Timestamp {
    /// Creates a timestamp from a raw Windows FILETIME value.
    #[inline]
    pub const fn from_filetime(filetime: u64) -> Self {
        Self { filetime }
    }

    /// Creates a timestamp from Unix seconds (since January 1, 1970).
    ///
    /// Returns `None` if the value would overflow the FILETIME range.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        if secs < 0 {
            let neg_intervals = secs.unsigned_abs().checked_mul(INTERVALS_PER_SECOND)?;
            FILETIME_UNIX_DIFF
                .checked_sub(neg_intervals)
                .map(Self::from_filetime)
        } else {
            let intervals = (secs as u64).checked_mul(INTERVALS_PER_SECOND)?;
            FILETIME_UNIX_DIFF
                .checked_add(intervals)
                .map(Self::from_filetime)
        }
    }

    /// Creates a timestamp from an MS-DOS date/time pair.
    ///
    /// The date packs year (since 1980), month, and day; the time packs
    /// hours, minutes, and 2-second units. Returns `None` for fields that
    /// do not name a real calendar date.
    pub fn from_dos_datetime(date: u16, time: u16) -> Option<Self> {
        let year = ((date >> 9) & 0x7F) as i64 + 1980;
        let month = ((date >> 5) & 0x0F) as i64;
        let day = (date & 0x1F) as i64;

        let hours = ((time >> 11) & 0x1F) as i64;
        let minutes = ((time >> 5) & 0x3F) as i64;
        let seconds = ((time & 0x1F) as i64) * 2;

        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        if hours > 23 || minutes > 59 || seconds > 59 {
            return None;
        }

        let days = days_from_civil(year, month, day);
        let secs = days * 86400 + hours * 3600 + minutes * 60 + seconds;
        Self::from_unix_secs(secs)
    }

    /// Creates a timestamp from a `SystemTime`, truncating to 100ns.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => {
                let intervals = duration.as_secs().checked_mul(INTERVALS_PER_SECOND)?
                    + u64::from(duration.subsec_nanos()) / 100;
                FILETIME_UNIX_DIFF
                    .checked_add(intervals)
                    .map(Self::from_filetime)
            }
            Err(e) => {
                let duration = e.duration();
                let intervals = duration.as_secs().checked_mul(INTERVALS_PER_SECOND)?
                    + u64::from(duration.subsec_nanos()) / 100;
                FILETIME_UNIX_DIFF
                    .checked_sub(intervals)
                    .map(Self::from_filetime)
            }
        }
    }

    /// Returns the raw Windows FILETIME value.
    #[inline]
    pub const fn as_filetime(&self) -> u64 {
        self.filetime
    }

    /// Returns the timestamp as Unix seconds, truncating sub-second
    /// precision. Negative for times before the Unix epoch.
    pub fn as_unix_secs(&self) -> i64 {
        if self.filetime >= FILETIME_UNIX_DIFF {
            let intervals = self.filetime - FILETIME_UNIX_DIFF;
            (intervals / INTERVALS_PER_SECOND) as i64
        } else {
            let intervals = FILETIME_UNIX_DIFF - self.filetime;
            let secs = intervals / INTERVALS_PER_SECOND;
            let extra = u64::from(intervals % INTERVALS_PER_SECOND > 0);
            -((secs + extra) as i64)
        }
    }

    /// Converts to a `SystemTime`, preserving 100ns precision.
    pub fn as_system_time(&self) -> SystemTime {
        if self.filetime >= FILETIME_UNIX_DIFF {
            let intervals = self.filetime - FILETIME_UNIX_DIFF;
            let secs = intervals / INTERVALS_PER_SECOND;
            let nanos = ((intervals % INTERVALS_PER_SECOND) * 100) as u32;
            UNIX_EPOCH + Duration::new(secs, nanos)
        } else {
            let intervals = FILETIME_UNIX_DIFF - self.filetime;
            let secs = intervals / INTERVALS_PER_SECOND;
            let nanos = ((intervals % INTERVALS_PER_SECOND) * 100) as u32;
            UNIX_EPOCH - Duration::new(secs, nanos)
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}

/// Days between 1970-01-01 and the given civil date (proleptic Gregorian).
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}
