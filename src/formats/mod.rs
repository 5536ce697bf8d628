//! Byte-level readers for the container formats this crate parses itself.
//!
//! The ecosystem covers tar and the single-file codecs, but nothing usable
//! exists for the legacy stream formats, so their headers are decoded here,
//! close to the words of each format's own documentation. Higher-level
//! dispatch lives in the `extract` module.

pub(crate) mod ar;
pub(crate) mod arj;
pub(crate) mod cpio;
pub(crate) mod dump;
pub(crate) mod zip;

use chrono::{DateTime, NaiveDate, Utc};

use crate::result::{WalkError, WalkResult};

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub(crate) fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub(crate) fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub(crate) fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// A checked cast from u64 to usize, for indexing mapped archives.
/// Only a concern on 32-bit targets.
pub(crate) fn usize(i: impl Into<u64>) -> WalkResult<usize> {
    let i: u64 = i.into();
    if i > usize::MAX as u64 {
        Err(WalkError::ArchiveTooLarge)
    } else {
        Ok(i as usize)
    }
}

/// Seconds since the UNIX epoch, clamped to a representable instant.
pub(crate) fn unix_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Decodes an MS-DOS date/time pair, as stored by ZIP and ARJ.
///
/// MS-DOS uses 2-second precision, and years counted from 1980.
/// Nonsense fields (month 0, day 32, ...) collapse to the epoch of the
/// format, 1980-01-01.
pub(crate) fn msdos_datetime(date: u16, time: u16) -> DateTime<Utc> {
    let seconds = u32::from(0b0000_0000_0001_1111 & time) * 2;
    let minutes = u32::from(0b0000_0111_1110_0000 & time) >> 5;
    let hours = u32::from(0b1111_1000_0000_0000 & time) >> 11;

    let days = u32::from(0b0000_0000_0001_1111 & date);
    let months = u32::from(0b0000_0001_1110_0000 & date) >> 5;
    let years = i32::from((0b1111_1110_0000_0000 & date) >> 9) + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(1980, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        })
}
