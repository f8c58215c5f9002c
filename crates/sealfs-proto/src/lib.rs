//! Sealfs on-disk formats
//!
//! Fixed-layout binary records shared by the writer and the offline tools.
//! All integers are little-endian `u64` stored as raw byte arrays, so every
//! bit pattern is a valid value and records can be cast from untrusted bytes.
//!
//! # Files
//!
//! ```text
//! keystream:  [ magic | burnt ][ chunk 0 ][ chunk 1 ] ... [ chunk k ]
//!               16 bytes         32 bytes each
//!
//! log:        [ magic ][ entry 0 ][ entry 1 ] ... [ entry m ]
//!               8 bytes  72 bytes each
//! ```
//!
//! A log entry's position is a pure function of the chunk that seeded its
//! key (`key_offset`) and its index within that chunk's ratchet chain
//! (`ratchet_offset`). See [`entry_position`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod keyfile;
mod logfile;

pub use errors::{ProtocolError, Result};
pub use keyfile::KeyFileHeader;
pub use logfile::{LogEntry, LogFileHeader};

/// Size of one keystream chunk and of one fingerprint.
pub const CHUNK_SIZE: usize = 32;

/// Inode recorded for the synthetic entries that drain a ratchet chain.
pub const FAKE_INODE: u64 = u64::MAX;

/// Log file name used when none is configured.
pub const DEFAULT_LOG_NAME: &str = ".SEALFS.LOG";

/// Largest payload a single entry may describe.
pub const MAX_WRITE_COUNT: u64 = 10 * 1024 * 1024;

/// Index of the chunk starting at `key_offset`, counted from the first
/// chunk after the keystream header.
pub fn chunk_index(key_offset: u64) -> Result<u64> {
    let body = key_offset
        .checked_sub(KeyFileHeader::SIZE as u64)
        .ok_or(ProtocolError::MisalignedKeyOffset(key_offset))?;
    if body % CHUNK_SIZE as u64 != 0 {
        return Err(ProtocolError::MisalignedKeyOffset(key_offset));
    }
    Ok(body / CHUNK_SIZE as u64)
}

/// Offset of the chunk with the given index in the keystream file.
pub fn chunk_offset(index: u64) -> Result<u64> {
    index
        .checked_mul(CHUNK_SIZE as u64)
        .and_then(|body| body.checked_add(KeyFileHeader::SIZE as u64))
        .ok_or(ProtocolError::Overflow)
}

/// Byte offset in the log file at which the entry for
/// `(key_offset, ratchet_offset)` lives.
///
/// `header + (chunk_index * nratchet + ratchet_offset) * entry_size`
///
/// # Errors
///
/// - `ProtocolError::MisalignedKeyOffset` if `key_offset` is not a chunk
///   boundary
/// - `ProtocolError::RatchetOffsetOutOfRange` if `ratchet_offset >= nratchet`
/// - `ProtocolError::Overflow` if the position does not fit in a `u64`
pub fn entry_position(key_offset: u64, ratchet_offset: u64, nratchet: u64) -> Result<u64> {
    if ratchet_offset >= nratchet {
        return Err(ProtocolError::RatchetOffsetOutOfRange { ratchet_offset, nratchet });
    }
    let index = chunk_index(key_offset)?;
    index
        .checked_mul(nratchet)
        .and_then(|slot| slot.checked_add(ratchet_offset))
        .and_then(|slot| slot.checked_mul(LogEntry::SIZE as u64))
        .and_then(|pos| pos.checked_add(LogFileHeader::SIZE as u64))
        .ok_or(ProtocolError::Overflow)
}
