//! Sealed log file.
//!
//! Entries are written at positions computed from their key coordinates,
//! never appended at the current end, so concurrent writers can commit in
//! any order without a shared file cursor.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::Path,
};

use sealfs_proto::{LogEntry, LogFileHeader, entry_position};

use crate::error::SealError;

/// Writer handle on a provisioned log file.
pub struct SealLog {
    file: File,
    magic: u64,
    sync_io: bool,
}

impl SealLog {
    /// Open an existing log file. The header must already be in place.
    pub fn open(path: impl AsRef<Path>, sync_io: bool) -> Result<Self, SealError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SealError::Io(format!("open log {}: {e}", path.display())))?;

        let mut buf = [0u8; LogFileHeader::SIZE];
        file.read_exact_at(&mut buf, 0)?;
        let magic = LogFileHeader::from_bytes(&buf)?.magic();

        Ok(Self { file, magic, sync_io })
    }

    /// Seal identifier from the header.
    pub fn magic(&self) -> u64 {
        self.magic
    }

    /// Number of entry slots covered by the current file size. Slots that
    /// were never written (a crash mid-chain) are counted too.
    pub fn entry_slots(&self) -> Result<u64, SealError> {
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(LogFileHeader::SIZE as u64) / LogEntry::SIZE as u64)
    }

    /// Write `entry` at its deterministic position.
    ///
    /// A short write is not retried: the slot now holds a torn record and
    /// the caller must treat the session as failed.
    pub fn write_entry(&self, entry: &LogEntry, nratchet: u64) -> Result<u64, SealError> {
        let position = entry_position(entry.key_offset(), entry.ratchet_offset(), nratchet)?;
        let written = self.file.write_at(&entry.to_bytes(), position)?;
        if written != LogEntry::SIZE {
            return Err(SealError::ShortLogWrite { position, written });
        }
        if self.sync_io {
            self.file.sync_data()?;
        }
        Ok(position)
    }

    /// Flush the log to stable storage.
    pub fn sync(&self) -> Result<(), SealError> {
        self.file.sync_data()?;
        Ok(())
    }
}
