//! Sequential log reader shared by the tools.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use sealfs_proto::{DEFAULT_LOG_NAME, LogEntry, LogFileHeader};

use crate::error::VerifyError;

/// Log path for a tool argument that names either the log or its tree.
pub fn resolve_log_path(path: &Path) -> PathBuf {
    if path.is_dir() { path.join(DEFAULT_LOG_NAME) } else { path.to_path_buf() }
}

/// Reads log entries in log order.
///
/// The entry count is fixed at open time from the file size; a trailing
/// partial record is ignored.
pub struct LogReader {
    reader: BufReader<File>,
    magic: u64,
    entries: u64,
    next: u64,
}

impl LogReader {
    /// Open a log and read its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VerifyError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| VerifyError::Io(format!("open log {}: {e}", path.display())))?;
        let len = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let mut header = [0u8; LogFileHeader::SIZE];
        reader.read_exact(&mut header)?;
        let magic = LogFileHeader::from_bytes(&header)?.magic();

        Ok(Self {
            reader,
            magic,
            entries: len.saturating_sub(LogFileHeader::SIZE as u64) / LogEntry::SIZE as u64,
            next: 0,
        })
    }

    /// Seal identifier from the header.
    pub fn magic(&self) -> u64 {
        self.magic
    }

    /// Number of whole entries in the log.
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl Iterator for LogReader {
    /// Log position and entry
    type Item = Result<(u64, LogEntry), VerifyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.entries {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let mut raw = [0u8; LogEntry::SIZE];
        Some(
            self.reader
                .read_exact(&mut raw)
                .map_err(VerifyError::from)
                .and_then(|()| Ok((index, *LogEntry::from_bytes(&raw)?))),
        )
    }
}
