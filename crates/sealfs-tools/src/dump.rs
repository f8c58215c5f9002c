//! Human-readable log listing and statistics. Nothing is verified.

use std::{fmt, io::Write, path::Path};

use crate::{
    error::ToolError,
    log_reader::{LogReader, resolve_log_path},
};

/// Print every entry of the log at `path` (a log file or its tree).
/// Returns the number of entries printed.
pub fn dump(path: &Path, out: &mut impl Write) -> Result<u64, ToolError> {
    let log = LogReader::open(resolve_log_path(path))?;
    writeln!(out, "magic: {:#018x}", log.magic())?;

    let mut dumped = 0;
    for item in log {
        let (index, entry) = item?;
        writeln!(out, "#{index} {entry}")?;
        dumped += 1;
    }
    writeln!(out, "{dumped} entries dumped")?;
    Ok(dumped)
}

/// Write size statistics over a log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    /// Entries, drain entries included
    pub writes: u64,
    /// Drain entries
    pub fake_writes: u64,
    /// Largest byte count
    pub max_count: u64,
    /// Mean byte count over all entries
    pub avg_count: f64,
}

impl Stats {
    /// Fold one entry's byte count into the statistics.
    pub fn record(&mut self, count: u64, fake: bool) {
        if fake {
            self.fake_writes += 1;
        }
        self.max_count = self.max_count.max(count);
        self.writes += 1;
        self.avg_count += (count as f64 - self.avg_count) / self.writes as f64;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nw: {}, fakenw: {}, maxc: {}, avgc: {:.6}",
            self.writes, self.fake_writes, self.max_count, self.avg_count
        )
    }
}

/// Collect [`Stats`] over the log at `path` (a log file or its tree).
pub fn stats(path: &Path) -> Result<Stats, ToolError> {
    let mut stats = Stats::default();
    for item in LogReader::open(resolve_log_path(path))? {
        let (_, entry) = item?;
        stats.record(entry.count(), entry.is_fake());
    }
    Ok(stats)
}
