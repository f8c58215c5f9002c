//! Offline log verification.
//!
//! Replays every log entry against the preserved keystream: re-derive the
//! one-time key from the chunk at the entry's key offset, fingerprint the
//! entry metadata together with the bytes it describes in the sealed
//! file, and compare with the stored fingerprint.
//!
//! # Checks
//!
//! - Keystreams: last burnt chunk differs, first unburnt chunk matches
//! - Chain length: the first entry verifies with exactly the nratchet the
//!   keystream implies (entries per burnt chunk)
//! - Fingerprints: every entry, drain entries included
//! - Placement: entry `c` carries key offset `16 + (c / n) * 32` and ratchet
//!   offset `c % n`, and the log ends on a chain boundary
//! - Coverage: each file's entries tile it from offset zero to its current
//!   length without gaps, tolerating bounded reordering
//!
//! A region (`inode`, `begin`, `end`) restricts the fingerprint and
//! coverage checks to the writes of one file that touch `[begin, end]` and
//! skips the placement checks, so it cannot detect truncation of the log.

use std::{collections::HashMap, fmt, fs::File, io, os::unix::fs::FileExt, path::PathBuf};

use sealfs_crypto::{Fingerprinter, KeyCache};
use sealfs_proto::{DEFAULT_LOG_NAME, LogEntry, MAX_WRITE_COUNT, chunk_offset};

use crate::{
    desc::{KeystreamState, SealDesc},
    error::VerifyError,
    reorder::DEFAULT_REORDER_CAPACITY,
    scan::{OpenFile, Renames, scan_tree},
};

/// Largest chain length tried when detecting nratchet.
pub const MAX_NRATCHET: u64 = 512;

/// Payload bytes fed to the fingerprint per read.
const READ_CHUNK: usize = 64 * 1024;

/// Part of one file to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Sealed inode
    pub inode: u64,
    /// First byte of interest
    pub begin: u64,
    /// End of the range; zero selects the whole file
    pub end: u64,
}

impl Region {
    /// Whether `entry` is a write to this region.
    ///
    /// A write is in range when `begin` or `end` falls inside it, or it
    /// lies entirely within `[begin, end]`.
    pub fn contains(&self, entry: &LogEntry) -> bool {
        if entry.inode() != self.inode {
            return false;
        }
        if self.end == 0 {
            return true;
        }
        let (start, stop) = (entry.offset(), entry.end());
        let inside = |n: u64| start <= n && n < stop;
        inside(self.begin) || inside(self.end) || (self.begin <= start && stop <= self.end)
    }
}

/// What to verify and how.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Directory holding the sealed files and, by default, the log
    pub tree_dir: PathBuf,
    /// Keystream copy preserved at provisioning time
    pub alpha: PathBuf,
    /// Live keystream burnt by the sealing sessions
    pub beta: PathBuf,
    /// Log file name inside `tree_dir`
    pub log_name: String,
    /// Restrict verification to part of one file
    pub region: Option<Region>,
    /// Inode renumbering since sealing
    pub renames: Renames,
    /// Reorder heap capacity per file
    pub reorder_capacity: usize,
}

impl VerifyOptions {
    /// Full verification with defaults.
    pub fn new(
        tree_dir: impl Into<PathBuf>,
        alpha: impl Into<PathBuf>,
        beta: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tree_dir: tree_dir.into(),
            alpha: alpha.into(),
            beta: beta.into(),
            log_name: DEFAULT_LOG_NAME.to_string(),
            region: None,
            renames: Renames::new(),
            reorder_capacity: DEFAULT_REORDER_CAPACITY,
        }
    }

    /// Verify only `region`.
    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Apply inode renames.
    #[must_use]
    pub fn with_renames(mut self, renames: Renames) -> Self {
        self.renames = renames;
        self
    }

    /// Use a non-default log name.
    #[must_use]
    pub fn with_log_name(mut self, log_name: impl Into<String>) -> Self {
        self.log_name = log_name.into();
        self
    }

    /// Set the reorder heap capacity.
    #[must_use]
    pub fn with_reorder_capacity(mut self, capacity: usize) -> Self {
        self.reorder_capacity = capacity;
        self
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    /// Real writes verified
    pub entries: u64,
    /// Drain entries verified
    pub fake_entries: u64,
    /// Chain length in use
    pub nratchet: u64,
    /// Burnt watermark of the live keystream
    pub burnt: u64,
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entries verified, correct logs", self.entries)
    }
}

/// Verify a sealed tree.
pub fn verify(options: &VerifyOptions) -> Result<VerifyReport, VerifyError> {
    let desc = SealDesc::open(&options.tree_dir, &options.alpha, &options.log_name)?;
    let keystream = desc.check_keystream(&options.beta)?;
    tracing::info!(
        burnt = keystream.burnt,
        keys = keystream.keys,
        entries = desc.entries(),
        nratchet = keystream.nratchet,
        "keystreams consistent"
    );

    let files = scan_tree(
        desc.tree_dir(),
        desc.log_path(),
        &options.renames,
        options.reorder_capacity,
    )?;
    let report = Verifier { desc: &desc, replay: Replay::new(&desc), files, region: options.region }
        .run(keystream)?;

    if options.region.is_some() {
        tracing::warn!("only a region was verified, run a complete verification to detect truncation");
    }
    Ok(report)
}

/// Key replay and fingerprint comparison for single entries.
struct Replay<'a> {
    desc: &'a SealDesc,
    cache: KeyCache,
    buf: Vec<u8>,
}

impl<'a> Replay<'a> {
    fn new(desc: &'a SealDesc) -> Self {
        Self { desc, cache: KeyCache::new(), buf: vec![0u8; READ_CHUNK] }
    }

    /// Whether `entry` verifies under chain length `nratchet`. Key
    /// coordinates outside the keystream or the chain, and a payload cut
    /// short by the end of the file, do not verify.
    fn entry_matches(
        &mut self,
        entry: &LogEntry,
        file: Option<&File>,
        nratchet: u64,
    ) -> Result<bool, VerifyError> {
        let desc = self.desc;
        if !desc.holds_chunk(entry.key_offset()) {
            return Ok(false);
        }
        let key = match self.cache.key_for(entry, nratchet, |koff| desc.alpha_chunk(koff)) {
            Ok(key) => key,
            Err(VerifyError::Crypto(e)) => {
                tracing::debug!(entry = %entry, nratchet, error = %e, "no key for entry");
                return Ok(false);
            },
            Err(e) => return Err(e),
        };
        let mut fp = Fingerprinter::new(key, entry);

        if let Some(file) = file {
            let end = entry.end();
            if end > file.metadata()?.len() {
                return Ok(false);
            }
            let mut pos = entry.offset();
            while pos < end {
                let n = ((end - pos) as usize).min(self.buf.len());
                match file.read_exact_at(&mut self.buf[..n], pos) {
                    Ok(()) => {},
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                    Err(e) => return Err(e.into()),
                }
                fp.update(&self.buf[..n]);
                pos += n as u64;
            }
        }
        Ok(fp.verify(entry.fingerprint()))
    }

    fn matches_with(
        &mut self,
        entry: &LogEntry,
        file: Option<&File>,
        nratchet: u64,
    ) -> Result<bool, VerifyError> {
        self.cache.clear();
        self.entry_matches(entry, file, nratchet)
    }

    /// Find the chain length the first entry was sealed with: `hint` first,
    /// then every value up to [`MAX_NRATCHET`].
    fn detect_nratchet(
        &mut self,
        entry: &LogEntry,
        file: Option<&File>,
        hint: u64,
    ) -> Result<u64, VerifyError> {
        if hint >= 1 && self.matches_with(entry, file, hint)? {
            return Ok(hint);
        }
        for nratchet in (1..=MAX_NRATCHET).filter(|&n| n != hint) {
            if self.matches_with(entry, file, nratchet)? {
                return Ok(nratchet);
            }
        }
        Err(VerifyError::NRatchetNotFound { max: MAX_NRATCHET })
    }
}

struct Verifier<'a> {
    desc: &'a SealDesc,
    replay: Replay<'a>,
    files: HashMap<u64, OpenFile>,
    region: Option<Region>,
}

impl Verifier<'_> {
    fn run(mut self, keystream: KeystreamState) -> Result<VerifyReport, VerifyError> {
        let mut nratchet = None;
        let mut checked = 0u64;
        let mut report = VerifyReport {
            entries: 0,
            fake_entries: 0,
            nratchet: keystream.nratchet,
            burnt: keystream.burnt,
        };

        for item in self.desc.log()? {
            let (index, entry) = item?;
            if entry.count() > MAX_WRITE_COUNT {
                return Err(VerifyError::WriteTooLarge { index, count: entry.count() });
            }
            if let Some(region) = self.region
                && !entry.is_fake()
                && !region.contains(&entry)
            {
                continue;
            }

            let mut open = if entry.is_fake() {
                None
            } else {
                Some(
                    self.files
                        .get_mut(&entry.inode())
                        .ok_or(VerifyError::UnknownInode { index, inode: entry.inode() })?,
                )
            };
            let file = open.as_ref().map(|o| &o.file);

            let n = match nratchet {
                Some(n) => n,
                None => {
                    let detected = self.replay.detect_nratchet(&entry, file, keystream.nratchet)?;
                    if detected != keystream.nratchet {
                        return Err(VerifyError::NRatchetDisagrees {
                            detected,
                            from_keystream: keystream.nratchet,
                        });
                    }
                    tracing::info!(nratchet = detected, "nratchet detected");
                    nratchet = Some(detected);
                    detected
                },
            };

            if let Some(open) = open.as_mut() {
                if let Some(region) = self.region
                    && open.cursor.offset() == 0
                {
                    open.cursor.start_at(region.begin.min(entry.offset()));
                }
                open.cursor.advance(&entry)?;
            }

            if !self.replay.entry_matches(&entry, open.as_ref().map(|o| &o.file), n)? {
                tracing::error!(index, entry = %entry, nratchet = n, "entry does not verify");
                return Err(VerifyError::Mismatch { index, entry });
            }

            if self.region.is_none() {
                let expected_key_offset = chunk_offset(checked / n)?;
                let expected_ratchet_offset = checked % n;
                if entry.key_offset() != expected_key_offset
                    || entry.ratchet_offset() != expected_ratchet_offset
                {
                    return Err(VerifyError::OffsetDiscontinuity {
                        index,
                        entry,
                        expected_key_offset,
                        expected_ratchet_offset,
                    });
                }
            }

            checked += 1;
            if entry.is_fake() {
                report.fake_entries += 1;
            } else {
                report.entries += 1;
            }
            tracing::debug!(index, entry = %entry, "verified");

            if let (Some(region), Some(open)) = (self.region, open.as_ref())
                && region.end != 0
                && open.cursor.offset() >= region.end
            {
                break;
            }
        }

        let n = nratchet.unwrap_or(keystream.nratchet);
        if self.region.is_none() && checked % n != 0 {
            return Err(VerifyError::NotMultipleOfRatchet { entries: checked, nratchet: n });
        }
        self.check_tails()?;
        if checked == 0 {
            return Err(VerifyError::EmptyLog);
        }

        report.nratchet = n;
        Ok(report)
    }

    fn check_tails(&mut self) -> Result<(), VerifyError> {
        match self.region {
            None => {
                for open in self.files.values_mut() {
                    open.cursor.finish()?;
                    let size = open.file.metadata()?.len();
                    if size != open.cursor.offset() {
                        tracing::error!(
                            path = %open.path.display(),
                            sealed = open.cursor.offset(),
                            size,
                            "file length differs from its sealed writes"
                        );
                        return Err(VerifyError::UnsealedTail {
                            inode: open.cursor.inode(),
                            sealed: open.cursor.offset(),
                            size,
                        });
                    }
                }
            },
            Some(region) => {
                if let Some(open) = self.files.get_mut(&region.inode)
                    && (region.end == 0 || open.cursor.offset() < region.end)
                {
                    open.cursor.finish()?;
                }
            },
        }
        Ok(())
    }
}
