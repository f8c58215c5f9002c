//! Verification inputs: the preserved keystream, the live keystream and
//! the log.
//!
//! ```text
//! alpha (copy at provisioning)  [hdr][c0][c1][c2][c3][c4][c5]
//! beta  (live, partly burnt)    [hdr][r0][r1][r2][c3][c4][c5]
//!                                              ^ burnt
//! ```
//!
//! Below `burnt` the two must differ, at `burnt` they must still agree.
//! Only the last burnt and the first unburnt chunk are compared.

use std::{
    fs::File,
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use sealfs_proto::{CHUNK_SIZE, KeyFileHeader, LogFileHeader};

use crate::{error::VerifyError, log_reader::LogReader};

/// Result of the keystream consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeystreamState {
    /// Burnt watermark of the live keystream
    pub burnt: u64,
    /// Chunks burnt
    pub keys: u64,
    /// Log entries per burnt chunk
    pub nratchet: u64,
}

/// Open verification inputs.
pub struct SealDesc {
    tree_dir: PathBuf,
    log_path: PathBuf,
    alpha: File,
    alpha_size: u64,
    magic: u64,
    entries: u64,
}

impl SealDesc {
    /// Open the preserved keystream and the log inside `tree_dir`.
    pub fn open(
        tree_dir: impl AsRef<Path>,
        alpha: impl AsRef<Path>,
        log_name: &str,
    ) -> Result<Self, VerifyError> {
        let tree_dir = tree_dir.as_ref().to_path_buf();
        let log_path = tree_dir.join(log_name);

        let alpha_path = alpha.as_ref();
        let alpha = File::open(alpha_path)
            .map_err(|e| VerifyError::Io(format!("open {}: {e}", alpha_path.display())))?;
        let header = read_header(&alpha)?;
        let alpha_size = alpha.metadata()?.len();

        let log = LogReader::open(&log_path)?;
        LogFileHeader::new(log.magic()).ensure_matches(&header)?;

        Ok(Self {
            tree_dir,
            log_path,
            alpha,
            alpha_size,
            magic: header.magic(),
            entries: log.entries(),
        })
    }

    /// Seal identifier shared by all three files.
    pub fn magic(&self) -> u64 {
        self.magic
    }

    /// Whole entries in the log.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Directory holding the sealed files.
    pub fn tree_dir(&self) -> &Path {
        &self.tree_dir
    }

    /// Log file location.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Fresh reader over the log entries.
    pub fn log(&self) -> Result<LogReader, VerifyError> {
        LogReader::open(&self.log_path)
    }

    /// Whether a whole key chunk of the preserved keystream starts at
    /// `key_offset`.
    pub fn holds_chunk(&self, key_offset: u64) -> bool {
        key_offset >= KeyFileHeader::SIZE as u64
            && key_offset.checked_add(CHUNK_SIZE as u64).is_some_and(|end| end <= self.alpha_size)
    }

    /// Chunk of the preserved keystream at `key_offset`.
    pub fn alpha_chunk(&self, key_offset: u64) -> Result<[u8; CHUNK_SIZE], VerifyError> {
        let mut chunk = [0u8; CHUNK_SIZE];
        self.alpha.read_exact_at(&mut chunk, key_offset)?;
        Ok(chunk)
    }

    /// Check the live keystream against the preserved copy and derive the
    /// chain length from the number of burnt chunks.
    pub fn check_keystream(&self, beta: impl AsRef<Path>) -> Result<KeystreamState, VerifyError> {
        let beta_path = beta.as_ref();
        let beta = File::open(beta_path)
            .map_err(|e| VerifyError::Io(format!("open {}: {e}", beta_path.display())))?;
        let header = read_header(&beta)?;
        LogFileHeader::new(self.magic).ensure_matches(&header)?;

        let burnt = header.burnt();
        let keys = header.burnt_chunks();
        if self.entries < keys {
            return Err(VerifyError::MoreKeysThanEntries { keys, entries: self.entries });
        }
        check_keystreams(&self.alpha, &beta, burnt)?;

        let nratchet = if keys == 0 { 1 } else { self.entries / keys };
        Ok(KeystreamState { burnt, keys, nratchet })
    }
}

fn read_header(file: &File) -> Result<KeyFileHeader, VerifyError> {
    let mut buf = [0u8; KeyFileHeader::SIZE];
    file.read_exact_at(&mut buf, 0)?;
    Ok(*KeyFileHeader::from_bytes(&buf)?)
}

fn read_chunk(file: &File, offset: u64) -> io::Result<[u8; CHUNK_SIZE]> {
    let mut chunk = [0u8; CHUNK_SIZE];
    file.read_exact_at(&mut chunk, offset)?;
    Ok(chunk)
}

/// Compare the chunks on either side of `burnt`.
///
/// # Errors
///
/// - `KeystreamSizeMismatch` if the files differ in length
/// - `BurntBeyondEnd` if `burnt` lies past the end
/// - `ChunkNotBurnt` if the last chunk below `burnt` is unchanged
/// - `UnburntChunkAltered` if the chunk at `burnt` changed
pub fn check_keystreams(alpha: &File, beta: &File, burnt: u64) -> Result<(), VerifyError> {
    let size = alpha.metadata()?.len();
    let beta_size = beta.metadata()?.len();
    if size != beta_size {
        return Err(VerifyError::KeystreamSizeMismatch { alpha: size, beta: beta_size });
    }
    if burnt > size {
        return Err(VerifyError::BurntBeyondEnd { burnt, size });
    }

    let first = KeyFileHeader::SIZE as u64;
    if burnt > first {
        let offset = burnt - CHUNK_SIZE as u64;
        if read_chunk(alpha, offset)? == read_chunk(beta, offset)? {
            return Err(VerifyError::ChunkNotBurnt { offset });
        }
    }

    if burnt + CHUNK_SIZE as u64 > size {
        tracing::info!(burnt, size, "keystream is completely burnt");
        return Ok(());
    }
    if read_chunk(alpha, burnt)? != read_chunk(beta, burnt)? {
        return Err(VerifyError::UnburntChunkAltered { offset: burnt });
    }
    Ok(())
}
