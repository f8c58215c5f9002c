//! Provisioning of a fresh seal: one log and two identical keystreams.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use sealfs_proto::{CHUNK_SIZE, DEFAULT_LOG_NAME, KeyFileHeader, LogFileHeader};

use crate::error::ToolError;

/// Random bytes generated per write while filling the keystreams.
const FILL_BLOCK: usize = 64 * 1024;

/// Files created by [`prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Seal identifier written to all three headers
    pub magic: u64,
    /// Log inside the tree
    pub log: PathBuf,
    /// Bytes of key material in each keystream
    pub keystream_bytes: u64,
}

fn random(buf: &mut [u8]) -> Result<(), ToolError> {
    getrandom::fill(buf).map_err(|e| ToolError::Random(e.to_string()))
}

fn create_new(path: &Path) -> Result<File, ToolError> {
    OpenOptions::new().write(true).create_new(true).open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            ToolError::Exists(path.to_path_buf())
        } else {
            ToolError::Io(format!("create {}: {e}", path.display()))
        }
    })
}

/// Create `<dir>/.SEALFS.LOG` and the keystreams `alpha` and `beta` with
/// `size` bytes of key material, rounded down to whole chunks.
///
/// Keep `alpha` offline; hand `beta` to the sealing session.
pub fn prepare(dir: &Path, alpha: &Path, beta: &Path, size: u64) -> Result<Provisioned, ToolError> {
    let log = dir.join(DEFAULT_LOG_NAME);
    for path in [log.as_path(), alpha, beta] {
        if path.exists() {
            return Err(ToolError::Exists(path.to_path_buf()));
        }
    }
    fs::create_dir_all(dir)?;

    let mut magic = [0u8; 8];
    random(&mut magic)?;
    let magic = u64::from_le_bytes(magic);

    let keystream_bytes = size - size % CHUNK_SIZE as u64;
    if keystream_bytes == 0 {
        tracing::warn!(size, "keystream holds no whole chunk");
    }

    let mut log_file = create_new(&log)?;
    log_file.write_all(&LogFileHeader::new(magic).to_bytes())?;
    log_file.sync_all()?;

    let header = KeyFileHeader::new(magic).to_bytes();
    let mut streams = [create_new(alpha)?, create_new(beta)?];
    for stream in &mut streams {
        stream.write_all(&header)?;
    }

    let mut block = vec![0u8; FILL_BLOCK];
    let mut remaining = keystream_bytes;
    while remaining > 0 {
        let n = (remaining as usize).min(block.len());
        random(&mut block[..n])?;
        for stream in &mut streams {
            stream.write_all(&block[..n])?;
        }
        remaining -= n as u64;
    }
    for stream in &streams {
        stream.sync_all()?;
    }

    tracing::info!(magic, keystream_bytes, log = %log.display(), "seal provisioned");
    Ok(Provisioned { magic, log, keystream_bytes })
}
