//! KeyStream storage
//!
//! Trait-based access to the pre-provisioned keystream file: positional
//! chunk reads for the ratchet, positional overwrites and syncs for the
//! burn scheduler, and header persistence. The trait is synchronous and
//! shared between the write path and the background actors.

mod chaotic;
mod file;

pub use chaotic::ChaoticKeyStore;
pub use file::FileKeyStore;
use sealfs_proto::{CHUNK_SIZE, KeyFileHeader};
use zeroize::Zeroizing;

use crate::error::SealError;

/// A raw keystream chunk, zeroized when dropped.
pub type Chunk = Zeroizing<[u8; CHUNK_SIZE]>;

/// Storage for one keystream.
///
/// Must be Send + Sync: the producer reads chunks while burn actors
/// overwrite earlier ranges of the same file. Callers never touch
/// overlapping ranges concurrently, so implementations need no locking of
/// their own beyond what positional I/O provides.
pub trait KeyStore: Send + Sync + 'static {
    /// Current header.
    fn header(&self) -> Result<KeyFileHeader, SealError>;

    /// Total size of the keystream in bytes, header included.
    fn size(&self) -> Result<u64, SealError>;

    /// Read the chunk at `offset`.
    ///
    /// # Invariants
    ///
    /// - Pre: `offset` is a chunk boundary at or above the served watermark
    /// - Returns `SealError::KeystreamExhausted` if fewer than 32 bytes
    ///   remain at `offset`
    fn read_chunk(&self, offset: u64) -> Result<Chunk, SealError>;

    /// Overwrite `bytes.len()` bytes at `offset`.
    fn overwrite(&self, offset: u64, bytes: &[u8]) -> Result<(), SealError>;

    /// Flush all overwrites to stable storage.
    fn sync(&self) -> Result<(), SealError>;

    /// Persist `header`. Only ever called after the range it covers has
    /// been synced.
    fn write_header(&self, header: &KeyFileHeader) -> Result<(), SealError>;
}
