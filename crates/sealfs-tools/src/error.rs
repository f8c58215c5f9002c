//! Error types for the offline tools.

use std::{io, path::PathBuf};

use sealfs_core::SealError;
use sealfs_crypto::CryptoError;
use sealfs_proto::{LogEntry, ProtocolError};
use thiserror::Error;

/// Reasons a sealed tree fails verification.
///
/// Every variant except `Io` is a finding about the sealed data rather
/// than about the verifier's environment.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerifyError {
    /// Stored fingerprint does not match the entry and its payload
    #[error("entry #{index} does not verify: {entry}")]
    Mismatch {
        /// Position of the entry in the log
        index: u64,
        /// The offending entry
        entry: LogEntry,
    },

    /// Entry is not at the key coordinates its log position implies
    #[error(
        "entry #{index} has koffset {} roff {}, expected koffset {expected_key_offset} roff {expected_ratchet_offset}",
        .entry.key_offset(),
        .entry.ratchet_offset()
    )]
    OffsetDiscontinuity {
        /// Position of the entry in the log
        index: u64,
        /// The offending entry
        entry: LogEntry,
        /// Key offset implied by the position
        expected_key_offset: u64,
        /// Ratchet offset implied by the position
        expected_ratchet_offset: u64,
    },

    /// Too many entries for one file arrived ahead of a missing write
    #[error("inode {inode}: {capacity} entries pending without closing a gap")]
    ReorderOverflow {
        /// Sealed file
        inode: u64,
        /// Reorder capacity that was exceeded
        capacity: usize,
    },

    /// A gap in a file's writes never closed by the end of the log
    #[error("inode {inode}: {pending} entries pending past offset {expected_offset}")]
    UnresolvedGap {
        /// Sealed file
        inode: u64,
        /// First byte no entry accounts for
        expected_offset: u64,
        /// Entries still parked
        pending: usize,
    },

    /// A file's length is not where its sealed writes end
    #[error("inode {inode}: {size} bytes on disk, sealed writes end at {sealed}")]
    UnsealedTail {
        /// Sealed file
        inode: u64,
        /// End of the contiguous sealed writes
        sealed: u64,
        /// Current file length
        size: u64,
    },

    /// The two keystream files differ in size
    #[error("keystream sizes differ: alpha {alpha} bytes, beta {beta} bytes")]
    KeystreamSizeMismatch {
        /// Size of the preserved copy
        alpha: u64,
        /// Size of the live keystream
        beta: u64,
    },

    /// Burnt watermark past the end of the keystream
    #[error("burnt watermark {burnt} is beyond the keystream end ({size} bytes)")]
    BurntBeyondEnd {
        /// Watermark from the live header
        burnt: u64,
        /// Keystream size
        size: u64,
    },

    /// Last chunk below the watermark was never destroyed
    #[error("chunk at {offset} is below the burnt watermark but was not burnt")]
    ChunkNotBurnt {
        /// Offset of the chunk
        offset: u64,
    },

    /// First chunk above the watermark was altered
    #[error("chunk at {offset} is above the burnt watermark but differs from the preserved copy")]
    UnburntChunkAltered {
        /// Offset of the chunk
        offset: u64,
    },

    /// More chunks burnt than the log has entries for
    #[error("{keys} keys burnt but only {entries} log entries")]
    MoreKeysThanEntries {
        /// Burnt chunks
        keys: u64,
        /// Entries in the log
        entries: u64,
    },

    /// No chain length up to the search limit verifies the first entry
    #[error("no nratchet up to {max} verifies the first entry")]
    NRatchetNotFound {
        /// Largest chain length tried
        max: u64,
    },

    /// Chain length from the first entry disagrees with the keystream
    #[error("first entry verifies with nratchet {detected}, keystream implies {from_keystream}")]
    NRatchetDisagrees {
        /// Chain length that verified the first entry
        detected: u64,
        /// Log entries per burnt chunk
        from_keystream: u64,
    },

    /// Log ends in the middle of a chain
    #[error("{entries} entries is not a multiple of nratchet {nratchet}")]
    NotMultipleOfRatchet {
        /// Entries checked
        entries: u64,
        /// Chain length
        nratchet: u64,
    },

    /// Nothing to verify
    #[error("no entries in the log")]
    EmptyLog,

    /// Entry refers to a file that is not in the tree
    #[error("entry #{index}: no file with inode {inode} in the tree")]
    UnknownInode {
        /// Position of the entry in the log
        index: u64,
        /// Inode the entry names
        inode: u64,
    },

    /// Entry describes a write larger than any writer produces
    #[error("entry #{index}: write of {count} bytes is too large")]
    WriteTooLarge {
        /// Position of the entry in the log
        index: u64,
        /// Byte count in the entry
        count: u64,
    },

    /// Malformed header or entry
    #[error("format error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key re-derivation failed
    #[error("ratchet error: {0}")]
    Crypto(#[from] CryptoError),

    /// Reading the tree, the log or a keystream failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for VerifyError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from the tool commands.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Verification failed
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Sealing session failed
    #[error(transparent)]
    Seal(#[from] SealError),

    /// Provisioning refuses to replace existing files
    #[error("{} already exists", .0.display())]
    Exists(PathBuf),

    /// Randomness unavailable
    #[error("random source: {0}")]
    Random(String),

    /// Bad command line input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem or output error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
