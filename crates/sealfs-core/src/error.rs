//! Error types for the sealing engine.
//!
//! I/O failures are carried as strings so errors stay `Clone`: a fatal
//! error is recorded once and handed to every later caller of the session.

use std::io;

use sealfs_crypto::CryptoError;
use sealfs_proto::ProtocolError;
use thiserror::Error;

/// Errors from the sealing engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealError {
    /// Session configuration rejected at start
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed keystream or log record
    #[error("format error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Ratchet misuse
    #[error("ratchet error: {0}")]
    Crypto(#[from] CryptoError),

    /// No whole chunk left at the read cursor
    #[error("keystream exhausted: no chunk at offset {offset} (keystream is {len} bytes)")]
    KeystreamExhausted {
        /// Offset of the chunk that was requested
        offset: u64,
        /// Size of the keystream file
        len: u64,
    },

    /// Log record was not written in full
    #[error("short log write at position {position}: {written} of 72 bytes")]
    ShortLogWrite {
        /// Position of the record in the log file
        position: u64,
        /// Bytes actually written
        written: usize,
    },

    /// Payload length disagrees with the declared count
    #[error("payload is {payload} bytes but count is {count}")]
    CountMismatch {
        /// Declared byte count
        count: u64,
        /// Actual payload length
        payload: usize,
    },

    /// Single write larger than the verifier accepts
    #[error("write of {count} bytes exceeds the {max} byte limit")]
    WriteTooLarge {
        /// Requested byte count
        count: u64,
        /// Limit
        max: u64,
    },

    /// Inode value reserved for drain entries
    #[error("inode {0:#x} is reserved")]
    ReservedInode(u64),

    /// Host-level refusal (non-append write, hidden or log file)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Session is draining or closed
    #[error("session is shut down")]
    ShutDown,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl SealError {
    /// Returns true if this error ends the session.
    ///
    /// Once a key has been handed out, a failure to persist its entry or to
    /// obtain the next key leaves the deterministic log layout in an unknown
    /// state. Such errors are recorded and returned to every later caller.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::KeystreamExhausted { .. } => true,
            Self::ShortLogWrite { .. } => true,
            Self::Io(_) => true,
            Self::Protocol(_) => true,
            Self::Crypto(_) => true,

            Self::Config(_) => false,
            Self::CountMismatch { .. } => false,
            Self::WriteTooLarge { .. } => false,
            Self::ReservedInode(_) => false,
            Self::PermissionDenied(_) => false,
            Self::ShutDown => false,
        }
    }
}

impl From<io::Error> for SealError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<SealError> for io::Error {
    fn from(err: SealError) -> Self {
        let kind = match &err {
            SealError::PermissionDenied(_) | SealError::ReservedInode(_) => {
                io::ErrorKind::PermissionDenied
            },
            SealError::Config(_) | SealError::CountMismatch { .. } => io::ErrorKind::InvalidInput,
            SealError::WriteTooLarge { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
