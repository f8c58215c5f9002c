//! Error types for ratchet operations

use thiserror::Error;

/// Errors from ratchet and key cache operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Chain length must be at least one
    #[error("invalid nratchet: {0}")]
    InvalidNRatchet(u64),

    /// Requested key lies outside the chain
    #[error("ratchet offset {ratchet_offset} out of range for nratchet {nratchet}")]
    RatchetOffsetOutOfRange {
        /// Requested ratchet offset
        ratchet_offset: u64,
        /// Chain length
        nratchet: u64,
    },
}
