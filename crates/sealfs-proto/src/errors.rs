//! Error types for parsing and addressing on-disk records

use thiserror::Error;

/// Result alias for format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from decoding or addressing sealfs records
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the record being parsed
    #[error("record too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Size of the record
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Keystream and log were provisioned for different seals
    #[error("magic mismatch: keystream {keystream:#018x}, log {log:#018x}")]
    MagicMismatch {
        /// Magic in the keystream header
        keystream: u64,
        /// Magic in the log header
        log: u64,
    },

    /// Burnt watermark that cannot occur in a well-formed keystream
    #[error("invalid burnt watermark: {0}")]
    InvalidBurnt(u64),

    /// Key offset that does not start a chunk
    #[error("key offset {0} is not a chunk boundary")]
    MisalignedKeyOffset(u64),

    /// Ratchet offset outside the chain
    #[error("ratchet offset {ratchet_offset} out of range for nratchet {nratchet}")]
    RatchetOffsetOutOfRange {
        /// Offending ratchet offset
        ratchet_offset: u64,
        /// Chain length
        nratchet: u64,
    },

    /// Offset arithmetic exceeded `u64`
    #[error("offset arithmetic overflow")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::TooShort { expected: 72, actual: 40 };
        assert_eq!(err.to_string(), "record too short: expected 72 bytes, got 40");

        let err = ProtocolError::MagicMismatch { keystream: 1, log: 2 };
        assert_eq!(
            err.to_string(),
            "magic mismatch: keystream 0x0000000000000001, log 0x0000000000000002"
        );
    }
}
