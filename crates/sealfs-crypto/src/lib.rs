//! Sealfs Cryptographic Primitives
//!
//! Pure functions and small state machines for deriving one-time keys and
//! fingerprinting log entries. Nothing here touches the filesystem: callers
//! hand in raw keystream chunks and payload bytes.
//!
//! # Key Lifecycle
//!
//! Every 32-byte chunk read from the keystream seeds a short chain of
//! one-time keys. Each key authenticates exactly one log entry and is then
//! zeroized. The chunk itself is burnt on disk by the writer.
//!
//! ```text
//! keystream chunk C (read once, then burnt)
//!        │
//!        ▼
//! K0 = HMAC(C, 0 ‖ n)            (K0 = C when n == 1)
//!        │
//!        ▼
//! K1 = HMAC(K0, 1 ‖ n) → ... → K(n-1)
//!        │
//!        ▼
//! fingerprint = HMAC(Ki, roff ‖ inode ‖ offset ‖ count ‖ koff ‖ payload)
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys are overwritten in place as the chain advances
//! - One-time keys are zeroized when dropped
//! - Recovering `K(i)` requires the chunk, which no longer exists on disk
//!
//! Binding:
//! - The fingerprint covers every metadata field of the entry and the payload
//! - Fingerprints are compared in constant time

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod fingerprint;
mod key_cache;
mod subkey;

pub use error::CryptoError;
pub use fingerprint::{Fingerprinter, fingerprint};
pub use key_cache::KeyCache;
pub use subkey::{ChunkRatchet, KEY_SIZE, OneTimeKey, derive_subkey, seed_chain};
