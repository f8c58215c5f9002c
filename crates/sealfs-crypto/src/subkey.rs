//! One-time key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: the chain key is overwritten on every step
//! - Key Uniqueness: each ratchet offset yields a distinct key
//! - Determinism: the same chunk always yields the same chain

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Size of every key in the chain.
pub const KEY_SIZE: usize = 32;

/// Derive the next key in a chain.
///
/// `HMAC-SHA256(key = prev, msg = index_le64 ‖ nratchet_le64)`. Callers zero
/// `prev` once it is no longer needed.
pub fn derive_subkey(prev: &[u8; KEY_SIZE], index: u64, nratchet: u64) -> [u8; KEY_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(prev) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(&index.to_le_bytes());
    mac.update(&nratchet.to_le_bytes());

    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Key for ratchet offset zero, derived from a raw chunk.
///
/// A single-link chain uses the chunk directly.
pub fn seed_chain(chunk: &[u8; KEY_SIZE], nratchet: u64) -> [u8; KEY_SIZE] {
    if nratchet == 1 { *chunk } else { derive_subkey(chunk, 0, nratchet) }
}

/// A key that authenticates exactly one log entry.
///
/// Not `Clone`: a one-time key has a single owner and is zeroized on drop.
pub struct OneTimeKey {
    key: [u8; KEY_SIZE],
    ratchet_offset: u64,
    key_offset: u64,
}

impl OneTimeKey {
    /// 32-byte HMAC key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Position of this key in its chain.
    pub fn ratchet_offset(&self) -> u64 {
        self.ratchet_offset
    }

    /// Keystream offset of the chunk that seeded the chain.
    pub fn key_offset(&self) -> u64 {
        self.key_offset
    }
}

impl Drop for OneTimeKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for OneTimeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeKey")
            .field("ratchet_offset", &self.ratchet_offset)
            .field("key_offset", &self.key_offset)
            .finish_non_exhaustive()
    }
}

/// Writer-side chain over a single keystream chunk.
///
/// Yields `nratchet` one-time keys, in order, then nothing. The chain key
/// is overwritten on every step and zeroized once the chain is exhausted.
pub struct ChunkRatchet {
    chain_key: [u8; KEY_SIZE],
    key_offset: u64,
    next: u64,
    nratchet: u64,
}

impl ChunkRatchet {
    /// Start a chain from the raw chunk read at `key_offset`.
    ///
    /// The caller still owns `chunk` and must zero it.
    pub fn new(chunk: &[u8; KEY_SIZE], key_offset: u64, nratchet: u64) -> Result<Self, CryptoError> {
        if nratchet == 0 {
            return Err(CryptoError::InvalidNRatchet(nratchet));
        }
        Ok(Self { chain_key: seed_chain(chunk, nratchet), key_offset, next: 0, nratchet })
    }

    /// Keystream offset of the seeding chunk.
    pub fn key_offset(&self) -> u64 {
        self.key_offset
    }

    /// Whether every key of the chain has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.nratchet
    }

    /// Hand out the next key, or `None` once the chain is used up.
    pub fn next_key(&mut self) -> Option<OneTimeKey> {
        if self.is_exhausted() {
            return None;
        }

        let ratchet_offset = self.next;
        if ratchet_offset != 0 {
            let next_chain_key = derive_subkey(&self.chain_key, ratchet_offset, self.nratchet);
            self.chain_key.zeroize();
            self.chain_key = next_chain_key;
        }
        let key = OneTimeKey { key: self.chain_key, ratchet_offset, key_offset: self.key_offset };

        self.next += 1;
        if self.is_exhausted() {
            self.chain_key.zeroize();
        }
        Some(key)
    }
}

impl Drop for ChunkRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}
