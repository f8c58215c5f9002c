//! Chaotic keystream wrapper for crash injection testing
//!
//! Delegates to an underlying store but randomly fails the mutating
//! operations. Reads are never disturbed. A failed header write after a
//! successful sync is exactly the state a crash between the two leaves on
//! disk, which is what the burn scheduler must recover from.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use sealfs_proto::KeyFileHeader;

use super::{Chunk, KeyStore};
use crate::error::SealError;

/// Keystream wrapper that randomly injects write failures
pub struct ChaoticKeyStore<S: KeyStore> {
    inner: S,
    /// Failure rate for overwrites and syncs (0.0 = never, 1.0 = always)
    write_failure_rate: f64,
    /// Failure rate for header writes
    header_failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Mutex<ChaoticRng>,
    /// Header writes that were dropped
    lost_headers: AtomicUsize,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: KeyStore> ChaoticKeyStore<S> {
    /// Wrap `inner`, failing overwrites and syncs at `write_failure_rate`
    /// and header writes at `header_failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if a rate is not in [0.0, 1.0]
    pub fn with_seed(inner: S, write_failure_rate: f64, header_failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&write_failure_rate) && (0.0..=1.0).contains(&header_failure_rate),
            "failure rates must be between 0.0 and 1.0"
        );

        Self {
            inner,
            write_failure_rate,
            header_failure_rate,
            rng: Mutex::new(ChaoticRng::new(seed)),
            lost_headers: AtomicUsize::new(0),
        }
    }

    /// Store whose data writes always succeed but whose header is never
    /// persisted, as if the host died between sync and header write.
    pub fn losing_headers(inner: S) -> Self {
        Self::with_seed(inner, 0.0, 1.0, 0x1234_5678_9ABC_DEF0)
    }

    /// Underlying store (for checking state after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of header writes that were dropped.
    pub fn lost_headers(&self) -> usize {
        self.lost_headers.load(Ordering::Relaxed)
    }

    fn should_fail(&self, rate: f64) -> bool {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < rate
    }
}

impl<S: KeyStore> KeyStore for ChaoticKeyStore<S> {
    fn header(&self) -> Result<KeyFileHeader, SealError> {
        self.inner.header()
    }

    fn size(&self) -> Result<u64, SealError> {
        self.inner.size()
    }

    fn read_chunk(&self, offset: u64) -> Result<Chunk, SealError> {
        self.inner.read_chunk(offset)
    }

    fn overwrite(&self, offset: u64, bytes: &[u8]) -> Result<(), SealError> {
        if self.should_fail(self.write_failure_rate) {
            return Err(SealError::Io(format!("chaos: overwrite at {offset} failed")));
        }
        self.inner.overwrite(offset, bytes)
    }

    fn sync(&self) -> Result<(), SealError> {
        if self.should_fail(self.write_failure_rate) {
            return Err(SealError::Io("chaos: sync failed".to_string()));
        }
        self.inner.sync()
    }

    fn write_header(&self, header: &KeyFileHeader) -> Result<(), SealError> {
        if self.should_fail(self.header_failure_rate) {
            self.lost_headers.fetch_add(1, Ordering::Relaxed);
            return Err(SealError::Io("chaos: header write failed".to_string()));
        }
        self.inner.write_header(header)
    }
}
