//! Verifier-side chain replay.
//!
//! Log entries arrive in log order, which is chain order. The cache keeps
//! the most recent key of the current chain so that consecutive entries
//! only cost one HMAC each. It re-seeds from the keystream whenever the
//! chain changes or the entry lies behind the cached position.

use sealfs_proto::LogEntry;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    subkey::{KEY_SIZE, derive_subkey, seed_chain},
};

struct Cached {
    key_offset: u64,
    ratchet_offset: u64,
    key: [u8; KEY_SIZE],
}

impl Drop for Cached {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Cache of the last re-derived key.
#[derive(Default)]
pub struct KeyCache {
    cached: Option<Cached>,
}

impl KeyCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached key. Required whenever `nratchet` changes, since
    /// the chain seed depends on it.
    pub fn clear(&mut self) {
        self.cached = None;
    }

    fn needs_reseed(&self, entry: &LogEntry) -> bool {
        match &self.cached {
            None => true,
            Some(c) => {
                entry.ratchet_offset() == 0
                    || c.key_offset != entry.key_offset()
                    || c.ratchet_offset > entry.ratchet_offset()
            },
        }
    }

    /// Key for `entry` under chain length `nratchet`.
    ///
    /// `load_chunk` is called with the entry's key offset when the chain
    /// has to be re-seeded from the keystream.
    pub fn key_for<E>(
        &mut self,
        entry: &LogEntry,
        nratchet: u64,
        load_chunk: impl FnOnce(u64) -> Result<[u8; KEY_SIZE], E>,
    ) -> Result<&[u8; KEY_SIZE], E>
    where
        E: From<CryptoError>,
    {
        if nratchet == 0 {
            return Err(CryptoError::InvalidNRatchet(nratchet).into());
        }
        let target = entry.ratchet_offset();
        if target >= nratchet {
            return Err(CryptoError::RatchetOffsetOutOfRange { ratchet_offset: target, nratchet }
                .into());
        }

        if self.needs_reseed(entry) {
            self.cached = None;
            let mut chunk = load_chunk(entry.key_offset())?;
            let key = seed_chain(&chunk, nratchet);
            chunk.zeroize();
            self.cached = Some(Cached { key_offset: entry.key_offset(), ratchet_offset: 0, key });
        }

        let Some(cached) = self.cached.as_mut() else {
            unreachable!("cache was seeded above");
        };
        while cached.ratchet_offset < target {
            let next = derive_subkey(&cached.key, cached.ratchet_offset + 1, nratchet);
            cached.key.zeroize();
            cached.key = next;
            cached.ratchet_offset += 1;
        }
        Ok(&cached.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subkey::ChunkRatchet;

    const CHUNKS: [[u8; 32]; 2] = [[1u8; 32], [2u8; 32]];

    fn load(koff: u64) -> Result<[u8; 32], CryptoError> {
        Ok(CHUNKS[((koff - 16) / 32) as usize])
    }

    fn writer_keys(chunk_index: usize, nratchet: u64) -> Vec<[u8; 32]> {
        let koff = 16 + chunk_index as u64 * 32;
        let mut ratchet =
            ChunkRatchet::new(&CHUNKS[chunk_index], koff, nratchet).expect("valid nratchet");
        std::iter::from_fn(|| ratchet.next_key()).map(|k| *k.key()).collect()
    }

    #[test]
    fn replay_matches_writer_in_order() {
        let expected = writer_keys(0, 4);
        let mut cache = KeyCache::new();
        for roff in 0..4u64 {
            let entry = LogEntry::new(roff, 7, 0, 0, 16);
            let key = cache.key_for(&entry, 4, load).expect("key");
            assert_eq!(*key, expected[roff as usize]);
        }
    }

    #[test]
    fn replay_skips_forward() {
        let expected = writer_keys(1, 5);
        let mut cache = KeyCache::new();
        let entry = LogEntry::new(3, 7, 0, 0, 48);
        assert_eq!(*cache.key_for(&entry, 5, load).expect("key"), expected[3]);
    }

    #[test]
    fn replay_reseeds_when_going_backwards() {
        let expected = writer_keys(0, 4);
        let mut cache = KeyCache::new();
        let ahead = LogEntry::new(3, 7, 0, 0, 16);
        let behind = LogEntry::new(1, 7, 0, 0, 16);

        cache.key_for(&ahead, 4, load).expect("key");
        let mut loads = 0;
        let key = cache
            .key_for(&behind, 4, |koff| {
                loads += 1;
                load(koff)
            })
            .expect("key");
        assert_eq!(*key, expected[1]);
        assert_eq!(loads, 1, "moving backwards must reload the chunk");
    }

    #[test]
    fn consecutive_entries_do_not_reload() {
        let mut cache = KeyCache::new();
        cache.key_for(&LogEntry::new(0, 7, 0, 0, 16), 4, load).expect("key");

        let result = cache.key_for(&LogEntry::new(1, 7, 0, 0, 16), 4, |_| {
            Err(CryptoError::InvalidNRatchet(99))
        });
        assert!(result.is_ok());
    }

    #[test]
    fn reject_offset_outside_chain() {
        let mut cache = KeyCache::new();
        let result = cache.key_for(&LogEntry::new(4, 7, 0, 0, 16), 4, load);
        assert!(matches!(
            result,
            Err(CryptoError::RatchetOffsetOutOfRange { ratchet_offset: 4, nratchet: 4 })
        ));
    }
}
