//! Entry fingerprints.
//!
//! `HMAC(K(i), ratchet_offset ‖ inode ‖ offset ‖ count ‖ key_offset ‖ payload)`
//! with every integer encoded as little-endian `u64`.

use hmac::{Hmac, Mac};
use sealfs_proto::LogEntry;
use sha2::Sha256;

use crate::subkey::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Streaming fingerprint over an entry's metadata and payload.
///
/// The verifier feeds payload bytes straight from the sealed file in
/// pieces, so the MAC state is kept open until the caller is done.
pub struct Fingerprinter {
    mac: HmacSha256,
}

impl Fingerprinter {
    /// Start a fingerprint for `entry`; its metadata is absorbed immediately.
    pub fn new(key: &[u8; KEY_SIZE], entry: &LogEntry) -> Self {
        let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(&entry.metadata_bytes());
        Self { mac }
    }

    /// Absorb the next slice of payload.
    pub fn update(&mut self, payload: &[u8]) {
        self.mac.update(payload);
    }

    /// Finish and return the fingerprint.
    pub fn finalize(self) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&self.mac.finalize().into_bytes());
        out
    }

    /// Finish and compare against `expected` in constant time.
    pub fn verify(self, expected: &[u8; KEY_SIZE]) -> bool {
        self.mac.verify_slice(expected).is_ok()
    }
}

/// One-shot fingerprint of `entry` and `payload`.
pub fn fingerprint(key: &[u8; KEY_SIZE], entry: &LogEntry, payload: &[u8]) -> [u8; KEY_SIZE] {
    let mut fp = Fingerprinter::new(key, entry);
    fp.update(payload);
    fp.finalize()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];

    #[test]
    fn streaming_matches_one_shot() {
        let entry = LogEntry::new(2, 7, 10, 20, 16);
        let payload = [0xAB; 20];

        let mut fp = Fingerprinter::new(&KEY, &entry);
        fp.update(&payload[..5]);
        fp.update(&payload[5..]);
        assert_eq!(fp.finalize(), fingerprint(&KEY, &entry, &payload));
    }

    #[test]
    fn verify_accepts_own_fingerprint() {
        let mut entry = LogEntry::new(0, 7, 0, 3, 16);
        entry.set_fingerprint(fingerprint(&KEY, &entry, b"abc"));

        let mut fp = Fingerprinter::new(&KEY, &entry);
        fp.update(b"abc");
        assert!(fp.verify(entry.fingerprint()));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let entry = LogEntry::new(0, 7, 0, 3, 16);
        let fpr = fingerprint(&KEY, &entry, b"abc");

        let mut fp = Fingerprinter::new(&[0u8; KEY_SIZE], &entry);
        fp.update(b"abc");
        assert!(!fp.verify(&fpr));
    }

    proptest! {
        #[test]
        fn any_metadata_bit_flip_changes_fingerprint(
            field in 0usize..5,
            bit in 0u32..64,
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let entry = LogEntry::new(1, 7, 10, payload.len() as u64, 48);
            let original = fingerprint(&KEY, &entry, &payload);

            let mut tampered = entry;
            let flip = 1u64 << bit;
            match field {
                0 => tampered.set_ratchet_offset(entry.ratchet_offset() ^ flip),
                1 => tampered.set_inode(entry.inode() ^ flip),
                2 => tampered.set_offset(entry.offset() ^ flip),
                3 => tampered.set_count(entry.count() ^ flip),
                _ => tampered.set_key_offset(entry.key_offset() ^ flip),
            }
            prop_assert_ne!(original, fingerprint(&KEY, &tampered, &payload));
        }

        #[test]
        fn any_payload_bit_flip_changes_fingerprint(
            payload in prop::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let entry = LogEntry::new(0, 7, 0, payload.len() as u64, 16);
            let original = fingerprint(&KEY, &entry, &payload);

            let mut tampered = payload.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= 1 << bit;
            prop_assert_ne!(original, fingerprint(&KEY, &entry, &tampered));
        }
    }
}
