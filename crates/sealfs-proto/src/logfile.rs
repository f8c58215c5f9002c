//! Sealed log header and entries.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    CHUNK_SIZE, FAKE_INODE, KeyFileHeader,
    errors::{ProtocolError, Result},
};

/// Fixed 8-byte header at the start of a log file (Little Endian)
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LogFileHeader {
    magic: [u8; 8],
}

impl LogFileHeader {
    /// Size of the serialized header (8 bytes)
    pub const SIZE: usize = 8;

    /// Header carrying the seal identifier.
    #[must_use]
    pub fn new(magic: u64) -> Self {
        Self { magic: magic.to_le_bytes() }
    }

    /// Parse a header from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0)
    }

    /// Serialize header to bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.magic
    }

    /// Seal identifier.
    #[must_use]
    pub fn magic(&self) -> u64 {
        u64::from_le_bytes(self.magic)
    }

    /// Check that this log was provisioned together with `keyfile`.
    pub fn ensure_matches(&self, keyfile: &KeyFileHeader) -> Result<()> {
        if self.magic() != keyfile.magic() {
            return Err(ProtocolError::MagicMismatch {
                keystream: keyfile.magic(),
                log: self.magic(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for LogFileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileHeader").field("magic", &format!("{:#018x}", self.magic())).finish()
    }
}

/// Fixed 72-byte log record (Little Endian)
///
/// Metadata fields come first, in the order they are fed to the
/// fingerprint, followed by the 32-byte fingerprint itself.
///
/// # Security
///
/// The fingerprint is an HMAC keyed with a one-time key, computed over the
/// five metadata fields and the payload bytes the entry describes. Changing
/// any field, or any byte of the sealed file in `[offset, offset + count)`,
/// invalidates it.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LogEntry {
    ratchet_offset: [u8; 8],     // u64 index in the ratchet chain
    inode: [u8; 8],              // u64 sealed file, FAKE_INODE for drain entries
    offset: [u8; 8],             // u64 byte offset of the write in the file
    count: [u8; 8],              // u64 byte count of the write
    key_offset: [u8; 8],         // u64 keystream offset of the seeding chunk
    fingerprint: [u8; CHUNK_SIZE], // HMAC-SHA256
}

impl LogEntry {
    /// Size of the serialized entry (72 bytes)
    pub const SIZE: usize = 72;

    /// Length of the metadata prefix covered by the fingerprint.
    pub const METADATA_SIZE: usize = 40;

    /// Entry with the given metadata and an all-zero fingerprint.
    #[must_use]
    pub fn new(ratchet_offset: u64, inode: u64, offset: u64, count: u64, key_offset: u64) -> Self {
        Self {
            ratchet_offset: ratchet_offset.to_le_bytes(),
            inode: inode.to_le_bytes(),
            offset: offset.to_le_bytes(),
            count: count.to_le_bytes(),
            key_offset: key_offset.to_le_bytes(),
            fingerprint: [0u8; CHUNK_SIZE],
        }
    }

    /// Synthetic entry used to consume the rest of a ratchet chain.
    #[must_use]
    pub fn fake(ratchet_offset: u64, key_offset: u64) -> Self {
        Self::new(ratchet_offset, FAKE_INODE, 0, 0, key_offset)
    }

    /// Parse an entry from the start of `bytes` (zero-copy).
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0)
    }

    /// Serialize entry to bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// The metadata fields exactly as they are fed to the fingerprint.
    #[must_use]
    pub fn metadata_bytes(&self) -> [u8; Self::METADATA_SIZE] {
        let mut arr = [0u8; Self::METADATA_SIZE];
        arr.copy_from_slice(&IntoBytes::as_bytes(self)[..Self::METADATA_SIZE]);
        arr
    }

    /// Index of the key in its ratchet chain.
    #[must_use]
    pub fn ratchet_offset(&self) -> u64 {
        u64::from_le_bytes(self.ratchet_offset)
    }

    /// Inode of the sealed file.
    #[must_use]
    pub fn inode(&self) -> u64 {
        u64::from_le_bytes(self.inode)
    }

    /// Offset of the write in the sealed file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from_le_bytes(self.offset)
    }

    /// Number of bytes written.
    #[must_use]
    pub fn count(&self) -> u64 {
        u64::from_le_bytes(self.count)
    }

    /// Keystream offset of the chunk that seeded the chain.
    #[must_use]
    pub fn key_offset(&self) -> u64 {
        u64::from_le_bytes(self.key_offset)
    }

    /// Stored fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &[u8; CHUNK_SIZE] {
        &self.fingerprint
    }

    /// Whether this is a drain entry with no payload.
    #[must_use]
    pub fn is_fake(&self) -> bool {
        self.inode() == FAKE_INODE
    }

    /// End of the byte range this entry covers, saturating.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset().saturating_add(self.count())
    }

    /// Store the fingerprint.
    pub fn set_fingerprint(&mut self, fingerprint: [u8; CHUNK_SIZE]) {
        self.fingerprint = fingerprint;
    }

    /// Update the ratchet offset.
    pub fn set_ratchet_offset(&mut self, ratchet_offset: u64) {
        self.ratchet_offset = ratchet_offset.to_le_bytes();
    }

    /// Update the inode.
    pub fn set_inode(&mut self, inode: u64) {
        self.inode = inode.to_le_bytes();
    }

    /// Update the file offset.
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset.to_le_bytes();
    }

    /// Update the byte count.
    pub fn set_count(&mut self, count: u64) {
        self.count = count.to_le_bytes();
    }

    /// Update the key offset.
    pub fn set_key_offset(&mut self, key_offset: u64) {
        self.key_offset = key_offset.to_le_bytes();
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[ratchetoffset: {} ", self.ratchet_offset())?;
        if self.is_fake() {
            write!(f, "inode: SEAL ")?;
        } else {
            write!(f, "inode: {} ", self.inode())?;
        }
        write!(
            f,
            "offset: {} count: {} koffset: {}]",
            self.offset(),
            self.count(),
            self.key_offset()
        )
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEntry")
            .field("ratchet_offset", &self.ratchet_offset())
            .field("inode", &self.inode())
            .field("offset", &self.offset())
            .field("count", &self.count())
            .field("key_offset", &self.key_offset())
            .finish_non_exhaustive()
    }
}

impl PartialEq for LogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for LogEntry {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for LogEntry {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (
                any::<u64>(),              // ratchet_offset
                any::<u64>(),              // inode
                any::<u64>(),              // offset
                any::<u64>(),              // count
                any::<u64>(),              // key_offset
                any::<[u8; CHUNK_SIZE]>(), // fingerprint
            )
                .prop_map(|(roff, inode, offset, count, koff, fingerprint)| {
                    let mut entry = Self::new(roff, inode, offset, count, koff);
                    entry.set_fingerprint(fingerprint);
                    entry
                })
                .boxed()
        }
    }

    #[test]
    fn entry_size() {
        assert_eq!(std::mem::size_of::<LogEntry>(), LogEntry::SIZE);
        assert_eq!(std::mem::size_of::<LogFileHeader>(), LogFileHeader::SIZE);
    }

    #[test]
    fn metadata_prefix_is_field_order() {
        let entry = LogEntry::new(1, 2, 3, 4, 5);
        let meta = entry.metadata_bytes();
        for (i, expected) in (1u64..=5).enumerate() {
            let field: [u8; 8] = meta[i * 8..(i + 1) * 8].try_into().expect("8 bytes");
            assert_eq!(u64::from_le_bytes(field), expected);
        }
    }

    #[test]
    fn fake_entry_is_marked() {
        let entry = LogEntry::fake(3, 48);
        assert!(entry.is_fake());
        assert_eq!(entry.count(), 0);
        assert_eq!(entry.to_string(), "[ratchetoffset: 3 inode: SEAL offset: 0 count: 0 koffset: 48]");
    }

    #[test]
    fn display_names_real_inode() {
        let entry = LogEntry::new(1, 7, 10, 20, 16);
        assert_eq!(entry.to_string(), "[ratchetoffset: 1 inode: 7 offset: 10 count: 20 koffset: 16]");
    }

    #[test]
    fn reject_short_entry() {
        let result = LogEntry::from_bytes(&[0u8; 71]);
        assert_eq!(result, Err(ProtocolError::TooShort { expected: 72, actual: 71 }));
    }

    #[test]
    fn magic_mismatch_is_detected() {
        let log = LogFileHeader::new(1);
        assert!(log.ensure_matches(&KeyFileHeader::new(1)).is_ok());
        assert_eq!(
            log.ensure_matches(&KeyFileHeader::new(2)),
            Err(ProtocolError::MagicMismatch { keystream: 2, log: 1 })
        );
    }

    proptest! {
        #[test]
        fn entry_round_trip(entry in any::<LogEntry>()) {
            let bytes = entry.to_bytes();
            let parsed = LogEntry::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&entry, parsed);
        }

        #[test]
        fn end_never_wraps(offset in any::<u64>(), count in any::<u64>()) {
            let entry = LogEntry::new(0, 1, offset, count, 16);
            prop_assert!(entry.end() >= entry.offset());
        }
    }
}
