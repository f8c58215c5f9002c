//! Keystream file header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    CHUNK_SIZE,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte header at the start of a keystream file (Little Endian)
///
/// `burnt` is the byte offset below which every chunk has been overwritten
/// with fresh randomness. It never points inside the header and always
/// lands on a chunk boundary.
///
/// # Invariants
///
/// - `burnt >= KeyFileHeader::SIZE`
/// - `(burnt - KeyFileHeader::SIZE) % CHUNK_SIZE == 0`
/// - `burnt` is monotonically non-decreasing over the life of the file
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct KeyFileHeader {
    magic: [u8; 8], // u64 seal identifier, shared with the log header
    burnt: [u8; 8], // u64 destruction watermark
}

impl KeyFileHeader {
    /// Size of the serialized header (16 bytes)
    pub const SIZE: usize = 16;

    /// Header for a freshly provisioned keystream: nothing burnt yet.
    #[must_use]
    pub fn new(magic: u64) -> Self {
        Self { magic: magic.to_le_bytes(), burnt: (Self::SIZE as u64).to_le_bytes() }
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::TooShort` if fewer than 16 bytes are available
    /// - `ProtocolError::InvalidBurnt` if the watermark points into the
    ///   header or between chunk boundaries
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::TooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        let burnt = header.burnt();
        if burnt < Self::SIZE as u64 || (burnt - Self::SIZE as u64) % CHUNK_SIZE as u64 != 0 {
            return Err(ProtocolError::InvalidBurnt(burnt));
        }

        Ok(header)
    }

    /// Serialize header to bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Seal identifier.
    #[must_use]
    pub fn magic(&self) -> u64 {
        u64::from_le_bytes(self.magic)
    }

    /// Destruction watermark.
    #[must_use]
    pub fn burnt(&self) -> u64 {
        u64::from_le_bytes(self.burnt)
    }

    /// Number of chunks below the watermark.
    #[must_use]
    pub fn burnt_chunks(&self) -> u64 {
        self.burnt().saturating_sub(Self::SIZE as u64) / CHUNK_SIZE as u64
    }

    /// Move the destruction watermark.
    pub fn set_burnt(&mut self, burnt: u64) {
        self.burnt = burnt.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for KeyFileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFileHeader")
            .field("magic", &format!("{:#018x}", self.magic()))
            .field("burnt", &self.burnt())
            .finish()
    }
}

impl PartialEq for KeyFileHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for KeyFileHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<KeyFileHeader>(), KeyFileHeader::SIZE);
    }

    #[test]
    fn fresh_header_has_nothing_burnt() {
        let header = KeyFileHeader::new(0xDEAD_BEEF);
        assert_eq!(header.burnt(), 16);
        assert_eq!(header.burnt_chunks(), 0);
        assert_eq!(header.magic(), 0xDEAD_BEEF);
    }

    #[test]
    fn layout_is_little_endian() {
        let mut header = KeyFileHeader::new(1);
        header.set_burnt(48);
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 48);
        assert!(bytes[1..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn reject_short_buffer() {
        let result = KeyFileHeader::from_bytes(&[0u8; 10]);
        assert_eq!(result, Err(ProtocolError::TooShort { expected: 16, actual: 10 }));
    }

    #[test]
    fn reject_burnt_inside_header() {
        let mut header = KeyFileHeader::new(7);
        header.set_burnt(8);
        let bytes = header.to_bytes();
        assert_eq!(KeyFileHeader::from_bytes(&bytes), Err(ProtocolError::InvalidBurnt(8)));
    }

    proptest! {
        #[test]
        fn aligned_watermarks_parse(magic in any::<u64>(), chunks in 0u64..1 << 40) {
            let mut header = KeyFileHeader::new(magic);
            header.set_burnt(16 + chunks * 32);
            let bytes = header.to_bytes();
            let parsed = KeyFileHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(parsed, &header);
            prop_assert_eq!(parsed.burnt_chunks(), chunks);
        }

        #[test]
        fn misaligned_watermarks_are_rejected(burnt in 16u64..1 << 40) {
            prop_assume!((burnt - 16) % 32 != 0);
            let mut header = KeyFileHeader::new(0);
            header.set_burnt(burnt);
            let bytes = header.to_bytes();
            prop_assert_eq!(
                KeyFileHeader::from_bytes(&bytes),
                Err(ProtocolError::InvalidBurnt(burnt))
            );
        }
    }
}
