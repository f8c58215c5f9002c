//! File-backed keystream.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
};

use sealfs_proto::{CHUNK_SIZE, KeyFileHeader};
use zeroize::Zeroizing;

use super::{Chunk, KeyStore};
use crate::error::SealError;

/// Keystream stored in a regular file, accessed with positional I/O.
pub struct FileKeyStore {
    file: File,
}

impl FileKeyStore {
    /// Open an existing keystream for reading and burning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SealError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SealError::Io(format!("open keystream {}: {e}", path.display())))?;
        let store = Self { file };

        // Reject garbage before anyone reads key material from it
        store.header()?;
        Ok(store)
    }
}

impl KeyStore for FileKeyStore {
    fn header(&self) -> Result<KeyFileHeader, SealError> {
        let mut buf = [0u8; KeyFileHeader::SIZE];
        self.file.read_exact_at(&mut buf, 0)?;
        Ok(*KeyFileHeader::from_bytes(&buf)?)
    }

    fn size(&self) -> Result<u64, SealError> {
        Ok(self.file.metadata()?.len())
    }

    fn read_chunk(&self, offset: u64) -> Result<Chunk, SealError> {
        let len = self.size()?;
        if offset.saturating_add(CHUNK_SIZE as u64) > len {
            return Err(SealError::KeystreamExhausted { offset, len });
        }

        let mut chunk = Zeroizing::new([0u8; CHUNK_SIZE]);
        match self.file.read_exact_at(&mut chunk[..], offset) {
            Ok(()) => Ok(chunk),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(SealError::KeystreamExhausted { offset, len })
            },
            Err(e) => Err(e.into()),
        }
    }

    fn overwrite(&self, offset: u64, bytes: &[u8]) -> Result<(), SealError> {
        self.file.write_all_at(bytes, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<(), SealError> {
        self.file.sync_data()?;
        Ok(())
    }

    fn write_header(&self, header: &KeyFileHeader) -> Result<(), SealError> {
        self.file.write_all_at(&header.to_bytes(), 0)?;
        Ok(())
    }
}
