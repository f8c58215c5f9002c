//! Append-only host adapter.
//!
//! A minimal stand-in for the filesystem interception layer: it owns a
//! directory, accepts appends to the files inside it, commits the payload,
//! and then seals it through the session. Anything that is not a pure
//! append is refused with a permission error.
//!
//! Offsets are reserved per inode under a short lock and the payload is
//! written outside it, so two appenders to the same file may seal their
//! entries in the opposite order of their offsets. The verifier's reorder
//! heap absorbs that. A payload write that fails gives its reservation
//! back when nothing was reserved after it; otherwise the file is left
//! with a hole no entry covers and further appends to it are refused.

use std::{
    collections::{HashMap, HashSet},
    fs::OpenOptions,
    os::unix::fs::{FileExt, MetadataExt},
    path::{Component, Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use sealfs_proto::{LogEntry, MAX_WRITE_COUNT};

use crate::{
    config::SessionConfig,
    error::SealError,
    keystore::{FileKeyStore, KeyStore},
    session::Session,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Reservations {
    /// Reserved end offset per inode
    ends: HashMap<u64, u64>,
    /// Inodes with an unwritten range behind a later reservation
    holed: HashSet<u64>,
}

impl Reservations {
    /// Undo the reservation of `[offset, offset + count)` if it is still
    /// the last one on `inode`. Returns false when a later reservation
    /// pinned the hole in place.
    fn release(&mut self, inode: u64, offset: u64, count: u64) -> bool {
        match self.ends.get_mut(&inode) {
            Some(end) if *end == offset + count => {
                *end = offset;
                true
            },
            _ => {
                self.holed.insert(inode);
                false
            },
        }
    }
}

/// A directory whose files may only grow, with every append sealed.
pub struct SealedTree<S: KeyStore = FileKeyStore> {
    config: SessionConfig,
    session: Session<S>,
    sizes: Mutex<Reservations>,
}

impl SealedTree<FileKeyStore> {
    /// Start a session over `config.tree_dir`.
    pub fn open(config: &SessionConfig) -> Result<Self, SealError> {
        let session = Session::open(config)?;
        Ok(Self::with_session(config, session))
    }
}

impl<S: KeyStore> SealedTree<S> {
    /// Wrap an already started session.
    pub fn with_session(config: &SessionConfig, session: Session<S>) -> Self {
        Self {
            config: config.clone(),
            session,
            sizes: Mutex::new(Reservations::default()),
        }
    }

    /// Root directory of the tree.
    pub fn root(&self) -> &Path {
        &self.config.tree_dir
    }

    /// The sealing session behind this tree.
    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Append `data` to `rel_path`, creating the file if needed. Returns
    /// the sealed entry.
    pub fn append(&self, rel_path: impl AsRef<Path>, data: &[u8]) -> Result<LogEntry, SealError> {
        self.write(rel_path.as_ref(), None, data)
    }

    /// Write `data` at `offset`. Only `offset == current size` is allowed.
    pub fn write_at(
        &self,
        rel_path: impl AsRef<Path>,
        offset: u64,
        data: &[u8],
    ) -> Result<LogEntry, SealError> {
        self.write(rel_path.as_ref(), Some(offset), data)
    }

    /// Drain the session; the tree accepts no further writes.
    pub fn close(&self) -> Result<(), SealError> {
        self.session.drain_and_seal()
    }

    fn write(&self, rel_path: &Path, at: Option<u64>, data: &[u8]) -> Result<LogEntry, SealError> {
        let path = self.resolve(rel_path)?;
        let count = data.len() as u64;
        if count > MAX_WRITE_COUNT {
            return Err(SealError::WriteTooLarge { count, max: MAX_WRITE_COUNT });
        }

        let file = OpenOptions::new().create(true).truncate(false).write(true).open(&path)?;
        let meta = file.metadata()?;
        let inode = meta.ino();

        let offset = {
            let mut sizes = lock(&self.sizes);
            if sizes.holed.contains(&inode) {
                return Err(SealError::PermissionDenied(format!(
                    "{} has an unwritten range from a failed append",
                    rel_path.display()
                )));
            }
            let end = sizes.ends.entry(inode).or_insert(meta.len());
            if let Some(requested) = at
                && requested != *end
            {
                tracing::info!(path = %rel_path.display(), requested, size = *end, "non-append write refused");
                return Err(SealError::PermissionDenied(format!(
                    "non append-only write to {} at offset {requested} (size {})",
                    rel_path.display(),
                    *end
                )));
            }
            let offset = *end;
            *end += count;
            offset
        };

        let written = file.write_all_at(data, offset).and_then(|()| {
            if self.config.sync_io { file.sync_data() } else { Ok(()) }
        });
        if let Err(e) = written {
            let released = lock(&self.sizes).release(inode, offset, count);
            tracing::warn!(
                path = %rel_path.display(),
                inode,
                offset,
                count,
                released,
                error = %e,
                "append failed before sealing"
            );
            return Err(e.into());
        }

        self.session.seal_write(inode, offset, count, data).inspect_err(|e| {
            tracing::error!(
                path = %rel_path.display(),
                inode,
                offset,
                count,
                error = %e,
                "data written but not sealed"
            );
        })
    }

    fn resolve(&self, rel_path: &Path) -> Result<PathBuf, SealError> {
        let mut hidden = false;
        for component in rel_path.components() {
            match component {
                Component::Normal(name) => {
                    hidden |= name.to_string_lossy().starts_with('.');
                },
                _ => {
                    return Err(SealError::PermissionDenied(format!(
                        "{} is not a plain relative path",
                        rel_path.display()
                    )));
                },
            }
        }
        let path = self.config.tree_dir.join(rel_path);
        if hidden || self.config.is_log_file(&path) || rel_path.as_os_str().is_empty() {
            return Err(SealError::PermissionDenied(format!(
                "{} cannot be sealed",
                rel_path.display()
            )));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_rewinds_the_last_reservation() {
        let mut sizes = Reservations::default();
        sizes.ends.insert(7, 30);

        assert!(sizes.release(7, 20, 10));
        assert_eq!(sizes.ends[&7], 20);
        assert!(sizes.holed.is_empty());
    }

    #[test]
    fn release_behind_a_later_reservation_marks_a_hole() {
        let mut sizes = Reservations::default();
        sizes.ends.insert(7, 40);

        assert!(!sizes.release(7, 20, 10));
        assert_eq!(sizes.ends[&7], 40);
        assert!(sizes.holed.contains(&7));
    }
}
