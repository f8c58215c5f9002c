//! Sealed tree discovery.

use std::{
    collections::HashMap,
    fs::{self, File},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use crate::{error::VerifyError, reorder::FileCursor};

/// Inode renumbering for files copied or restored since they were sealed.
///
/// Maps the inode a file has now to the inode its log entries name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renames(HashMap<u64, u64>);

impl Renames {
    /// No renames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sealed inode for a file currently at `inode`.
    pub fn resolve(&self, inode: u64) -> u64 {
        self.0.get(&inode).copied().unwrap_or(inode)
    }
}

impl FromIterator<(u64, u64)> for Renames {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A sealed file opened for payload reads.
#[derive(Debug)]
pub struct OpenFile {
    /// Where the file was found
    pub path: PathBuf,
    /// Read handle
    pub file: File,
    /// Offset tracking and reorder state
    pub cursor: FileCursor,
}

/// Open every regular file under `root`, keyed by sealed inode.
///
/// Names starting with `.` are skipped at every level, which also skips
/// the default log. `log_path` is skipped in case it was given a plain
/// name.
pub fn scan_tree(
    root: &Path,
    log_path: &Path,
    renames: &Renames,
    reorder_capacity: usize,
) -> Result<HashMap<u64, OpenFile>, VerifyError> {
    let mut files = HashMap::new();
    scan_dir(root, log_path, renames, reorder_capacity, &mut files)?;
    Ok(files)
}

fn scan_dir(
    dir: &Path,
    log_path: &Path,
    renames: &Renames,
    reorder_capacity: usize,
    files: &mut HashMap<u64, OpenFile>,
) -> Result<(), VerifyError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| VerifyError::Io(format!("read directory {}: {e}", dir.display())))?;

    for dirent in entries {
        let dirent = dirent?;
        if dirent.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = dirent.path();
        let file_type = dirent.file_type()?;

        if file_type.is_dir() {
            scan_dir(&path, log_path, renames, reorder_capacity, files)?;
        } else if file_type.is_file() && path != log_path {
            let file = File::open(&path)
                .map_err(|e| VerifyError::Io(format!("open {}: {e}", path.display())))?;
            let inode = renames.resolve(file.metadata()?.ino());
            tracing::debug!(inode, path = %path.display(), "sealed file");
            files.insert(inode, OpenFile { path, file, cursor: FileCursor::new(inode, reorder_capacity) });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_hidden_names_and_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir(root.join("sub")).expect("mkdir");
        fs::create_dir(root.join(".snap")).expect("mkdir");
        fs::write(root.join("a"), b"a").expect("write");
        fs::write(root.join("sub/b"), b"b").expect("write");
        fs::write(root.join(".snap/c"), b"c").expect("write");
        fs::write(root.join("audit.log"), b"log").expect("write");

        let files =
            scan_tree(root, &root.join("audit.log"), &Renames::new(), 8).expect("scan");
        let mut names: Vec<_> =
            files.values().map(|f| f.path.strip_prefix(root).expect("under root").to_path_buf()).collect();
        names.sort();
        assert_eq!(names, vec![PathBuf::from("a"), PathBuf::from("sub/b")]);
    }

    #[test]
    fn renamed_file_is_keyed_by_sealed_inode() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a"), b"a").expect("write");
        let now = fs::metadata(dir.path().join("a")).expect("stat").ino();

        let renames: Renames = [(now, 42)].into_iter().collect();
        let files = scan_tree(dir.path(), &dir.path().join(".log"), &renames, 8).expect("scan");
        assert!(files.contains_key(&42));
        assert_eq!(files[&42].cursor.inode(), 42);
    }
}
