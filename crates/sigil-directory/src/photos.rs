//! Managed photo directory.
//!
//! Every photo referenced by a details object lives as a flat file inside one
//! directory, named by a fresh UUID. Files are shared through hard links so
//! that dropping one reference never removes content another details object
//! still points to. The store itself never deletes a referenced file: removals
//! are scheduled on the transaction and executed after commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DirectoryError, Result};

/// How a file outside the managed directory enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Always hard-link; the source file stays where it is.
    Link,
    /// Hard-link files already inside the managed directory, move the others.
    LinkOrMove,
}

#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let dir = dir.canonicalize()?;

        info!(path = %dir.display(), "Photo store initialized");

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// A path inside the managed directory that no file currently uses.
    pub fn fresh_path(&self) -> PathBuf {
        loop {
            let candidate = self.dir.join(Uuid::new_v4().to_string());
            if !candidate.exists() {
                return candidate;
            }
        }
    }

    pub fn is_managed(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        match parent.canonicalize() {
            Ok(parent) => parent == self.dir,
            Err(_) => false,
        }
    }

    /// Write raw bytes to a fresh scratch file inside the managed directory.
    pub fn write_scratch(&self, data: &[u8]) -> Result<PathBuf> {
        let path = self.fresh_path();
        fs::write(&path, data)?;
        Ok(path)
    }

    /// Bring `source` into the managed directory under a fresh name and
    /// return that name.
    pub fn import(&self, source: &Path, mode: ImportMode) -> Result<String> {
        if !source.is_file() {
            return Err(DirectoryError::FilesystemInconsistency(source.to_path_buf()));
        }

        let target = self.fresh_path();
        if mode == ImportMode::Link || self.is_managed(source) {
            fs::hard_link(source, &target)?;
        } else {
            move_file(source, &target)?;
        }

        debug!(source = %source.display(), target = %target.display(), ?mode, "Photo imported");

        file_name(&target)
    }

    /// Undo an import: put a moved file back at `origin`, or drop the link.
    pub fn undo_import(&self, stored: &Path, origin: Option<&Path>) -> io::Result<()> {
        match origin {
            Some(origin) => move_file(stored, origin),
            None => self.remove(stored),
        }
    }

    /// Resolve a stored file name, failing when the file is gone.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = self.path_for(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(DirectoryError::FilesystemInconsistency(path))
        }
    }

    /// Names of every file currently in the managed directory.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a file, treating "already gone" as success.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Photo already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Compare two files byte for byte. Unreadable files never compare equal.
pub fn contents_equal(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) if ma.len() == mb.len() => {}
        _ => return false,
    }
    match (fs::read(a), fs::read(b)) {
        (Ok(da), Ok(db)) => da == db,
        _ => false,
    }
}

fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    // Different filesystems: fall back to copy then remove.
    fs::copy(source, target)?;
    fs::remove_file(source)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DirectoryError::FilesystemInconsistency(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_store() -> (PhotoStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = PhotoStore::new(dir.path().join("photos")).unwrap();
        (store, dir)
    }

    #[test]
    fn fresh_paths_are_distinct_and_unused() {
        let (store, _dir) = test_store();
        let a = store.fresh_path();
        let b = store.fresh_path();
        assert_ne!(a, b);
        assert!(!a.exists());
        assert!(store.is_managed(&a));
    }

    #[test]
    fn import_links_managed_files() {
        let (store, _dir) = test_store();
        let scratch = store.write_scratch(b"jpeg").unwrap();

        let name = store.import(&scratch, ImportMode::LinkOrMove).unwrap();

        assert!(scratch.exists(), "managed source must be linked, not moved");
        assert!(contents_equal(&scratch, &store.path_for(&name)));
    }

    #[test]
    fn import_moves_external_files() {
        let (store, dir) = test_store();
        let external = dir.path().join("external.jpg");
        fs::write(&external, b"png").unwrap();

        let name = store.import(&external, ImportMode::LinkOrMove).unwrap();

        assert!(!external.exists());
        assert_eq!(fs::read(store.path_for(&name)).unwrap(), b"png");
    }

    #[test]
    fn import_link_mode_keeps_external_files() {
        let (store, dir) = test_store();
        let external = dir.path().join("external.jpg");
        fs::write(&external, b"png").unwrap();

        store.import(&external, ImportMode::Link).unwrap();

        assert!(external.exists());
    }

    #[test]
    fn import_missing_source_is_inconsistency() {
        let (store, dir) = test_store();
        let result = store.import(&dir.path().join("nope"), ImportMode::Link);
        assert!(matches!(result, Err(DirectoryError::FilesystemInconsistency(_))));
    }

    #[test]
    fn removing_one_link_keeps_the_other() {
        let (store, _dir) = test_store();
        let scratch = store.write_scratch(b"shared").unwrap();
        let a = store.import(&scratch, ImportMode::Link).unwrap();
        let b = store.import(&scratch, ImportMode::Link).unwrap();

        store.remove(&store.path_for(&a)).unwrap();

        assert_eq!(fs::read(store.resolve(&b).unwrap()).unwrap(), b"shared");
        assert!(store.resolve(&a).is_err());
    }

    #[test]
    fn contents_equal_compares_bytes() {
        let (store, _dir) = test_store();
        let a = store.write_scratch(b"one").unwrap();
        let b = store.write_scratch(b"one").unwrap();
        let c = store.write_scratch(b"two").unwrap();
        assert!(contents_equal(&a, &b));
        assert!(!contents_equal(&a, &c));
    }
}
