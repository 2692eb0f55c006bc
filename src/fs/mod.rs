// src/fs/mod.rs

//! Data-source capability interface.
//!
//! The interpreter and the checkpoint controller only talk to a
//! [`FileSystem`]; whether the bytes live on the local disk or somewhere
//! that needs a download first is the implementation's business.

use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub mod mock;

/// Abstract data-source interface.
pub trait FileSystem: Send + Sync + Debug {
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn can_read(&self, path: &Path) -> bool;
    fn can_write(&self, path: &Path) -> bool;
    fn can_execute(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write `contents`, creating parent directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn size(&self, path: &Path) -> Result<u64>;
    fn last_modified(&self, path: &Path) -> Result<SystemTime>;

    /// Names of the entries in a directory (not full paths).
    fn list(&self, path: &Path) -> Result<Vec<String>>;

    fn delete(&self, path: &Path) -> Result<()>;
    fn mkdirs(&self, path: &Path) -> Result<()>;

    /// Remember `path` for deletion when [`FileSystem::cleanup`] runs.
    fn delete_on_exit(&self, path: &Path);

    /// Delete everything registered with [`FileSystem::delete_on_exit`].
    fn cleanup(&self);

    /// Remote variants report whether a local copy exists. Local data is
    /// always "downloaded".
    fn is_downloaded(&self, _path: &Path) -> bool {
        true
    }

    fn download(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn upload(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Implementation that uses `std::fs`.
///
/// Relative paths are resolved against `base_dir` when one is set, and
/// against the process working directory otherwise.
#[derive(Debug, Default)]
pub struct RealFileSystem {
    base_dir: Option<PathBuf>,
    on_exit: Mutex<Vec<PathBuf>>,
}

impl RealFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            on_exit: Mutex::new(Vec::new()),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn can_read(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        if path.is_dir() {
            return fs::read_dir(&path).is_ok();
        }
        fs::File::open(&path).is_ok()
    }

    fn can_write(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        match fs::metadata(&path) {
            Ok(meta) => !meta.permissions().readonly(),
            // A file that does not exist yet is writable if its directory is.
            Err(_) => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| fs::metadata(p).map(|m| !m.permissions().readonly()).unwrap_or(false))
                .unwrap_or(true),
        }
    }

    #[cfg(unix)]
    fn can_execute(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(self.resolve(path))
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn can_execute(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        fs::read(&path).with_context(|| format!("reading file {:?}", path))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let path = self.resolve(path);
        fs::read_to_string(&path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file =
            fs::File::create(&path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents)
            .with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let path = self.resolve(path);
        let meta = fs::metadata(&path).with_context(|| format!("stat {:?}", path))?;
        Ok(meta.len())
    }

    fn last_modified(&self, path: &Path) -> Result<SystemTime> {
        let path = self.resolve(path);
        let meta = fs::metadata(&path).with_context(|| format!("stat {:?}", path))?;
        meta.modified()
            .with_context(|| format!("reading modification time of {:?}", path))
    }

    fn list(&self, path: &Path) -> Result<Vec<String>> {
        let path = self.resolve(path);
        let mut names = Vec::new();
        for entry in fs::read_dir(&path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let path = self.resolve(path);
        if path.is_dir() {
            fs::remove_dir(&path).with_context(|| format!("removing dir {:?}", path))
        } else {
            fs::remove_file(&path).with_context(|| format!("removing file {:?}", path))
        }
    }

    fn mkdirs(&self, path: &Path) -> Result<()> {
        let path = self.resolve(path);
        fs::create_dir_all(&path).with_context(|| format!("creating dir {:?}", path))
    }

    fn delete_on_exit(&self, path: &Path) {
        self.on_exit.lock().push(path.to_path_buf());
    }

    fn cleanup(&self) {
        let paths = std::mem::take(&mut *self.on_exit.lock());
        for path in paths {
            match self.delete(&path) {
                Ok(()) => debug!(path = ?path, "deleted on exit"),
                Err(e) => warn!(path = ?path, error = %e, "failed to delete file on exit"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem::with_base_dir(dir.path());

        fs.write(Path::new("sub/out.txt"), b"hello").unwrap();

        assert!(dir.path().join("sub/out.txt").is_file());
        assert_eq!(fs.read_to_string(Path::new("sub/out.txt")).unwrap(), "hello");
        assert_eq!(fs.size(Path::new("sub/out.txt")).unwrap(), 5);
        assert_eq!(fs.list(Path::new("sub")).unwrap(), vec!["out.txt"]);
        assert!(fs.can_read(Path::new("sub/out.txt")));
        assert!(fs.can_write(Path::new("sub/new.txt")));
    }

    #[test]
    fn cleanup_removes_registered_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem::with_base_dir(dir.path());
        fs.write(Path::new("tmp.txt"), b"x").unwrap();

        fs.delete_on_exit(Path::new("tmp.txt"));
        assert!(fs.exists(Path::new("tmp.txt")));

        fs.cleanup();
        assert!(!fs.exists(Path::new("tmp.txt")));
    }
}
