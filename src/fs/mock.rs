// src/fs/mock.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use super::FileSystem;

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { content: Vec<u8>, modified: SystemTime },
    Dir(Vec<String>), // List of child names
}

/// In-memory [`FileSystem`] for tests.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    on_exit: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        // Ensure root exists
        files.insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            on_exit: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut files = self.files.lock();
        files.insert(
            path.clone(),
            MockEntry::File {
                content: content.into(),
                modified: SystemTime::now(),
            },
        );

        let parent = parent_of(&path);
        ensure_dir_entry(&mut files, &parent);
        add_child(&mut files, &parent, &path);
    }

    fn with_file<T>(&self, path: &Path, f: impl FnOnce(&[u8], SystemTime) -> T) -> Result<T> {
        let files = self.files.lock();
        match files.get(path) {
            Some(MockEntry::File { content, modified }) => Ok(f(content, *modified)),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn ensure_dir_entry(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    if files.contains_key(path) {
        return;
    }
    files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));

    let parent = parent_of(path);
    if parent != path {
        // Avoid infinite loop at root
        ensure_dir_entry(files, &parent);
        add_child(files, &parent, path);
    }
}

fn add_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
    if let (Some(MockEntry::Dir(children)), Some(name)) = (
        files.get_mut(parent),
        child.file_name().and_then(|n| n.to_str()),
    ) {
        if !children.iter().any(|c| c == name) {
            children.push(name.to_string());
        }
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.files.lock().get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.files.lock().get(path), Some(MockEntry::Dir(_)))
    }

    fn can_read(&self, path: &Path) -> bool {
        self.exists(path)
    }

    fn can_write(&self, _path: &Path) -> bool {
        true
    }

    fn can_execute(&self, path: &Path) -> bool {
        self.is_file(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.with_file(path, |content, _| content.to_vec())
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn size(&self, path: &Path) -> Result<u64> {
        self.with_file(path, |content, _| content.len() as u64)
    }

    fn last_modified(&self, path: &Path) -> Result<SystemTime> {
        self.with_file(path, |_, modified| modified)
    }

    fn list(&self, path: &Path) -> Result<Vec<String>> {
        match self.files.lock().get(path) {
            Some(MockEntry::Dir(children)) => {
                let mut names = children.clone();
                names.sort();
                Ok(names)
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock();
        match files.get(path) {
            Some(MockEntry::Dir(children)) if !children.is_empty() => {
                return Err(anyhow!("Directory not empty: {:?}", path));
            }
            Some(_) => {}
            None => return Err(anyhow!("File not found: {:?}", path)),
        }
        files.remove(path);

        let parent = parent_of(path);
        if let (Some(MockEntry::Dir(children)), Some(name)) = (
            files.get_mut(&parent),
            path.file_name().and_then(|n| n.to_str()),
        ) {
            children.retain(|c| c != name);
        }
        Ok(())
    }

    fn mkdirs(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(MockEntry::File { .. }) = files.get(path) {
            return Err(anyhow!("Is a file: {:?}", path));
        }
        ensure_dir_entry(&mut files, path);
        Ok(())
    }

    fn delete_on_exit(&self, path: &Path) {
        self.on_exit.lock().push(path.to_path_buf());
    }

    fn cleanup(&self) {
        let paths = std::mem::take(&mut *self.on_exit.lock());
        for path in paths {
            let _ = self.delete(&path);
        }
    }
}
