//! Raw file bytes keyed by storage key.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;

use crate::errors::{RippleError, RippleResult};

pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, data: &[u8]) -> RippleResult<()>;

    /// `RippleError::NotFound` when the key is absent.
    fn get(&self, key: &str) -> RippleResult<Vec<u8>>;

    fn exists(&self, key: &str) -> RippleResult<bool>;

    fn delete(&self, key: &str) -> RippleResult<()>;
}

/// Storage key for the uploaded content of a project file.
pub fn file_key(project_id: &str, path: &str) -> String {
    format!("projects/{project_id}/files/{path}")
}

/// Storage key for content promoted by an approval. Each revision gets its
/// own key so earlier snapshots keep pointing at their bytes.
pub fn revision_key(project_id: &str, revision: &str, path: &str) -> String {
    format!("projects/{project_id}/revisions/{revision}/{path}")
}

/// Process-local store, used by tests and benches.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> RippleResult<()> {
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> RippleResult<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RippleError::NotFound(format!("object {key}")))
    }

    fn exists(&self, key: &str) -> RippleResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    fn delete(&self, key: &str) -> RippleResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}

/// Objects stored as files under a root directory.
pub struct LocalDirObjectStore {
    root: PathBuf,
}

impl LocalDirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> RippleResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Keys are relative paths; anything that would escape the root is
    /// rejected.
    fn path_for(&self, key: &str) -> RippleResult<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(RippleError::Storage(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalDirObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> RippleResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    fn get(&self, key: &str) -> RippleResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RippleError::NotFound(format!("object {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> RippleResult<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> RippleResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
