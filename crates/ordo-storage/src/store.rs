//! Durable object store.
//!
//! Pages, table metadata and B+ tree nodes are persisted as opaque framed
//! records keyed by a scope (a slash separated path built from table and
//! column names) and an object id within that scope.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use ordo_common::{OrdoError, Result};

/// Key-value persistence for framed records.
pub trait ObjectStore: Send + Sync {
    /// Writes an object, replacing any previous version.
    fn save(&self, scope: &str, object_id: &str, data: &[u8]) -> Result<()>;

    /// Reads an object, returning None if it does not exist.
    fn load(&self, scope: &str, object_id: &str) -> Result<Option<Bytes>>;

    /// Removes an object. Removing a missing object is not an error.
    fn remove(&self, scope: &str, object_id: &str) -> Result<()>;

    /// Applies every staged write of a batch in order.
    fn apply(&self, batch: WriteBatch) -> Result<()> {
        for op in batch.ops {
            match op {
                BatchOp::Put {
                    scope,
                    object_id,
                    data,
                } => self.save(&scope, &object_id, &data)?,
                BatchOp::Remove { scope, object_id } => self.remove(&scope, &object_id)?,
            }
        }
        Ok(())
    }
}

/// A staged write.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        scope: String,
        object_id: String,
        data: Bytes,
    },
    Remove {
        scope: String,
        object_id: String,
    },
}

/// Writes staged during one logical operation and applied together.
///
/// Later writes to the same object supersede earlier ones when applied.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an object write.
    pub fn put(&mut self, scope: &str, object_id: impl Into<String>, data: Bytes) {
        self.ops.push(BatchOp::Put {
            scope: scope.to_string(),
            object_id: object_id.into(),
            data,
        });
    }

    /// Stages an object removal.
    pub fn remove(&mut self, scope: &str, object_id: impl Into<String>) {
        self.ops.push(BatchOp::Remove {
            scope: scope.to_string(),
            object_id: object_id.into(),
        });
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the staged operations.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Configuration for the disk store.
#[derive(Debug, Clone)]
pub struct DiskStoreConfig {
    /// Base directory; each scope becomes a subdirectory.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Directory-keyed store: one file per object.
///
/// Objects are written to a temporary file and renamed into place so a
/// reader never observes a half-written record.
pub struct DiskStore {
    config: DiskStoreConfig,
}

impl DiskStore {
    /// File extension of stored objects.
    const EXTENSION: &'static str = "obj";

    /// Creates a new disk store rooted at `config.data_dir`.
    pub fn new(config: DiskStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Maps a `/`-separated scope to a directory under `data_dir`. Segments
    /// that could name a directory outside it are rejected.
    fn scope_dir(&self, scope: &str) -> Result<PathBuf> {
        let mut dir = self.config.data_dir.clone();
        for part in scope.split('/') {
            check_segment("scope", scope, part)?;
            dir.push(part);
        }
        Ok(dir)
    }

    fn object_path(&self, scope: &str, object_id: &str) -> Result<PathBuf> {
        check_segment("object_id", object_id, object_id)?;
        Ok(self
            .scope_dir(scope)?
            .join(format!("{}.{}", object_id, Self::EXTENSION)))
    }
}

fn check_segment(name: &str, value: &str, segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(OrdoError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

impl ObjectStore for DiskStore {
    fn save(&self, scope: &str, object_id: &str, data: &[u8]) -> Result<()> {
        let dir = self.scope_dir(scope)?;
        fs::create_dir_all(&dir)?;

        let path = self.object_path(scope, object_id)?;
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(data)?;
            if self.config.fsync_enabled {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn load(&self, scope: &str, object_id: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(scope, object_id)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Some(Bytes::from(buf)))
    }

    fn remove(&self, scope: &str, object_id: &str) -> Result<()> {
        match fs::remove_file(self.object_path(scope, object_id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Lists object ids stored under a scope, sorted.
    pub fn object_ids(&self, scope: &str) -> Vec<String> {
        let objects = self.objects.lock();
        let mut ids: Vec<String> = objects
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl ObjectStore for MemoryStore {
    fn save(&self, scope: &str, object_id: &str, data: &[u8]) -> Result<()> {
        self.objects.lock().insert(
            (scope.to_string(), object_id.to_string()),
            Bytes::copy_from_slice(data),
        );
        Ok(())
    }

    fn load(&self, scope: &str, object_id: &str) -> Result<Option<Bytes>> {
        Ok(self
            .objects
            .lock()
            .get(&(scope.to_string(), object_id.to_string()))
            .cloned())
    }

    fn remove(&self, scope: &str, object_id: &str) -> Result<()> {
        self.objects
            .lock()
            .remove(&(scope.to_string(), object_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_disk_store() -> (DiskStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskStoreConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        (DiskStore::new(config).unwrap(), dir)
    }

    #[test]
    fn test_disk_store_save_load() {
        let (store, _dir) = create_disk_store();
        store.save("students", "page-0", b"hello").unwrap();

        let data = store.load("students", "page-0").unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
        assert!(store.data_dir().join("students").join("page-0.obj").exists());
    }

    #[test]
    fn test_disk_store_missing_object() {
        let (store, _dir) = create_disk_store();
        assert!(store.load("students", "page-9").unwrap().is_none());
        store.remove("students", "page-9").unwrap();
    }

    #[test]
    fn test_disk_store_overwrite_and_remove() {
        let (store, _dir) = create_disk_store();
        store.save("s/index/gpa", "node-0", b"v1").unwrap();
        store.save("s/index/gpa", "node-0", b"v2").unwrap();
        assert_eq!(
            &store.load("s/index/gpa", "node-0").unwrap().unwrap()[..],
            b"v2"
        );

        store.remove("s/index/gpa", "node-0").unwrap();
        assert!(store.load("s/index/gpa", "node-0").unwrap().is_none());
    }

    #[test]
    fn test_disk_store_stays_inside_data_dir() {
        let (store, dir) = create_disk_store();
        for scope in ["../escape", "a/../../b", "/abs", "a//b", "."] {
            assert!(matches!(
                store.save(scope, "page-0", b"x"),
                Err(OrdoError::InvalidParameter { .. })
            ));
            assert!(store.load(scope, "page-0").is_err());
        }
        assert!(store.save("t", "../page-0", b"x").is_err());
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_memory_store_batch() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put("t", "a", Bytes::from_static(b"1"));
        batch.put("t", "b", Bytes::from_static(b"2"));
        batch.put("t", "a", Bytes::from_static(b"3"));
        batch.remove("t", "b");
        assert_eq!(batch.len(), 4);

        store.apply(batch).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(&store.load("t", "a").unwrap().unwrap()[..], b"3");
        assert_eq!(store.object_ids("t"), vec!["a".to_string()]);
    }

    #[test]
    fn test_disk_store_batch() {
        let (store, _dir) = create_disk_store();
        let mut batch = WriteBatch::new();
        batch.put("t", "meta", Bytes::from_static(b"m"));
        batch.put("t", "page-0", Bytes::from_static(b"p"));
        store.apply(batch).unwrap();

        assert!(store.load("t", "meta").unwrap().is_some());
        assert!(store.load("t", "page-0").unwrap().is_some());
    }
}
