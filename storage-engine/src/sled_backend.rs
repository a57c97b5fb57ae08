use reel::changes::TreeChanges;
use reel::ports::{BatchOp, KvBackend, KvTree, WriteBatch};
use shared::config::CacheSettings;
use shared::{StoreError, StoreResult};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Sled-based backend. Every store tree maps to a sled tree of the same name.
#[derive(Clone)]
pub struct SledBackend {
    db: sled::Db,
    changes: TreeChanges,
}

impl SledBackend {
    const FILE_NAME: &'static str = "cache.sled";

    /// Open (or create) the database at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path.as_ref())
            .map_err(|e| StoreError::Storage(format!("Failed to open Sled database: {}", e)))?;
        info!("Opened Sled database at {}", path.as_ref().display());

        Ok(Self::from_db(db))
    }

    /// Open the database under the configured data directory
    pub fn from_settings(settings: &CacheSettings) -> StoreResult<Self> {
        Self::new(Path::new(&settings.data_dir).join(Self::FILE_NAME))
    }

    /// Database that lives only as long as this handle
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Storage(format!("Failed to open temporary Sled database: {}", e)))?;

        Ok(Self::from_db(db))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            changes: TreeChanges::new(),
        }
    }

    /// Persist all pending writes, returning the number of bytes flushed
    pub fn flush(&self) -> StoreResult<usize> {
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(format!("Failed to flush database: {}", e)))
    }

    pub fn size_on_disk(&self) -> StoreResult<u64> {
        self.db
            .size_on_disk()
            .map_err(|e| StoreError::Storage(format!("Failed to read database size: {}", e)))
    }
}

impl KvBackend for SledBackend {
    fn open_tree(&self, name: &str) -> StoreResult<Arc<dyn KvTree>> {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| StoreError::Storage(format!("Failed to open tree '{}': {}", name, e)))?;

        Ok(Arc::new(SledTree { tree }))
    }

    fn changes(&self) -> &TreeChanges {
        &self.changes
    }
}

impl std::fmt::Debug for SledBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBackend")
            .field("trees", &self.db.tree_names().len())
            .finish()
    }
}

struct SledTree {
    tree: sled::Tree,
}

fn storage(context: &str, e: sled::Error) -> StoreError {
    StoreError::Storage(format!("{}: {}", context, e))
}

impl KvTree for SledTree {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let value = self.tree.get(key).map_err(|e| storage("Failed to get entry", e))?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        self.tree
            .insert(key, value)
            .map_err(|e| storage("Failed to save entry", e))?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<bool> {
        let removed = self
            .tree
            .remove(key)
            .map_err(|e| storage("Failed to delete entry", e))?
            .is_some();
        Ok(removed)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for result in self.tree.scan_prefix(prefix) {
            let (key, value) = result.map_err(|e| storage("Failed to iterate tree", e))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Insert(key, value) => sled_batch.insert(key, value),
                BatchOp::Remove(key) => sled_batch.remove(key),
            }
        }

        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| storage("Failed to apply batch", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_round_trip_and_prefix_scan() {
        let backend = SledBackend::temporary().unwrap();
        let tree = backend.open_tree("movie").unwrap();

        tree.insert(&[1, 2], b"b".to_vec()).unwrap();
        tree.insert(&[1, 1], b"a".to_vec()).unwrap();
        tree.insert(&[2, 0], b"c".to_vec()).unwrap();

        assert_eq!(tree.get(&[1, 1]).unwrap(), Some(b"a".to_vec()));
        let scanned: Vec<_> = tree.scan_prefix(&[1]).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(scanned, vec![vec![1, 1], vec![1, 2]]);
        assert_eq!(tree.scan_prefix(&[]).unwrap().len(), 3);
    }

    #[test]
    fn test_remove_reports_presence() {
        let backend = SledBackend::temporary().unwrap();
        let tree = backend.open_tree("movie").unwrap();
        tree.insert(b"k", b"v".to_vec()).unwrap();

        assert!(tree.remove(b"k").unwrap());
        assert!(!tree.remove(b"k").unwrap());
    }

    #[test]
    fn test_batch_applies_in_order() {
        let backend = SledBackend::temporary().unwrap();
        let tree = backend.open_tree("pages").unwrap();
        tree.insert(b"old", b"1".to_vec()).unwrap();

        let mut batch = WriteBatch::new();
        batch.remove(b"old".to_vec());
        batch.insert(b"new".to_vec(), b"2".to_vec());
        batch.insert(b"new".to_vec(), b"3".to_vec());
        tree.apply_batch(batch).unwrap();

        assert_eq!(tree.get(b"old").unwrap(), None);
        assert_eq!(tree.get(b"new").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_trees_are_isolated() {
        let backend = SledBackend::temporary().unwrap();
        let movies = backend.open_tree("movie").unwrap();
        let people = backend.open_tree("person").unwrap();

        movies.insert(b"1", b"movie".to_vec()).unwrap();

        assert_eq!(people.get(b"1").unwrap(), None);
        assert!(people.scan_prefix(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_new_creates_parent_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("reel.sled");

        let backend = SledBackend::new(&path).unwrap();
        backend.open_tree("movie").unwrap().insert(b"k", b"v".to_vec()).unwrap();
        backend.flush().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_from_settings_uses_data_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings {
            data_dir: temp_dir.path().join("data").display().to_string(),
            ..CacheSettings::default()
        };

        let backend = SledBackend::from_settings(&settings).unwrap();
        backend.flush().unwrap();

        assert!(temp_dir.path().join("data").join("cache.sled").exists());
    }
}
