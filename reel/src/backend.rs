use crate::changes::TreeChanges;
use crate::ports::{BatchOp, KvBackend, KvTree, WriteBatch};
use dashmap::DashMap;
use parking_lot::RwLock;
use shared::StoreResult;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// In-process backend. Trees live as long as any clone of the backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    trees: Arc<DashMap<String, Arc<MemoryTree>>>,
    changes: TreeChanges,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.trees.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }
}

impl KvBackend for MemoryBackend {
    fn open_tree(&self, name: &str) -> StoreResult<Arc<dyn KvTree>> {
        let tree: Arc<dyn KvTree> = self
            .trees
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTree::default()))
            .clone();
        Ok(tree)
    }

    fn changes(&self) -> &TreeChanges {
        &self.changes
    }
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("trees", &self.tree_names())
            .finish()
    }
}

#[derive(Default)]
pub struct MemoryTree {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryTree {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvTree for MemoryTree {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Insert(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Remove(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
