//! Record changes shared between stores that open the same backend tree.
//!
//! A paged list writes its items into the item entity's tree, and several
//! lists can share one item tree. Each store registers a listener per tree it
//! reads, and announces the keys it rewrites or drops so the others can
//! refresh their watchers.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Raw keys of one tree changed by a single store operation
pub type TouchedKeys = Vec<Vec<u8>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    tx: mpsc::UnboundedSender<TouchedKeys>,
}

/// Per-tree fan-out of [`TouchedKeys`], owned by a backend
#[derive(Clone, Default)]
pub struct TreeChanges {
    listeners: Arc<DashMap<String, Vec<Listener>>>,
    next_id: Arc<AtomicU64>,
}

impl TreeChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for changes other listeners announce on `tree`
    pub fn listen(&self, tree: &str) -> (ListenerId, mpsc::UnboundedReceiver<TouchedKeys>) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .entry(tree.to_string())
            .or_default()
            .push(Listener { id, tx });
        (id, rx)
    }

    /// Deliver `keys` to every listener on `tree` except `source`
    pub fn publish(&self, tree: &str, source: ListenerId, keys: TouchedKeys) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let Some(mut listeners) = self.listeners.get_mut(tree) else {
            return 0;
        };

        listeners.retain(|l| !l.tx.is_closed());
        let mut delivered = 0;
        for listener in listeners.iter().filter(|l| l.id != source) {
            if listener.tx.send(keys.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn listener_count(&self, tree: &str) -> usize {
        self.listeners
            .get(tree)
            .map(|listeners| listeners.iter().filter(|l| !l.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for TreeChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeChanges")
            .field("trees", &self.listeners.len())
            .finish()
    }
}
