//! Test doubles for repository collaborators

use crate::domain::{Entity, PagedList};
use crate::ports::{EntityStore, PagedStore, RemotePagedSource, RemoteSource};
use crate::stream::Snapshots;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{RemoteError, StoreError, StoreResult};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Remote source answering from a script. Unscripted requests are `NotFound`.
pub(crate) struct ScriptedRemote<K, V> {
    responses: Mutex<HashMap<K, Result<V, RemoteError>>>,
    calls: AtomicUsize,
}

impl<K: Eq + Hash, V: Clone> ScriptedRemote<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn respond(&self, key: K, response: Result<V, RemoteError>) {
        self.responses.lock().insert(key, response);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, key: &K) -> Result<V, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .get(key)
            .cloned()
            .unwrap_or(Err(RemoteError::NotFound))
    }
}

#[async_trait]
impl<E: Entity> RemoteSource<E> for ScriptedRemote<E::Key, E> {
    async fn fetch(&self, key: &E::Key) -> Result<E, RemoteError> {
        self.answer(key)
    }
}

#[async_trait]
impl<L: PagedList> RemotePagedSource<L> for ScriptedRemote<(L::Parent, u32), Vec<L::Item>> {
    async fn fetch_page(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>, RemoteError> {
        self.answer(&(parent.clone(), page))
    }
}

/// Entity store wrapper that can be told to fail reads or writes
pub(crate) struct FlakyStore<E: Entity> {
    inner: Arc<dyn EntityStore<E>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl<E: Entity> FlakyStore<E> {
    pub(crate) fn new(inner: Arc<dyn EntityStore<E>>) -> Self {
        Self {
            inner,
            fail_reads: false,
            fail_writes: false,
        }
    }

    pub(crate) fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

fn disk_full() -> StoreError {
    StoreError::Storage("disk full".to_string())
}

#[async_trait]
impl<E: Entity> EntityStore<E> for FlakyStore<E> {
    async fn read(&self, key: &E::Key) -> StoreResult<Option<E>> {
        if self.fail_reads {
            return Err(disk_full());
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: E::Key, value: E) -> StoreResult<()> {
        if self.fail_writes {
            return Err(disk_full());
        }
        self.inner.write(key, value).await
    }

    async fn delete(&self, key: &E::Key) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn watch(&self, key: E::Key) -> StoreResult<Snapshots<Option<E>>> {
        self.inner.watch(key).await
    }
}

/// Paged store wrapper that can be told to fail reads or writes
pub(crate) struct FlakyPagedStore<L: PagedList> {
    inner: Arc<dyn PagedStore<L>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl<L: PagedList> FlakyPagedStore<L> {
    pub(crate) fn new(inner: Arc<dyn PagedStore<L>>) -> Self {
        Self {
            inner,
            fail_reads: false,
            fail_writes: false,
        }
    }

    pub(crate) fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

#[async_trait]
impl<L: PagedList> PagedStore<L> for FlakyPagedStore<L> {
    async fn read(&self, parent: &L::Parent, page: u32) -> StoreResult<Option<Vec<L::Item>>> {
        if self.fail_reads {
            return Err(disk_full());
        }
        self.inner.read(parent, page).await
    }

    async fn write(&self, parent: L::Parent, page: u32, items: Vec<L::Item>) -> StoreResult<()> {
        if self.fail_writes {
            return Err(disk_full());
        }
        self.inner.write(parent, page, items).await
    }

    async fn current_page(&self, parent: &L::Parent) -> StoreResult<Option<u32>> {
        self.inner.current_page(parent).await
    }

    async fn clear(&self, parent: &L::Parent) -> StoreResult<usize> {
        self.inner.clear(parent).await
    }

    async fn watch(&self, parent: L::Parent, limit: Option<usize>) -> StoreResult<Snapshots<Vec<L::Item>>> {
        self.inner.watch(parent, limit).await
    }
}
