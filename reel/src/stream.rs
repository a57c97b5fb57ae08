use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Live snapshots of one store key.
///
/// The first item is the value at subscription time; every later item follows
/// a write or removal of that key. Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct Snapshots<T> {
    inner: UnboundedReceiverStream<T>,
}

impl<T> Snapshots<T> {
    fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Stop receiving further snapshots. Already queued snapshots can still be read.
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl<T> Stream for Snapshots<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct Subscription<K, P, T> {
    key: K,
    params: P,
    tx: mpsc::UnboundedSender<T>,
}

/// Per-key subscriber registry owned by a store actor.
///
/// Each subscription has its own unbounded channel, so publishing never waits
/// on a slow consumer and never drops a snapshot. `P` carries per-subscription
/// parameters such as a result limit.
pub(crate) struct Subscribers<K, P, T> {
    subscriptions: Vec<Subscription<K, P, T>>,
}

impl<K: PartialEq, P, T> Subscribers<K, P, T> {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self, key: K, params: P, initial: T) -> Snapshots<T> {
        self.prune();

        let (tx, rx) = mpsc::unbounded_channel();
        // cannot fail, the receiver is still in hand
        let _ = tx.send(initial);
        self.subscriptions.push(Subscription { key, params, tx });

        Snapshots::new(rx)
    }

    pub(crate) fn is_watched(&mut self, key: &K) -> bool {
        self.prune();
        self.subscriptions.iter().any(|s| &s.key == key)
    }

    /// Every key with at least one live subscription
    pub(crate) fn keys(&mut self) -> Vec<K>
    where
        K: Clone,
    {
        self.prune();

        let mut keys: Vec<K> = Vec::new();
        for subscription in &self.subscriptions {
            if !keys.contains(&subscription.key) {
                keys.push(subscription.key.clone());
            }
        }
        keys
    }

    /// Send a snapshot, rendered per subscription, to everyone watching `key`
    pub(crate) fn notify(&mut self, key: &K, mut render: impl FnMut(&P) -> T) -> usize {
        self.prune();

        let mut delivered = 0;
        for subscription in self.subscriptions.iter().filter(|s| &s.key == key) {
            if subscription.tx.send(render(&subscription.params)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    fn prune(&mut self) {
        self.subscriptions.retain(|s| !s.tx.is_closed());
    }
}
