use crate::changes::TouchedKeys;
use parking_lot::Mutex;
use shared::{StoreError, StoreResult};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Applied to the state for every batch of keys another store changed
pub(crate) type ChangeHandler<S> = fn(&mut S, TouchedKeys);

enum Message<S> {
    Run(Job<S>),
    Stop,
}

/// Serialized owner of a store's state.
///
/// The state lives inside a spawned task and is only reachable through jobs
/// sent over the mailbox. Jobs run to completion one at a time, so a caller
/// that stops waiting never leaves a half-applied mutation behind.
pub(crate) struct StoreActor<S> {
    name: &'static str,
    mailbox: mpsc::Sender<Message<S>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> StoreActor<S> {
    /// Spawn the owning task on the current Tokio runtime
    pub(crate) fn spawn(name: &'static str, state: S, capacity: usize) -> StoreResult<Self> {
        Self::start(name, state, capacity, None)
    }

    /// Like [`spawn`](Self::spawn), also feeding `changes` to `on_change` between jobs
    pub(crate) fn spawn_listening(
        name: &'static str,
        state: S,
        capacity: usize,
        changes: mpsc::UnboundedReceiver<TouchedKeys>,
        on_change: ChangeHandler<S>,
    ) -> StoreResult<Self> {
        Self::start(name, state, capacity, Some((changes, on_change)))
    }

    fn start(
        name: &'static str,
        state: S,
        capacity: usize,
        listener: Option<(mpsc::UnboundedReceiver<TouchedKeys>, ChangeHandler<S>)>,
    ) -> StoreResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| StoreError::Storage(format!("store '{}' needs a Tokio runtime: {}", name, e)))?;

        let (mailbox, jobs) = mpsc::channel::<Message<S>>(capacity.max(1));
        let task = handle.spawn(run(name, state, jobs, listener));

        Ok(Self {
            name,
            mailbox,
            task: Mutex::new(Some(task)),
        })
    }

    /// Run `f` against the state and wait for its result
    pub(crate) async fn call<R, F>(&self, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job<S> = Box::new(move |state| {
            // the caller may have gone away, the work is done either way
            let _ = reply.send(f(state));
        });

        self.mailbox
            .send(Message::Run(job))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| {
            tracing::error!("Store actor '{}' dropped a job without replying", self.name);
            StoreError::Closed
        })
    }

    /// Like [`call`](Self::call) for jobs that already return a store result
    pub(crate) async fn try_call<R, F>(&self, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> StoreResult<R> + Send + 'static,
    {
        self.call(f).await?
    }

    /// Let every queued job finish, then stop the task and drop its state.
    /// Later calls fail with [`StoreError::Closed`].
    pub(crate) async fn close(&self) {
        // a send error means the task is already gone
        let _ = self.mailbox.send(Message::Stop).await;

        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        if let Err(e) = task.await {
            tracing::warn!("Store actor '{}' did not stop cleanly: {}", self.name, e);
        }
    }
}

async fn run<S>(
    name: &'static str,
    mut state: S,
    mut jobs: mpsc::Receiver<Message<S>>,
    listener: Option<(mpsc::UnboundedReceiver<TouchedKeys>, ChangeHandler<S>)>,
) {
    let (mut changes, on_change) = match listener {
        Some((changes, on_change)) => (Some(changes), Some(on_change)),
        None => (None, None),
    };

    loop {
        tokio::select! {
            message = jobs.recv() => match message {
                Some(Message::Run(job)) => job(&mut state),
                Some(Message::Stop) | None => break,
            },
            change = next_change(&mut changes) => match (change, on_change) {
                (Some(keys), Some(on_change)) => on_change(&mut state, keys),
                _ => changes = None,
            },
        }
    }

    drop(state);
    tracing::debug!("Store actor '{}' stopped", name);
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<TouchedKeys>>) -> Option<TouchedKeys> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<S> std::fmt::Debug for StoreActor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreActor")
            .field("name", &self.name)
            .field("closed", &self.mailbox.is_closed())
            .finish()
    }
}
