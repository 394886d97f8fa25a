//! Synchronization context for a realm
//!
//! The [`Dispatcher`] is the `Send + Sync` handle through which any thread
//! schedules work onto a realm's owner thread:
//!
//! - [`Dispatcher::run`] blocks until the job completes and returns its result;
//! - [`Dispatcher::run_async`] returns a future completing with the result;
//! - [`Dispatcher::post`] enqueues and returns immediately.
//!
//! Calls made on the owner thread itself are detected and executed inline,
//! so a script-thread caller never deadlocks waiting on its own queue.
//!
//! [`ScriptThread`] owns a realm on a dedicated thread and pumps its queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::TrySendError;
use tokio::sync::oneshot;
use tracing::{debug, info_span, trace};

use crate::error::{ScriptError, ScriptResult};
use crate::realm::{Job, Message, Realm, RealmShared};

/// Statistics about dispatched work
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Jobs enqueued onto the realm
    pub jobs_submitted: AtomicU64,
    /// Enqueued jobs that ran to completion (or panicked)
    pub jobs_completed: AtomicU64,
    /// Calls executed inline because the caller was already on the owner thread
    pub inline_runs: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            inline_runs: self.inline_runs.load(Ordering::Relaxed),
        }
    }

    /// Jobs enqueued but not yet completed
    pub fn jobs_in_flight(&self) -> u64 {
        let submitted = self.jobs_submitted.load(Ordering::Relaxed);
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        submitted.saturating_sub(completed)
    }
}

/// A point-in-time snapshot of dispatch statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub inline_runs: u64,
}

/// Thread-safe handle for scheduling work onto a realm
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<RealmShared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<RealmShared>) -> Self {
        Self { shared }
    }

    pub fn realm_id(&self) -> u64 {
        self.shared.id
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.shared.owner
    }

    /// Whether the caller is running on the realm's thread
    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.shared.owner
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.shared.stats
    }

    fn inline_realm(&self) -> ScriptResult<Realm> {
        self.shared.stats.inline_runs.fetch_add(1, Ordering::Relaxed);
        Realm::find(self.shared.id).ok_or_else(|| {
            ScriptError::scope_closed(format!("realm {} has been disposed", self.shared.id))
        })
    }

    fn send(&self, job: Job) -> ScriptResult<()> {
        if self.shared.is_closed() {
            return Err(ScriptError::scope_closed(format!(
                "realm {} has been disposed",
                self.shared.id
            )));
        }
        self.shared.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        let message = Message::Run(job);
        let sent = if self.is_owner_thread() {
            // The owner thread must never block on its own queue.
            self.shared.jobs.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => ScriptError::Dispatch("job queue is full".to_string()),
                TrySendError::Disconnected(_) => {
                    ScriptError::scope_closed(format!("realm {} has been disposed", self.shared.id))
                }
            })
        } else {
            self.shared.jobs.send(message).map_err(|_| {
                ScriptError::scope_closed(format!("realm {} has been disposed", self.shared.id))
            })
        };
        if sent.is_err() {
            self.shared.stats.jobs_submitted.fetch_sub(1, Ordering::Relaxed);
        }
        sent
    }

    /// Run `f` on the realm's thread and wait for its result
    pub fn run<R, F>(&self, f: F) -> ScriptResult<R>
    where
        F: FnOnce(&Realm) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_owner_thread() {
            let realm = self.inline_realm()?;
            trace!(realm = self.shared.id, "running inline");
            return Ok(f(&realm));
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Box::new(move |realm| {
            let _ = tx.send(f(realm));
        }))?;
        rx.recv()
            .map_err(|_| ScriptError::Dispatch("script thread dropped the job".to_string()))
    }

    /// Run `f` on the realm's thread, completing the returned future with
    /// its result
    pub fn run_async<R, F>(
        &self,
        f: F,
    ) -> impl std::future::Future<Output = ScriptResult<R>> + Send + 'static
    where
        F: FnOnce(&Realm) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<ScriptResult<R>>();
        if self.is_owner_thread() {
            let _ = tx.send(self.inline_realm().map(|realm| f(&realm)));
        } else if let Err(err) = self.send(Box::new(move |realm| {
            let _ = tx.send(Ok(f(realm)));
        })) {
            let (failed_tx, failed_rx) = oneshot::channel();
            let _ = failed_tx.send(Err(err));
            return Self::await_response(failed_rx);
        }
        Self::await_response(rx)
    }

    async fn await_response<R>(rx: oneshot::Receiver<ScriptResult<R>>) -> ScriptResult<R> {
        rx.await
            .map_err(|_| ScriptError::Dispatch("script thread dropped the job".to_string()))?
    }

    /// Enqueue `f` without waiting. Always queued, even on the owner thread.
    pub fn post<F>(&self, f: F) -> ScriptResult<()>
    where
        F: FnOnce(&Realm) + Send + 'static,
    {
        self.send(Box::new(f))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.shared.jobs.send(Message::Shutdown);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("realm", &self.shared.id)
            .field("owner", &self.shared.owner)
            .finish()
    }
}

/// Builder for a [`ScriptThread`]
#[derive(Debug, Clone)]
pub struct ScriptThreadBuilder {
    name: String,
    queue_capacity: Option<usize>,
}

impl Default for ScriptThreadBuilder {
    fn default() -> Self {
        Self {
            name: "ferry-script".to_string(),
            queue_capacity: None,
        }
    }
}

impl ScriptThreadBuilder {
    /// Set the OS thread name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bound the job queue (backpressure threshold). Unbounded by default.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    /// Spawn the thread and wait until its realm is ready
    pub fn spawn(self) -> ScriptResult<ScriptThread> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let capacity = self.queue_capacity;
        let join = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let realm = match capacity {
                    Some(capacity) => Realm::with_queue_capacity(capacity),
                    None => Realm::new(),
                };
                let _span = info_span!("script_thread", realm = realm.id()).entered();
                debug!("script thread started");
                if ready_tx.send(realm.dispatcher()).is_err() {
                    return;
                }
                realm.run_until_shutdown();
                debug!("script thread stopped");
            })
            .map_err(|e| ScriptError::Dispatch(format!("failed to spawn script thread: {}", e)))?;

        let dispatcher = ready_rx
            .recv()
            .map_err(|_| ScriptError::Dispatch("script thread exited during startup".to_string()))?;
        Ok(ScriptThread {
            dispatcher,
            join: Some(join),
        })
    }
}

/// A dedicated thread owning one realm
pub struct ScriptThread {
    dispatcher: Dispatcher,
    join: Option<JoinHandle<()>>,
}

impl ScriptThread {
    /// Spawn a script thread with default settings
    pub fn spawn() -> ScriptResult<Self> {
        Self::builder().spawn()
    }

    pub fn builder() -> ScriptThreadBuilder {
        ScriptThreadBuilder::default()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Stop the thread after the jobs already queued, and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(join) = self.join.take() else { return };
        self.dispatcher.shutdown();
        if self.dispatcher.is_owner_thread() {
            // Joining ourselves would deadlock; the loop exits on its own.
            return;
        }
        let _ = join.join();
    }
}

impl Drop for ScriptThread {
    fn drop(&mut self) {
        self.stop();
    }
}
