//! Realm: the scope that owns script values on one thread
//!
//! A realm is bound to the thread that created it. It owns the global object,
//! the microtask queue, the persistent-handle table backing [`JsRef`] and
//! [`JsWeakRef`], and the receiving end of its job queue. The sending end is
//! shared (`Arc<RealmShared>`) with every [`Dispatcher`] and reference handle,
//! which are the only pieces that may travel to other threads.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, trace};

use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::{ScriptError, ScriptResult};
use crate::object::{ExoticObject, InternalSlot, JsObject, NativeFunction, WeakObject};
use crate::promise::JsPromise;
use crate::reference::{JsRef, JsWeakRef};
use crate::value::Value;

static NEXT_REALM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static REALMS: RefCell<Vec<Weak<RealmInner>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) type Job = Box<dyn FnOnce(&Realm) + Send>;

pub(crate) enum Message {
    Run(Job),
    Shutdown,
}

/// Thread-safe part of a realm
pub(crate) struct RealmShared {
    pub(crate) id: u64,
    pub(crate) owner: ThreadId,
    pub(crate) released: Mutex<Vec<u64>>,
    pub(crate) closed: AtomicBool,
    pub(crate) jobs: Sender<Message>,
    pub(crate) stats: DispatchStats,
}

impl RealmShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

enum Slot {
    Strong(Value),
    Weak(WeakObject),
}

type Microtask = Box<dyn FnOnce(&Realm)>;

pub(crate) struct RealmInner {
    shared: Arc<RealmShared>,
    global: JsObject,
    microtasks: RefCell<VecDeque<Microtask>>,
    handles: RefCell<FxHashMap<u64, Slot>>,
    next_handle: Cell<u64>,
    jobs: Receiver<Message>,
}

impl Drop for RealmInner {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        debug!(realm = self.shared.id, "realm closed");
    }
}

/// A script realm. Cloning yields another handle to the same realm.
#[derive(Clone)]
pub struct Realm(Rc<RealmInner>);

impl Realm {
    /// Create a realm on the current thread with an unbounded job queue
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a realm whose job queue applies backpressure at `capacity`
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity.max(1)))
    }

    fn build(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let shared = Arc::new(RealmShared {
            id: NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed),
            owner: std::thread::current().id(),
            released: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            jobs: tx,
            stats: DispatchStats::default(),
        });
        let inner = Rc::new(RealmInner {
            shared,
            global: JsObject::new(),
            microtasks: RefCell::new(VecDeque::new()),
            handles: RefCell::new(FxHashMap::default()),
            next_handle: Cell::new(1),
            jobs: rx,
        });
        REALMS.with(|realms| {
            let mut realms = realms.borrow_mut();
            realms.retain(|r| r.strong_count() > 0);
            realms.push(Rc::downgrade(&inner));
        });
        debug!(realm = inner.shared.id, "realm created");
        Realm(inner)
    }

    /// The first live realm created on the current thread
    pub fn current() -> Option<Realm> {
        REALMS.with(|realms| realms.borrow().iter().find_map(|r| r.upgrade().map(Realm)))
    }

    /// Find a live realm of the current thread by id
    pub fn find(id: u64) -> Option<Realm> {
        REALMS.with(|realms| {
            realms
                .borrow()
                .iter()
                .filter_map(|r| r.upgrade())
                .find(|r| r.shared.id == id)
                .map(Realm)
        })
    }

    pub fn id(&self) -> u64 {
        self.0.shared.id
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.0.shared.owner
    }

    pub fn global(&self) -> &JsObject {
        &self.0.global
    }

    /// Thread-safe handle for scheduling work onto this realm
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.0.shared.clone())
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.0.shared.stats
    }

    // ------------------------------------------------------------------
    // Object creation
    // ------------------------------------------------------------------

    pub fn create_object(&self) -> JsObject {
        JsObject::new()
    }

    pub fn create_array(&self, items: Vec<Value>) -> JsObject {
        JsObject::array(items)
    }

    pub fn create_function<F>(&self, name: &str, f: F) -> JsObject
    where
        F: Fn(&Realm, &Value, &[Value]) -> ScriptResult<Value> + 'static,
    {
        JsObject::function(name, Rc::new(f))
    }

    /// Create a constructor function with a fresh `prototype` object
    pub fn create_constructor(
        &self,
        name: &str,
        call: NativeFunction,
        construct: NativeFunction,
    ) -> JsObject {
        JsObject::constructor(name, call, construct)
    }

    /// Create an object carrying an opaque host handle
    pub fn create_external(&self, slot: InternalSlot, prototype: Option<JsObject>) -> JsObject {
        let object = JsObject::with_prototype(prototype);
        object.set_internal(slot);
        object
    }

    pub fn create_exotic(&self, handler: Rc<dyn ExoticObject>) -> JsObject {
        JsObject::exotic(handler)
    }

    pub fn create_promise(&self) -> JsPromise {
        JsPromise::new_pending()
    }

    /// Create an error object (`name`, `message`, `stack` properties)
    pub fn create_error(&self, name: &str, message: &str) -> JsObject {
        let error = JsObject::new();
        error.define_value("name", Value::from(name));
        error.define_value("message", Value::from(message));
        error.define_value("stack", Value::from(format!("{}: {}", name, message)));
        error
    }

    /// Materialize an error as a throwable script value.
    ///
    /// The original error is kept in the internal slot so that
    /// [`Realm::value_to_error`] recovers it unchanged.
    pub fn error_value(&self, err: &ScriptError) -> Value {
        let (name, message) = match err.as_exception() {
            Some(exception) => (exception.name.clone(), exception.message.clone()),
            None => ("Error".to_string(), err.to_string()),
        };
        let error = self.create_error(&name, &message);
        error.define_value("stack", Value::from(err.to_string()));
        error.set_internal(Arc::new(err.clone()));
        Value::Object(error)
    }

    /// Interpret a thrown or rejected value as an error
    pub fn value_to_error(&self, value: &Value) -> ScriptError {
        let Some(object) = value.as_object() else {
            return ScriptError::exception("Error", value.to_display_string());
        };
        if let Some(err) = object.internal_as::<ScriptError>() {
            return (*err).clone();
        }
        let field = |key: &str| match object.get_own_property(key) {
            Some(crate::object::Property::Data { value, .. }) => value.as_str().map(str::to_string),
            _ => None,
        };
        ScriptError::exception(
            field("name").unwrap_or_else(|| "Error".to_string()),
            field("message").unwrap_or_else(|| value.to_display_string()),
        )
    }

    // ------------------------------------------------------------------
    // Microtasks and jobs
    // ------------------------------------------------------------------

    pub fn enqueue_microtask<F>(&self, task: F)
    where
        F: FnOnce(&Realm) + 'static,
    {
        self.0.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run microtasks until the queue is empty; returns how many ran
    pub fn run_microtasks(&self) -> usize {
        let mut count = 0;
        loop {
            let task = self.0.microtasks.borrow_mut().pop_front();
            let Some(task) = task else { break };
            task(self);
            count += 1;
        }
        count
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.0.microtasks.borrow().is_empty()
    }

    /// Drive the realm from its own thread: run every queued job, then
    /// microtasks, then reclaim released handles. Returns the number of jobs.
    pub fn pump(&self) -> ScriptResult<usize> {
        self.check_thread()?;
        let mut jobs = 0;
        while let Ok(message) = self.0.jobs.try_recv() {
            match message {
                Message::Run(job) => {
                    self.execute(job);
                    jobs += 1;
                }
                Message::Shutdown => break,
            }
        }
        self.run_microtasks();
        self.release_handles();
        Ok(jobs)
    }

    /// Block on the job queue until a shutdown message arrives
    pub(crate) fn run_until_shutdown(&self) {
        loop {
            self.run_microtasks();
            self.release_handles();
            match self.0.jobs.recv() {
                Ok(Message::Run(job)) => self.execute(job),
                Ok(Message::Shutdown) => {
                    debug!(realm = self.id(), "shutdown requested");
                    break;
                }
                Err(_) => break,
            }
        }
        self.0.shared.closed.store(true, Ordering::Release);
        // Jobs still queued are dropped here; their callers observe a
        // disconnected response channel.
        while self.0.jobs.try_recv().is_ok() {}
    }

    fn execute(&self, job: Job) {
        trace!(realm = self.id(), "running job");
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(self))) {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(realm = self.id(), "script job panicked: {}", message);
        }
        self.0.shared.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.run_microtasks();
    }

    /// Fails with `InvalidThreadAccess` off the owner thread
    pub fn check_thread(&self) -> ScriptResult<()> {
        if std::thread::current().id() == self.owner_thread() {
            Ok(())
        } else {
            Err(ScriptError::invalid_thread(self.owner_thread()))
        }
    }

    // ------------------------------------------------------------------
    // Persistent handles
    // ------------------------------------------------------------------

    fn next_handle(&self) -> u64 {
        let handle = self.0.next_handle.get();
        self.0.next_handle.set(handle + 1);
        handle
    }

    /// Create a strong persistent reference that may leave this thread
    pub fn persist(&self, value: Value) -> JsRef {
        let handle = self.next_handle();
        self.0.handles.borrow_mut().insert(handle, Slot::Strong(value));
        JsRef::new(handle, self.0.shared.clone())
    }

    /// Create a weak persistent reference to an object
    pub fn persist_weak(&self, object: &JsObject) -> JsWeakRef {
        let handle = self.next_handle();
        self.0
            .handles
            .borrow_mut()
            .insert(handle, Slot::Weak(object.downgrade()));
        JsWeakRef::new(handle, self.0.shared.clone())
    }

    pub(crate) fn handle_value(&self, handle: u64) -> Option<Value> {
        match self.0.handles.borrow().get(&handle) {
            Some(Slot::Strong(value)) => Some(value.clone()),
            Some(Slot::Weak(weak)) => Some(weak.upgrade().map(Value::Object).unwrap_or_default()),
            None => None,
        }
    }

    pub(crate) fn weak_handle(&self, handle: u64) -> Option<Option<JsObject>> {
        match self.0.handles.borrow().get(&handle) {
            Some(Slot::Weak(weak)) => Some(weak.upgrade()),
            Some(Slot::Strong(Value::Object(object))) => Some(Some(object.clone())),
            Some(Slot::Strong(_)) => Some(None),
            None => None,
        }
    }

    /// Reclaim handles whose references were dropped; returns how many
    pub fn release_handles(&self) -> usize {
        let released = std::mem::take(&mut *self.0.shared.released.lock());
        if released.is_empty() {
            return 0;
        }
        let mut handles = self.0.handles.borrow_mut();
        for handle in &released {
            handles.remove(handle);
        }
        trace!(realm = self.id(), count = released.len(), "released handles");
        released.len()
    }

    /// Number of live persistent handles
    pub fn live_handles(&self) -> usize {
        self.0.handles.borrow().len()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id())
            .field("owner", &self.owner_thread())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_id() {
        let realm = Realm::new();
        let found = Realm::find(realm.id()).expect("realm registered");
        assert_eq!(found.id(), realm.id());
        let id = realm.id();
        drop(found);
        drop(realm);
        assert!(Realm::find(id).is_none());
    }

    #[test]
    fn test_error_value_round_trip() {
        let realm = Realm::new();
        let err = ScriptError::type_error("bad input").with_frame("parse");
        let value = realm.error_value(&err);
        let back = realm.value_to_error(&value);
        assert_eq!(back.as_exception(), err.as_exception());
    }

    #[test]
    fn test_value_to_error_from_plain_value() {
        let realm = Realm::new();
        let err = realm.value_to_error(&Value::from("oops"));
        let exception = err.as_exception().unwrap();
        assert_eq!(exception.name, "Error");
        assert_eq!(exception.message, "oops");
    }

    #[test]
    fn test_released_handles_are_reclaimed() {
        let realm = Realm::new();
        let reference = realm.persist(Value::from(1));
        assert_eq!(realm.live_handles(), 1);
        drop(reference);
        assert_eq!(realm.release_handles(), 1);
        assert_eq!(realm.live_handles(), 0);
    }

    #[test]
    fn test_pump_runs_posted_jobs() {
        let realm = Realm::new();
        let dispatcher = realm.dispatcher();
        dispatcher
            .post(|realm| realm.global().define_value("ran", Value::Bool(true)))
            .unwrap();
        assert_eq!(realm.pump().unwrap(), 1);
        assert_eq!(realm.global().get(&realm, "ran").unwrap(), Value::Bool(true));
    }
}
