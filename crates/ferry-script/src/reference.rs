//! Persistent references
//!
//! `JsRef` and `JsWeakRef` are the only way to hold a script value from
//! another thread. They store a handle into the owning realm's table and are
//! resolved back into a [`Value`] on the owner thread. Dropping a reference on
//! any thread queues its handle for release; the realm reclaims it on its next
//! pump.

use std::sync::Arc;
use std::thread::ThreadId;

use crate::dispatch::Dispatcher;
use crate::error::{ScriptError, ScriptResult};
use crate::object::JsObject;
use crate::realm::{Realm, RealmShared};
use crate::value::Value;

struct RefHandle {
    handle: u64,
    shared: Arc<RealmShared>,
}

impl RefHandle {
    fn check(&self, realm: &Realm) -> ScriptResult<()> {
        if self.shared.is_closed() {
            return Err(ScriptError::scope_closed(format!(
                "realm {} has been disposed",
                self.shared.id
            )));
        }
        if std::thread::current().id() != self.shared.owner {
            return Err(ScriptError::invalid_thread(self.shared.owner));
        }
        if realm.id() != self.shared.id {
            return Err(ScriptError::scope_closed(format!(
                "reference belongs to realm {}, not realm {}",
                self.shared.id,
                realm.id()
            )));
        }
        Ok(())
    }

    fn current_realm(&self) -> ScriptResult<Realm> {
        if std::thread::current().id() != self.shared.owner {
            return Err(ScriptError::invalid_thread(self.shared.owner));
        }
        Realm::find(self.shared.id).ok_or_else(|| {
            ScriptError::scope_closed(format!("realm {} has been disposed", self.shared.id))
        })
    }
}

impl Drop for RefHandle {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            self.shared.released.lock().push(self.handle);
        }
    }
}

/// Strong, thread-safe reference to a script value
#[derive(Clone)]
pub struct JsRef {
    inner: Arc<RefHandle>,
}

impl JsRef {
    pub(crate) fn new(handle: u64, shared: Arc<RealmShared>) -> Self {
        Self {
            inner: Arc::new(RefHandle { handle, shared }),
        }
    }

    /// Resolve the value in `realm`
    ///
    /// Fails with `InvalidThreadAccess` off the owner thread and with
    /// `ScopeClosed` once the realm is gone.
    pub fn get(&self, realm: &Realm) -> ScriptResult<Value> {
        self.inner.check(realm)?;
        realm
            .handle_value(self.inner.handle)
            .ok_or_else(|| ScriptError::scope_closed("reference has been released"))
    }

    /// Resolve the referenced object in `realm`
    pub fn object(&self, realm: &Realm) -> ScriptResult<JsObject> {
        match self.get(realm)? {
            Value::Object(object) => Ok(object),
            other => Err(ScriptError::type_error(format!(
                "expected an object reference, found {}",
                other.type_name()
            ))),
        }
    }

    /// Resolve against the owning realm, looked up on the current thread
    pub fn resolve(&self) -> ScriptResult<Value> {
        let realm = self.inner.current_realm()?;
        self.get(&realm)
    }

    pub fn realm_id(&self) -> u64 {
        self.inner.shared.id
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.inner.shared.owner
    }

    /// Whether the owning realm is still alive
    pub fn is_alive(&self) -> bool {
        !self.inner.shared.is_closed()
    }

    /// Dispatcher of the owning realm
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.inner.shared.clone())
    }

    /// Whether both references share the same handle
    pub fn ptr_eq(&self, other: &JsRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for JsRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsRef(realm={}, handle={})", self.inner.shared.id, self.inner.handle)
    }
}

/// Weak, thread-safe reference to a script object
#[derive(Clone)]
pub struct JsWeakRef {
    inner: Arc<RefHandle>,
}

impl JsWeakRef {
    pub(crate) fn new(handle: u64, shared: Arc<RealmShared>) -> Self {
        Self {
            inner: Arc::new(RefHandle { handle, shared }),
        }
    }

    /// Resolve the object in `realm`; `Ok(None)` once it has been collected
    pub fn get(&self, realm: &Realm) -> ScriptResult<Option<JsObject>> {
        self.inner.check(realm)?;
        Ok(realm.weak_handle(self.inner.handle).flatten())
    }

    /// Resolve against the owning realm, looked up on the current thread
    pub fn resolve(&self) -> ScriptResult<Option<JsObject>> {
        let realm = self.inner.current_realm()?;
        self.get(&realm)
    }

    pub fn realm_id(&self) -> u64 {
        self.inner.shared.id
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.inner.shared.owner
    }

    pub fn is_alive(&self) -> bool {
        !self.inner.shared.is_closed()
    }
}

impl std::fmt::Debug for JsWeakRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsWeakRef(realm={}, handle={})", self.inner.shared.id, self.inner.handle)
    }
}
