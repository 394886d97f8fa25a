//! Script promises
//!
//! A promise is a single-assignment cell: the first `resolve`/`reject` wins and
//! later attempts are ignored. Reactions never run synchronously; they are
//! queued as realm microtasks and run on the next pump.

use std::rc::Rc;

use crate::error::{ScriptError, ScriptResult};
use crate::object::{JsObject, ObjectKind};
use crate::realm::Realm;
use crate::value::Value;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl PromiseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

type Reaction = Box<dyn FnOnce(&Realm, Result<Value, Value>)>;

pub(crate) struct PromiseCell {
    state: PromiseState,
    reactions: Vec<Reaction>,
}

impl PromiseCell {
    pub(crate) fn new() -> Self {
        Self {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }
    }
}

/// A handle to a promise object
#[derive(Clone, Debug)]
pub struct JsPromise(JsObject);

impl JsPromise {
    /// Create a pending promise with a native `then` method
    pub(crate) fn new_pending() -> Self {
        let object = JsObject::with_kind(ObjectKind::Promise(PromiseCell::new()), None);
        let promise = JsPromise(object.clone());
        object.define_method("then", Rc::new(promise_then));
        promise
    }

    /// View an object as a promise
    pub fn from_object(object: &JsObject) -> Option<Self> {
        object.is_promise().then(|| JsPromise(object.clone()))
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().and_then(Self::from_object)
    }

    pub fn object(&self) -> &JsObject {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn state(&self) -> PromiseState {
        match &*self.0.0.kind.borrow() {
            ObjectKind::Promise(cell) => cell.state.clone(),
            _ => PromiseState::Pending,
        }
    }

    /// Fulfill the promise. A promise value is adopted instead of nested.
    ///
    /// Returns `false` if the promise was already settled.
    pub fn resolve(&self, realm: &Realm, value: Value) -> bool {
        if let Some(inner) = JsPromise::from_value(&value) {
            if inner.0.ptr_eq(&self.0) {
                return self.reject(
                    realm,
                    realm.error_value(&ScriptError::type_error(
                        "Chaining cycle detected for promise",
                    )),
                );
            }
            if !self.state().is_pending() {
                return false;
            }
            let outer = self.clone();
            inner.on_settled(realm, move |realm, outcome| {
                outer.settle(realm, outcome);
            });
            return true;
        }
        self.settle(realm, Ok(value))
    }

    /// Reject the promise. Returns `false` if it was already settled.
    pub fn reject(&self, realm: &Realm, reason: Value) -> bool {
        self.settle(realm, Err(reason))
    }

    fn settle(&self, realm: &Realm, outcome: Result<Value, Value>) -> bool {
        let reactions = {
            let mut kind = self.0.0.kind.borrow_mut();
            let ObjectKind::Promise(cell) = &mut *kind else {
                return false;
            };
            if !cell.state.is_pending() {
                return false;
            }
            cell.state = match &outcome {
                Ok(v) => PromiseState::Fulfilled(v.clone()),
                Err(e) => PromiseState::Rejected(e.clone()),
            };
            std::mem::take(&mut cell.reactions)
        };
        for reaction in reactions {
            let outcome = outcome.clone();
            realm.enqueue_microtask(move |realm| reaction(realm, outcome));
        }
        true
    }

    /// Register a reaction; runs as a microtask once the promise settles
    pub fn on_settled<F>(&self, realm: &Realm, reaction: F)
    where
        F: FnOnce(&Realm, Result<Value, Value>) + 'static,
    {
        let settled = {
            let mut kind = self.0.0.kind.borrow_mut();
            let ObjectKind::Promise(cell) = &mut *kind else {
                return;
            };
            match &cell.state {
                PromiseState::Pending => {
                    cell.reactions.push(Box::new(reaction));
                    return;
                }
                PromiseState::Fulfilled(v) => Ok(v.clone()),
                PromiseState::Rejected(e) => Err(e.clone()),
            }
        };
        realm.enqueue_microtask(move |realm| reaction(realm, settled));
    }

    /// Chain native handlers, returning the derived promise
    pub fn then_native<F, R>(&self, realm: &Realm, on_fulfilled: F, on_rejected: R) -> JsPromise
    where
        F: FnOnce(&Realm, Value) -> ScriptResult<Value> + 'static,
        R: FnOnce(&Realm, Value) -> ScriptResult<Value> + 'static,
    {
        let derived = realm.create_promise();
        let target = derived.clone();
        self.on_settled(realm, move |realm, outcome| {
            let result = match outcome {
                Ok(v) => on_fulfilled(realm, v),
                Err(e) => on_rejected(realm, e),
            };
            match result {
                Ok(v) => target.resolve(realm, v),
                Err(err) => target.reject(realm, realm.error_value(&err)),
            };
        });
        derived
    }
}

/// `promise.then(onFulfilled, onRejected)` for script callers
fn promise_then(realm: &Realm, this: &Value, args: &[Value]) -> ScriptResult<Value> {
    let promise = JsPromise::from_value(this)
        .ok_or_else(|| ScriptError::type_error("then called on a non-promise"))?;
    let handler = |index: usize| args.get(index).and_then(|v| v.as_object()).filter(|f| f.is_function()).cloned();
    let on_fulfilled = handler(0);
    let on_rejected = handler(1);
    let derived = promise.then_native(
        realm,
        move |realm, value| match on_fulfilled {
            Some(f) => f.call(realm, &Value::Undefined, &[value]),
            None => Ok(value),
        },
        move |realm, reason| match on_rejected {
            Some(f) => f.call(realm, &Value::Undefined, &[reason]),
            None => Err(realm.value_to_error(&reason)),
        },
    );
    Ok(derived.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_settles_once() {
        let realm = Realm::new();
        let promise = realm.create_promise();
        assert!(promise.resolve(&realm, Value::from(1)));
        assert!(!promise.resolve(&realm, Value::from(2)));
        assert!(!promise.reject(&realm, Value::Null));
        assert!(matches!(promise.state(), PromiseState::Fulfilled(v) if v == Value::from(1)));
    }

    #[test]
    fn test_reactions_run_as_microtasks() {
        let realm = Realm::new();
        let promise = realm.create_promise();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        promise.on_settled(&realm, move |_, outcome| {
            *sink.borrow_mut() = Some(outcome);
        });
        promise.resolve(&realm, Value::from("done"));
        assert!(seen.borrow().is_none());
        realm.run_microtasks();
        assert!(matches!(&*seen.borrow(), Some(Ok(v)) if *v == Value::from("done")));
    }

    #[test]
    fn test_adopts_inner_promise() {
        let realm = Realm::new();
        let outer = realm.create_promise();
        let inner = realm.create_promise();
        outer.resolve(&realm, inner.to_value());
        inner.reject(&realm, Value::from("boom"));
        realm.run_microtasks();
        assert!(matches!(outer.state(), PromiseState::Rejected(v) if v == Value::from("boom")));
    }

    #[test]
    fn test_then_native_maps_value() {
        let realm = Realm::new();
        let promise = realm.create_promise();
        let derived = promise.then_native(
            &realm,
            |_, v| Ok(Value::Number(v.as_number().unwrap_or(0.0) * 2.0)),
            |_, e| Ok(e),
        );
        promise.resolve(&realm, Value::from(21));
        realm.run_microtasks();
        assert!(matches!(derived.state(), PromiseState::Fulfilled(v) if v == Value::from(42)));
    }
}
