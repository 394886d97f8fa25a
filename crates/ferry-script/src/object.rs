//! Script objects
//!
//! Objects are shared, interior-mutable cells (`Rc<ObjectCell>`) and are
//! compared by identity. Besides ordinary property bags an object can be an
//! array, a native function, a promise, or an exotic object whose property
//! access is delegated to an [`ExoticObject`] handler (the equivalent of a
//! script `Proxy`).
//!
//! Every object also carries:
//! - an *internal slot* holding an opaque `Arc<dyn Any + Send + Sync>` handle,
//!   used to attach a host reference to its projection;
//! - an optional *lazy resolver*, consulted when a property is missing, which
//!   lets namespace objects materialize members on first access.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ScriptError, ScriptResult};
use crate::promise::PromiseCell;
use crate::realm::Realm;
use crate::value::Value;

/// Native function body: `(realm, this, args) -> result`
pub type NativeFunction = Rc<dyn Fn(&Realm, &Value, &[Value]) -> ScriptResult<Value>>;

/// Accessor getter: `(realm, receiver) -> value`
pub type GetterFn = Rc<dyn Fn(&Realm, &Value) -> ScriptResult<Value>>;

/// Accessor setter: `(realm, receiver, value)`
pub type SetterFn = Rc<dyn Fn(&Realm, &Value, Value) -> ScriptResult<()>>;

/// Resolver for missing properties: `(realm, holder, key) -> value`
pub type LazyResolver = Rc<dyn Fn(&Realm, &JsObject, &str) -> ScriptResult<Option<Value>>>;

/// Opaque handle stored in an object's internal slot
pub type InternalSlot = Arc<dyn Any + Send + Sync>;

/// A property slot
#[derive(Clone)]
pub enum Property {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
    },
    Accessor {
        get: Option<GetterFn>,
        set: Option<SetterFn>,
        enumerable: bool,
    },
}

impl Property {
    /// Writable, enumerable data property
    pub fn data(value: Value) -> Self {
        Property::Data {
            value,
            writable: true,
            enumerable: true,
        }
    }

    /// Read-only, non-enumerable data property (used for methods)
    pub fn hidden(value: Value) -> Self {
        Property::Data {
            value,
            writable: false,
            enumerable: false,
        }
    }

    fn is_enumerable(&self) -> bool {
        match self {
            Property::Data { enumerable, .. } | Property::Accessor { enumerable, .. } => {
                *enumerable
            }
        }
    }
}

/// Handler for exotic objects.
///
/// `get` returning `Ok(None)` falls through to ordinary property lookup, and
/// `set` returning `Ok(false)` falls through to an ordinary assignment.
pub trait ExoticObject {
    fn get(&self, realm: &Realm, key: &str) -> ScriptResult<Option<Value>>;

    fn set(&self, realm: &Realm, key: &str, value: Value) -> ScriptResult<bool>;

    fn own_keys(&self, realm: &Realm) -> ScriptResult<Vec<String>>;

    fn has(&self, realm: &Realm, key: &str) -> ScriptResult<bool> {
        Ok(self.get(realm, key)?.is_some())
    }

    fn delete(&self, _realm: &Realm, _key: &str) -> ScriptResult<bool> {
        Ok(false)
    }
}

pub(crate) enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function {
        name: String,
        call: NativeFunction,
        construct: Option<NativeFunction>,
    },
    Promise(PromiseCell),
    Exotic(Rc<dyn ExoticObject>),
}

pub(crate) struct ObjectCell {
    pub(crate) kind: RefCell<ObjectKind>,
    properties: RefCell<IndexMap<String, Property>>,
    prototype: RefCell<Option<JsObject>>,
    internal: RefCell<Option<InternalSlot>>,
    resolver: RefCell<Option<LazyResolver>>,
    frozen: Cell<bool>,
}

/// A reference to a script object
#[derive(Clone)]
pub struct JsObject(pub(crate) Rc<ObjectCell>);

/// A weak reference to a script object
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectCell>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<JsObject> {
        self.0.upgrade().map(JsObject)
    }
}

/// Parse a canonical array index (`"0"`, `"17"`, but not `"01"` or `"-1"`)
fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

impl JsObject {
    pub(crate) fn with_kind(kind: ObjectKind, prototype: Option<JsObject>) -> Self {
        JsObject(Rc::new(ObjectCell {
            kind: RefCell::new(kind),
            properties: RefCell::new(IndexMap::new()),
            prototype: RefCell::new(prototype),
            internal: RefCell::new(None),
            resolver: RefCell::new(None),
            frozen: Cell::new(false),
        }))
    }

    /// Create an ordinary object
    pub fn new() -> Self {
        Self::with_kind(ObjectKind::Ordinary, None)
    }

    /// Create an ordinary object with the given prototype
    pub fn with_prototype(prototype: Option<JsObject>) -> Self {
        Self::with_kind(ObjectKind::Ordinary, prototype)
    }

    /// Create an array
    pub fn array(items: Vec<Value>) -> Self {
        Self::with_kind(ObjectKind::Array(items), None)
    }

    /// Create a plain function
    pub fn function(name: impl Into<String>, call: NativeFunction) -> Self {
        Self::with_kind(
            ObjectKind::Function {
                name: name.into(),
                call,
                construct: None,
            },
            None,
        )
    }

    /// Create a constructor function with a fresh `prototype` object.
    ///
    /// The `construct` body receives the constructor itself as `this`.
    pub fn constructor(
        name: impl Into<String>,
        call: NativeFunction,
        construct: NativeFunction,
    ) -> Self {
        let ctor = Self::with_kind(
            ObjectKind::Function {
                name: name.into(),
                call,
                construct: Some(construct),
            },
            None,
        );
        let prototype = JsObject::new();
        prototype.define_property("constructor", Property::hidden(Value::Object(ctor.clone())));
        ctor.define_property("prototype", Property::hidden(Value::Object(prototype)));
        ctor
    }

    /// Create an exotic object
    pub fn exotic(handler: Rc<dyn ExoticObject>) -> Self {
        Self::with_kind(ObjectKind::Exotic(handler), None)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity key
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.0.kind.borrow(), ObjectKind::Array(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(&*self.0.kind.borrow(), ObjectKind::Function { .. })
    }

    pub fn is_constructor(&self) -> bool {
        matches!(
            &*self.0.kind.borrow(),
            ObjectKind::Function {
                construct: Some(_),
                ..
            }
        )
    }

    pub fn is_promise(&self) -> bool {
        matches!(&*self.0.kind.borrow(), ObjectKind::Promise(_))
    }

    pub fn is_exotic(&self) -> bool {
        matches!(&*self.0.kind.borrow(), ObjectKind::Exotic(_))
    }

    pub fn function_name(&self) -> Option<String> {
        match &*self.0.kind.borrow() {
            ObjectKind::Function { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    fn exotic_handler(&self) -> Option<Rc<dyn ExoticObject>> {
        match &*self.0.kind.borrow() {
            ObjectKind::Exotic(handler) => Some(handler.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Prototype, internal slot, resolver
    // ------------------------------------------------------------------

    pub fn prototype(&self) -> Option<JsObject> {
        self.0.prototype.borrow().clone()
    }

    pub fn set_prototype(&self, prototype: Option<JsObject>) {
        *self.0.prototype.borrow_mut() = prototype;
    }

    /// Attach an opaque handle to this object
    pub fn set_internal(&self, slot: InternalSlot) {
        *self.0.internal.borrow_mut() = Some(slot);
    }

    pub fn internal(&self) -> Option<InternalSlot> {
        self.0.internal.borrow().clone()
    }

    /// Downcast the internal slot
    pub fn internal_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.internal().and_then(|slot| slot.downcast::<T>().ok())
    }

    pub fn set_resolver(&self, resolver: LazyResolver) {
        *self.0.resolver.borrow_mut() = Some(resolver);
    }

    /// Prevent further assignments through [`JsObject::set`]
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Define (or replace) an own property
    pub fn define_property(&self, key: impl Into<String>, property: Property) {
        self.0.properties.borrow_mut().insert(key.into(), property);
    }

    /// Define an enumerable, writable data property
    pub fn define_value(&self, key: impl Into<String>, value: Value) {
        self.define_property(key, Property::data(value));
    }

    /// Define an accessor property
    pub fn define_accessor(
        &self,
        key: impl Into<String>,
        get: Option<GetterFn>,
        set: Option<SetterFn>,
    ) {
        self.define_property(
            key,
            Property::Accessor {
                get,
                set,
                enumerable: true,
            },
        );
    }

    /// Define a non-enumerable native method
    pub fn define_method(&self, name: &str, call: NativeFunction) {
        let function = JsObject::function(name, call);
        self.define_property(name, Property::hidden(Value::Object(function)));
    }

    pub fn get_own_property(&self, key: &str) -> Option<Property> {
        self.0.properties.borrow().get(key).cloned()
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.properties.borrow().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.0.properties.borrow_mut().shift_remove(key).is_some()
    }

    /// Read a property, walking exotic handlers, arrays, own properties, the
    /// lazy resolver and finally the prototype chain.
    pub fn get(&self, realm: &Realm, key: &str) -> ScriptResult<Value> {
        self.get_with_receiver(realm, key, &Value::Object(self.clone()))
    }

    fn get_with_receiver(&self, realm: &Realm, key: &str, receiver: &Value) -> ScriptResult<Value> {
        if let Some(handler) = self.exotic_handler() {
            if let Some(value) = handler.get(realm, key)? {
                return Ok(value);
            }
        }

        if let Some(value) = self.array_property(key) {
            return Ok(value);
        }

        let own = self.get_own_property(key);
        if let Some(property) = own {
            return match property {
                Property::Data { value, .. } => Ok(value),
                Property::Accessor { get: Some(get), .. } => get(realm, receiver),
                Property::Accessor { get: None, .. } => Ok(Value::Undefined),
            };
        }

        let resolver = self.0.resolver.borrow().clone();
        if let Some(resolver) = resolver {
            if let Some(value) = resolver(realm, self, key)? {
                if !self.has_own(key) {
                    self.define_value(key, value.clone());
                }
                return Ok(value);
            }
        }

        match self.prototype() {
            Some(prototype) => prototype.get_with_receiver(realm, key, receiver),
            None => Ok(Value::Undefined),
        }
    }

    fn array_property(&self, key: &str) -> Option<Value> {
        match &*self.0.kind.borrow() {
            ObjectKind::Array(items) => {
                if key == "length" {
                    Some(Value::Number(items.len() as f64))
                } else {
                    array_index(key).map(|i| items.get(i).cloned().unwrap_or_default())
                }
            }
            _ => None,
        }
    }

    /// Assign a property, honoring accessors found along the prototype chain
    pub fn set(&self, realm: &Realm, key: &str, value: Value) -> ScriptResult<()> {
        if let Some(handler) = self.exotic_handler() {
            if handler.set(realm, key, value.clone())? {
                return Ok(());
            }
        }

        if self.is_array() && (key == "length" || array_index(key).is_some()) {
            if self.is_frozen() {
                return Err(ScriptError::type_error(format!(
                    "Cannot assign to '{}' of a frozen array",
                    key
                )));
            }
            return self.array_assign(key, value);
        }

        let receiver = Value::Object(self.clone());
        let mut current = Some(self.clone());
        while let Some(holder) = current {
            match holder.get_own_property(key) {
                Some(Property::Accessor { set: Some(set), .. }) => {
                    return set(realm, &receiver, value);
                }
                Some(Property::Accessor { set: None, .. }) => {
                    return Err(ScriptError::type_error(format!(
                        "Cannot set property '{}' which has only a getter",
                        key
                    )));
                }
                Some(Property::Data {
                    writable: false, ..
                }) => {
                    return Err(ScriptError::type_error(format!(
                        "Cannot assign to read only property '{}'",
                        key
                    )));
                }
                Some(Property::Data { .. }) => break,
                None => current = holder.prototype(),
            }
        }

        if self.is_frozen() {
            return Err(ScriptError::type_error(format!(
                "Cannot add property '{}', object is not extensible",
                key
            )));
        }

        let mut properties = self.0.properties.borrow_mut();
        match properties.get_mut(key) {
            Some(Property::Data { value: slot, .. }) => *slot = value,
            _ => {
                properties.insert(key.to_string(), Property::data(value));
            }
        }
        Ok(())
    }

    fn array_assign(&self, key: &str, value: Value) -> ScriptResult<()> {
        let mut kind = self.0.kind.borrow_mut();
        let ObjectKind::Array(items) = &mut *kind else {
            return Ok(());
        };
        if key == "length" {
            let len = value
                .as_number()
                .filter(|n| n.fract() == 0.0 && *n >= 0.0)
                .ok_or_else(|| ScriptError::range_error("Invalid array length"))?;
            items.resize(len as usize, Value::Undefined);
        } else if let Some(index) = array_index(key) {
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
        }
        Ok(())
    }

    /// Check for a property along the prototype chain (the lazy resolver is
    /// not consulted)
    pub fn has(&self, realm: &Realm, key: &str) -> ScriptResult<bool> {
        if let Some(handler) = self.exotic_handler() {
            if handler.has(realm, key)? {
                return Ok(true);
            }
        }
        if self.array_property(key).is_some_and(|v| !v.is_undefined()) || self.has_own(key) {
            return Ok(true);
        }
        match self.prototype() {
            Some(prototype) => prototype.has(realm, key),
            None => Ok(false),
        }
    }

    /// Enumerable own keys (array indices first)
    pub fn keys(&self, realm: &Realm) -> ScriptResult<Vec<String>> {
        if let Some(handler) = self.exotic_handler() {
            return handler.own_keys(realm);
        }
        let mut keys: Vec<String> = match &*self.0.kind.borrow() {
            ObjectKind::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        };
        keys.extend(
            self.0
                .properties
                .borrow()
                .iter()
                .filter(|(_, p)| p.is_enumerable())
                .map(|(k, _)| k.clone()),
        );
        Ok(keys)
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    pub fn array_len(&self) -> Option<usize> {
        match &*self.0.kind.borrow() {
            ObjectKind::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    pub fn array_get(&self, index: usize) -> Option<Value> {
        match &*self.0.kind.borrow() {
            ObjectKind::Array(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    /// Snapshot of the array elements
    pub fn array_values(&self) -> Option<Vec<Value>> {
        match &*self.0.kind.borrow() {
            ObjectKind::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    pub fn array_push(&self, value: Value) -> bool {
        match &mut *self.0.kind.borrow_mut() {
            ObjectKind::Array(items) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    /// Mutate the array elements in place; `None` if this is not an array
    pub fn with_array_mut<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        match &mut *self.0.kind.borrow_mut() {
            ObjectKind::Array(items) => Some(f(items)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call this object as a function
    pub fn call(&self, realm: &Realm, this: &Value, args: &[Value]) -> ScriptResult<Value> {
        let call = match &*self.0.kind.borrow() {
            ObjectKind::Function { call, .. } => call.clone(),
            _ => return Err(ScriptError::type_error("object is not a function")),
        };
        call(realm, this, args)
    }

    /// Call this object as a constructor (`new`)
    pub fn construct(&self, realm: &Realm, args: &[Value]) -> ScriptResult<Value> {
        let (name, construct) = match &*self.0.kind.borrow() {
            ObjectKind::Function {
                name,
                construct: Some(construct),
                ..
            } => (name.clone(), construct.clone()),
            _ => return Err(ScriptError::type_error("object is not a constructor")),
        };
        construct(realm, &Value::Object(self.clone()), args)
            .map_err(|e| e.with_frame(format!("new {}", name)))
    }

    /// Look up `name` and call it with this object as receiver
    pub fn call_method(&self, realm: &Realm, name: &str, args: &[Value]) -> ScriptResult<Value> {
        let function = self.get(realm, name)?;
        match function.as_object() {
            Some(f) if f.is_function() => f
                .call(realm, &Value::Object(self.clone()), args)
                .map_err(|e| e.with_frame(name.to_string())),
            _ => Err(ScriptError::type_error(format!("{} is not a function", name))),
        }
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.0.kind.borrow() {
            ObjectKind::Ordinary => write!(f, "JsObject({:#x})", self.id()),
            ObjectKind::Array(items) => write!(f, "JsArray(len={})", items.len()),
            ObjectKind::Function { name, .. } => write!(f, "JsFunction({})", name),
            ObjectKind::Promise(_) => write!(f, "JsPromise({:#x})", self.id()),
            ObjectKind::Exotic(_) => write!(f, "JsExotic({:#x})", self.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_index_parsing() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }

    #[test]
    fn test_get_walks_prototype_chain() {
        let realm = Realm::new();
        let base = JsObject::new();
        base.define_value("greeting", Value::from("hi"));
        let derived = JsObject::with_prototype(Some(base));
        assert_eq!(derived.get(&realm, "greeting").unwrap(), Value::from("hi"));
        assert!(derived.get(&realm, "missing").unwrap().is_undefined());
    }

    #[test]
    fn test_accessor_receives_receiver() {
        let realm = Realm::new();
        let proto = JsObject::new();
        proto.define_accessor(
            "self_id",
            Some(Rc::new(|_realm: &Realm, this: &Value| {
                Ok(Value::Number(this.as_object().map(|o| o.id()).unwrap_or(0) as f64))
            })),
            None,
        );
        let instance = JsObject::with_prototype(Some(proto));
        let id = instance.get(&realm, "self_id").unwrap();
        assert_eq!(id, Value::Number(instance.id() as f64));
    }

    #[test]
    fn test_set_on_getter_only_property_fails() {
        let realm = Realm::new();
        let obj = JsObject::new();
        obj.define_accessor("x", Some(Rc::new(|_: &Realm, _: &Value| Ok(Value::Null))), None);
        assert!(obj.set(&realm, "x", Value::from(1)).is_err());
    }

    #[test]
    fn test_resolver_memoizes() {
        let realm = Realm::new();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let obj = JsObject::new();
        obj.set_resolver(Rc::new(move |_realm: &Realm, _holder: &JsObject, key: &str| {
            counter.set(counter.get() + 1);
            Ok((key == "lazy").then(|| Value::from(7)))
        }));
        assert_eq!(obj.get(&realm, "lazy").unwrap(), Value::from(7));
        assert_eq!(obj.get(&realm, "lazy").unwrap(), Value::from(7));
        assert_eq!(calls.get(), 1);
        assert!(obj.get(&realm, "other").unwrap().is_undefined());
    }

    #[test]
    fn test_array_length_and_growth() {
        let realm = Realm::new();
        let arr = JsObject::array(vec![Value::from(1)]);
        arr.set(&realm, "3", Value::from(4)).unwrap();
        assert_eq!(arr.array_len(), Some(4));
        assert!(arr.get(&realm, "1").unwrap().is_undefined());
        arr.set(&realm, "length", Value::from(1)).unwrap();
        assert_eq!(arr.get(&realm, "length").unwrap(), Value::from(1));
    }

    #[test]
    fn test_frozen_object_rejects_new_properties() {
        let realm = Realm::new();
        let obj = JsObject::new();
        obj.freeze();
        assert!(obj.set(&realm, "a", Value::Null).is_err());
    }
}
