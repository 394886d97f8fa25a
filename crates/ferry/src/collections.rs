//! Collection adapters
//!
//! Collections cross the boundary without being copied. A script array seen
//! by the host becomes a [`ScriptArrayAdapter`] implementing the list, set
//! and iterable contracts; a plain script object becomes a
//! [`ScriptMapAdapter`] with string keys. A host collection seen by script
//! becomes an exotic view object. Every operation converts elements on the
//! fly, and adapter operations issued off the script thread hop onto it.
//!
//! Both directions unwrap: an adapter converted back yields the original
//! script object, a view converted back yields the original host collection.

use std::any::Any;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use ferry_reflect::{
    CollectionKind, HostError, HostIterable, HostList, HostMap, HostResult, HostSet, HostValue, TypeSig,
};
use ferry_script::{ExoticObject, JsObject, JsRef, Realm, ScriptError, ScriptResult, Value, format_number};
use tracing::trace;

use crate::error::{MarshalError, MarshalResult};
use crate::marshaller::Marshaller;
use crate::registry::{HostSlot, unwrap_slot};

/// Host view of a collection for a script value
pub(crate) fn to_host(
    m: &Marshaller,
    realm: &Realm,
    kind: CollectionKind,
    args: &[TypeSig],
    value: &Value,
) -> MarshalResult<HostValue> {
    let mismatch = |found: String| MarshalError::type_mismatch(kind.name(), found);
    if let Some(host) = unwrap_slot(value) {
        return match (kind, host) {
            (CollectionKind::List, list @ HostValue::List(_))
            | (CollectionKind::Set, list @ HostValue::Set(_))
            | (CollectionKind::Map, list @ HostValue::Map(_)) => Ok(list),
            (
                CollectionKind::Iterable,
                seq @ (HostValue::List(_) | HostValue::Set(_) | HostValue::Iterable(_)),
            ) => Ok(seq),
            (_, other) => Err(mismatch(other.kind_name())),
        };
    }
    let Some(object) = value.as_object() else {
        return Err(mismatch(value.type_name().to_string()));
    };
    let target = realm.persist(value.clone());
    match kind {
        CollectionKind::List | CollectionKind::Set | CollectionKind::Iterable if object.is_array() => {
            let adapter = Arc::new(ScriptArrayAdapter::new(m.weak(), target, arg(args, 0)));
            Ok(match kind {
                CollectionKind::List => HostValue::List(adapter),
                CollectionKind::Set => HostValue::Set(adapter),
                _ => HostValue::Iterable(adapter),
            })
        }
        CollectionKind::Map if !object.is_array() && !object.is_function() => Ok(HostValue::Map(Arc::new(
            ScriptMapAdapter::new(m.weak(), target, arg(args, 0), arg(args, 1)),
        ))),
        _ => Err(mismatch(value.type_name().to_string())),
    }
}

/// Script view of a host collection
pub(crate) fn to_script(
    m: &Marshaller,
    realm: &Realm,
    kind: CollectionKind,
    args: &[TypeSig],
    value: &HostValue,
) -> MarshalResult<Value> {
    let elem = arg(args, 0);
    match (kind, value) {
        (_, HostValue::List(list)) => match list.as_any().downcast_ref::<ScriptArrayAdapter>() {
            Some(adapter) => Ok(adapter.target().get(realm)?),
            None => Ok(Value::Object(list_view(m, realm, list.clone(), elem))),
        },
        (_, HostValue::Set(set)) => match set.as_any().downcast_ref::<ScriptArrayAdapter>() {
            Some(adapter) => Ok(adapter.target().get(realm)?),
            None => Ok(Value::Object(set_view(m, realm, set.clone(), elem))),
        },
        (_, HostValue::Iterable(iter)) => match iter.as_any().downcast_ref::<ScriptArrayAdapter>() {
            Some(adapter) => Ok(adapter.target().get(realm)?),
            None => Ok(Value::Object(iterable_view(m, realm, iter.clone(), elem))),
        },
        (CollectionKind::Map, HostValue::Map(map)) => match map.as_any().downcast_ref::<ScriptMapAdapter>() {
            Some(adapter) => Ok(adapter.target().get(realm)?),
            None => Ok(Value::Object(map_view(m, realm, map.clone(), elem, arg(args, 1)))),
        },
        (CollectionKind::List | CollectionKind::Set | CollectionKind::Iterable, HostValue::Array(items)) => {
            let converter = m.get_converter(&elem)?;
            let items = items
                .iter()
                .map(|item| converter.to_script(m, realm, item))
                .collect::<MarshalResult<Vec<_>>>()?;
            Ok(Value::Object(realm.create_array(items)))
        }
        (_, other) => Err(MarshalError::type_mismatch(kind.name(), other.kind_name())),
    }
}

fn arg(args: &[TypeSig], index: usize) -> TypeSig {
    args.get(index).cloned().unwrap_or(TypeSig::Any)
}

/// Map keys travel as property names
fn key_to_string(key: &HostValue) -> HostResult<String> {
    match key {
        HostValue::String(s) => Ok(s.to_string()),
        HostValue::Char(c) => Ok(c.to_string()),
        HostValue::Bool(b) => Ok(b.to_string()),
        HostValue::Enum(e) => Ok(e.value.to_string()),
        other => other
            .as_f64()
            .map(format_number)
            .ok_or_else(|| HostError::type_mismatch("map key", other.kind_name())),
    }
}

fn key_from_string(m: &Marshaller, realm: &Realm, sig: &TypeSig, key: &str) -> MarshalResult<HostValue> {
    let converter = m.get_converter(sig)?;
    match converter.to_host(m, realm, &Value::string(key)) {
        Ok(value) => Ok(value),
        Err(err) => match key.parse::<f64>() {
            Ok(n) => converter.to_host(m, realm, &Value::Number(n)),
            Err(_) => Err(err),
        },
    }
}

fn parse_index(key: &str) -> Option<usize> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}

// ---------------------------------------------------------------------------
// Script collections seen by the host
// ---------------------------------------------------------------------------

/// A script object held by a host adapter
struct ScriptTarget {
    target: JsRef,
    marshaller: Weak<Marshaller>,
}

impl ScriptTarget {
    /// Run `f` against the target on the script thread
    fn run<R, F>(&self, op: &'static str, f: F) -> HostResult<R>
    where
        F: FnOnce(&Marshaller, &Realm, &JsObject) -> MarshalResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let m = Marshaller::upgrade(&self.marshaller)?;
        let target = self.target.clone();
        trace!(realm = target.realm_id(), op, "collection adapter call");
        let outcome = self
            .target
            .dispatcher()
            .run(move |realm| {
                let object = target.object(realm)?;
                f(&m, realm, &object)
            })
            .map_err(MarshalError::from)?;
        Ok(outcome?)
    }
}

fn not_an_array() -> MarshalError {
    MarshalError::type_mismatch("array", "object")
}

/// Host list, set and iterable over a script array
pub struct ScriptArrayAdapter {
    inner: ScriptTarget,
    elem: TypeSig,
}

impl ScriptArrayAdapter {
    pub fn new(marshaller: Weak<Marshaller>, target: JsRef, elem: TypeSig) -> Self {
        Self {
            inner: ScriptTarget { target, marshaller },
            elem,
        }
    }

    /// The adapted script array
    pub fn target(&self) -> &JsRef {
        &self.inner.target
    }

    fn elements(&self) -> HostResult<Vec<HostValue>> {
        let elem = self.elem.clone();
        self.inner.run("snapshot", move |m, realm, array| {
            let converter = m.get_converter(&elem)?;
            array
                .array_values()
                .ok_or_else(not_an_array)?
                .iter()
                .map(|item| converter.to_host(m, realm, item))
                .collect()
        })
    }

    fn count(&self) -> HostResult<usize> {
        self.inner
            .run("len", |_, _, array| array.array_len().ok_or_else(not_an_array))
    }

    fn append(&self, value: HostValue) -> HostResult<()> {
        let elem = self.elem.clone();
        self.inner.run("push", move |m, realm, array| {
            let item = m.to_script(realm, &elem, &value)?;
            if array.array_push(item) {
                Ok(())
            } else {
                Err(not_an_array())
            }
        })
    }

    fn remove_index(&self, index: usize) -> HostResult<HostValue> {
        let elem = self.elem.clone();
        self.inner.run("remove_at", move |m, realm, array| {
            let removed = array
                .with_array_mut(|items| {
                    if index < items.len() {
                        Ok(items.remove(index))
                    } else {
                        Err(HostError::IndexOutOfRange { index, len: items.len() })
                    }
                })
                .ok_or_else(not_an_array)??;
            m.to_host(realm, &elem, &removed)
        })
    }
}

impl HostList for ScriptArrayAdapter {
    fn len(&self) -> HostResult<usize> {
        self.count()
    }

    fn get(&self, index: usize) -> HostResult<HostValue> {
        let elem = self.elem.clone();
        self.inner.run("get", move |m, realm, array| {
            let len = array.array_len().ok_or_else(not_an_array)?;
            let item = array
                .array_get(index)
                .ok_or(HostError::IndexOutOfRange { index, len })?;
            m.to_host(realm, &elem, &item)
        })
    }

    fn set(&self, index: usize, value: HostValue) -> HostResult<()> {
        let elem = self.elem.clone();
        self.inner.run("set", move |m, realm, array| {
            let item = m.to_script(realm, &elem, &value)?;
            array
                .with_array_mut(|items| match items.get_mut(index) {
                    Some(slot) => {
                        *slot = item;
                        Ok(())
                    }
                    None => Err(HostError::IndexOutOfRange { index, len: items.len() }),
                })
                .ok_or_else(not_an_array)?
                .map_err(MarshalError::from)
        })
    }

    fn push(&self, value: HostValue) -> HostResult<()> {
        self.append(value)
    }

    fn remove_at(&self, index: usize) -> HostResult<HostValue> {
        self.remove_index(index)
    }

    fn clear(&self) -> HostResult<()> {
        self.inner.run("clear", |_, _, array| {
            array.with_array_mut(Vec::clear).ok_or_else(not_an_array)
        })
    }

    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        self.elements()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostSet for ScriptArrayAdapter {
    fn len(&self) -> HostResult<usize> {
        self.count()
    }

    fn contains(&self, value: &HostValue) -> HostResult<bool> {
        Ok(self.elements()?.contains(value))
    }

    fn add(&self, value: HostValue) -> HostResult<bool> {
        if self.elements()?.contains(&value) {
            return Ok(false);
        }
        self.append(value)?;
        Ok(true)
    }

    fn remove(&self, value: &HostValue) -> HostResult<bool> {
        match self.elements()?.iter().position(|item| item == value) {
            Some(index) => self.remove_index(index).map(|_| true),
            None => Ok(false),
        }
    }

    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        self.elements()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostIterable for ScriptArrayAdapter {
    fn snapshot(&self) -> HostResult<Vec<HostValue>> {
        self.elements()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host map over the own properties of a script object
pub struct ScriptMapAdapter {
    inner: ScriptTarget,
    key: TypeSig,
    value: TypeSig,
}

impl ScriptMapAdapter {
    pub fn new(marshaller: Weak<Marshaller>, target: JsRef, key: TypeSig, value: TypeSig) -> Self {
        Self {
            inner: ScriptTarget { target, marshaller },
            key,
            value,
        }
    }

    pub fn target(&self) -> &JsRef {
        &self.inner.target
    }

    fn lookup(&self, op: &'static str, key: &HostValue, delete: bool) -> HostResult<Option<HostValue>> {
        let name = key_to_string(key)?;
        let value_sig = self.value.clone();
        self.inner.run(op, move |m, realm, object| {
            if !object.has_own(&name) {
                return Ok(None);
            }
            let raw = object.get(realm, &name)?;
            if delete {
                object.delete(&name);
            }
            m.to_host(realm, &value_sig, &raw).map(Some)
        })
    }
}

impl HostMap for ScriptMapAdapter {
    fn len(&self) -> HostResult<usize> {
        self.inner.run("len", |_, realm, object| Ok(object.keys(realm)?.len()))
    }

    fn get(&self, key: &HostValue) -> HostResult<Option<HostValue>> {
        self.lookup("get", key, false)
    }

    fn insert(&self, key: HostValue, value: HostValue) -> HostResult<Option<HostValue>> {
        let previous = self.lookup("get", &key, false)?;
        let name = key_to_string(&key)?;
        let value_sig = self.value.clone();
        self.inner.run("insert", move |m, realm, object| {
            let converted = m.to_script(realm, &value_sig, &value)?;
            object.set(realm, &name, converted)?;
            Ok(())
        })?;
        Ok(previous)
    }

    fn remove(&self, key: &HostValue) -> HostResult<Option<HostValue>> {
        self.lookup("remove", key, true)
    }

    fn keys(&self) -> HostResult<Vec<HostValue>> {
        let key_sig = self.key.clone();
        self.inner.run("keys", move |m, realm, object| {
            object
                .keys(realm)?
                .iter()
                .map(|key| key_from_string(m, realm, &key_sig, key))
                .collect()
        })
    }

    fn contains_key(&self, key: &HostValue) -> HostResult<bool> {
        let name = key_to_string(key)?;
        self.inner.run("contains_key", move |_, _, object| Ok(object.has_own(&name)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Host collections seen by script
// ---------------------------------------------------------------------------

const VIEW_FRAME: &str = "<host collection>";

fn script_failure(err: impl Into<MarshalError>) -> ScriptError {
    err.into().into_script_error(VIEW_FRAME)
}

fn upgrade(marshaller: &Weak<Marshaller>) -> ScriptResult<Arc<Marshaller>> {
    Marshaller::upgrade(marshaller).map_err(script_failure)
}

fn first_arg(args: &[Value]) -> &Value {
    args.first().unwrap_or(&Value::Undefined)
}

fn tag(view: &JsObject, value: HostValue) {
    view.set_internal(Arc::new(HostSlot(value)));
}

fn elements_to_script(marshaller: &Weak<Marshaller>, realm: &Realm, elem: &TypeSig, items: &[HostValue]) -> ScriptResult<Value> {
    let m = upgrade(marshaller)?;
    let converted = items
        .iter()
        .map(|item| m.to_script(realm, elem, item))
        .collect::<MarshalResult<Vec<_>>>()
        .map_err(script_failure)?;
    Ok(Value::Object(realm.create_array(converted)))
}

struct ListView {
    list: Arc<dyn HostList>,
    elem: TypeSig,
    marshaller: Weak<Marshaller>,
}

impl ExoticObject for ListView {
    fn get(&self, realm: &Realm, key: &str) -> ScriptResult<Option<Value>> {
        if key == "length" {
            return Ok(Some(Value::Number(self.list.len().map_err(script_failure)? as f64)));
        }
        let Some(index) = parse_index(key) else {
            return Ok(None);
        };
        if index >= self.list.len().map_err(script_failure)? {
            return Ok(Some(Value::Undefined));
        }
        let item = self.list.get(index).map_err(script_failure)?;
        let m = upgrade(&self.marshaller)?;
        m.to_script(realm, &self.elem, &item).map(Some).map_err(script_failure)
    }

    fn set(&self, realm: &Realm, key: &str, value: Value) -> ScriptResult<bool> {
        let Some(index) = parse_index(key) else {
            return Ok(false);
        };
        let m = upgrade(&self.marshaller)?;
        let item = m.to_host(realm, &self.elem, &value).map_err(script_failure)?;
        let len = self.list.len().map_err(script_failure)?;
        if index < len {
            self.list.set(index, item).map_err(script_failure)?;
        } else if index == len {
            self.list.push(item).map_err(script_failure)?;
        } else {
            return Err(ScriptError::range_error(format!("index {} beyond length {}", index, len)));
        }
        Ok(true)
    }

    fn own_keys(&self, _realm: &Realm) -> ScriptResult<Vec<String>> {
        let len = self.list.len().map_err(script_failure)?;
        Ok((0..len).map(|i| i.to_string()).collect())
    }

    fn has(&self, _realm: &Realm, key: &str) -> ScriptResult<bool> {
        match parse_index(key) {
            Some(index) => Ok(index < self.list.len().map_err(script_failure)?),
            None => Ok(key == "length"),
        }
    }
}

/// Script view of a host list: indexable, with `length`, `push`,
/// `removeAt`, `clear` and `toArray`
pub fn list_view(m: &Marshaller, realm: &Realm, list: Arc<dyn HostList>, elem: TypeSig) -> JsObject {
    let view = realm.create_exotic(Rc::new(ListView {
        list: list.clone(),
        elem: elem.clone(),
        marshaller: m.weak(),
    }));
    tag(&view, HostValue::List(list.clone()));

    let (target, elem_sig, weak) = (list.clone(), elem.clone(), m.weak());
    view.define_method(
        "push",
        Rc::new(move |realm, _, args| {
            let m = upgrade(&weak)?;
            let item = m.to_host(realm, &elem_sig, first_arg(args)).map_err(script_failure)?;
            target.push(item).map_err(script_failure)?;
            Ok(Value::Number(target.len().map_err(script_failure)? as f64))
        }),
    );
    let (target, elem_sig, weak) = (list.clone(), elem.clone(), m.weak());
    view.define_method(
        "removeAt",
        Rc::new(move |realm, _, args| {
            let index = first_arg(args)
                .as_number()
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .ok_or_else(|| ScriptError::type_error("removeAt expects an index"))?;
            let removed = target.remove_at(index as usize).map_err(script_failure)?;
            upgrade(&weak)?
                .to_script(realm, &elem_sig, &removed)
                .map_err(script_failure)
        }),
    );
    let target = list.clone();
    view.define_method(
        "clear",
        Rc::new(move |_, _, _| {
            target.clear().map_err(script_failure)?;
            Ok(Value::Undefined)
        }),
    );
    let weak = m.weak();
    view.define_method(
        "toArray",
        Rc::new(move |realm, _, _| {
            let items = list.snapshot().map_err(script_failure)?;
            elements_to_script(&weak, realm, &elem, &items)
        }),
    );
    view
}

struct SetView {
    set: Arc<dyn HostSet>,
}

impl ExoticObject for SetView {
    fn get(&self, _realm: &Realm, key: &str) -> ScriptResult<Option<Value>> {
        if key == "size" {
            return Ok(Some(Value::Number(self.set.len().map_err(script_failure)? as f64)));
        }
        Ok(None)
    }

    fn set(&self, _realm: &Realm, _key: &str, _value: Value) -> ScriptResult<bool> {
        Ok(false)
    }

    fn own_keys(&self, _realm: &Realm) -> ScriptResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Script view of a host set: `size`, `has`, `add`, `delete`, `values`
pub fn set_view(m: &Marshaller, realm: &Realm, set: Arc<dyn HostSet>, elem: TypeSig) -> JsObject {
    let view = realm.create_exotic(Rc::new(SetView { set: set.clone() }));
    tag(&view, HostValue::Set(set.clone()));

    type SetOp = fn(&dyn HostSet, HostValue) -> HostResult<bool>;
    let ops: [(&str, SetOp); 3] = [
        ("has", |set, v| set.contains(&v)),
        ("add", |set, v| set.add(v)),
        ("delete", |set, v| set.remove(&v)),
    ];
    for (name, op) in ops {
        let (target, elem_sig, weak) = (set.clone(), elem.clone(), m.weak());
        view.define_method(
            name,
            Rc::new(move |realm, _, args| {
                let m = upgrade(&weak)?;
                let item = m.to_host(realm, &elem_sig, first_arg(args)).map_err(script_failure)?;
                op(target.as_ref(), item).map(Value::Bool).map_err(script_failure)
            }),
        );
    }
    let weak = m.weak();
    view.define_method(
        "values",
        Rc::new(move |realm, _, _| {
            let items = set.snapshot().map_err(script_failure)?;
            elements_to_script(&weak, realm, &elem, &items)
        }),
    );
    view
}

struct MapView {
    map: Arc<dyn HostMap>,
    key: TypeSig,
    value: TypeSig,
    marshaller: Weak<Marshaller>,
}

impl MapView {
    fn host_key(&self, realm: &Realm, key: &str) -> ScriptResult<(Arc<Marshaller>, HostValue)> {
        let m = upgrade(&self.marshaller)?;
        let key = key_from_string(&m, realm, &self.key, key).map_err(script_failure)?;
        Ok((m, key))
    }
}

impl ExoticObject for MapView {
    fn get(&self, realm: &Realm, key: &str) -> ScriptResult<Option<Value>> {
        let Ok((m, host_key)) = self.host_key(realm, key) else {
            return Ok(None);
        };
        match self.map.get(&host_key).map_err(script_failure)? {
            Some(value) => m.to_script(realm, &self.value, &value).map(Some).map_err(script_failure),
            None => Ok(None),
        }
    }

    fn set(&self, realm: &Realm, key: &str, value: Value) -> ScriptResult<bool> {
        let (m, host_key) = self.host_key(realm, key)?;
        let value = m.to_host(realm, &self.value, &value).map_err(script_failure)?;
        self.map.insert(host_key, value).map_err(script_failure)?;
        Ok(true)
    }

    fn own_keys(&self, _realm: &Realm) -> ScriptResult<Vec<String>> {
        self.map
            .keys()
            .map_err(script_failure)?
            .iter()
            .map(|k| key_to_string(k).map_err(script_failure))
            .collect()
    }

    fn has(&self, realm: &Realm, key: &str) -> ScriptResult<bool> {
        match self.host_key(realm, key) {
            Ok((_, host_key)) => self.map.contains_key(&host_key).map_err(script_failure),
            Err(_) => Ok(false),
        }
    }

    fn delete(&self, realm: &Realm, key: &str) -> ScriptResult<bool> {
        let (_, host_key) = self.host_key(realm, key)?;
        Ok(self.map.remove(&host_key).map_err(script_failure)?.is_some())
    }
}

/// Script view of a host map; entries appear as properties
pub fn map_view(m: &Marshaller, realm: &Realm, map: Arc<dyn HostMap>, key: TypeSig, value: TypeSig) -> JsObject {
    let view = realm.create_exotic(Rc::new(MapView {
        map: map.clone(),
        key,
        value,
        marshaller: m.weak(),
    }));
    tag(&view, HostValue::Map(map));
    view
}

struct IterableView {
    iter: Arc<dyn HostIterable>,
    elem: TypeSig,
    marshaller: Weak<Marshaller>,
}

impl ExoticObject for IterableView {
    fn get(&self, realm: &Realm, key: &str) -> ScriptResult<Option<Value>> {
        if key == "length" {
            return Ok(Some(Value::Number(self.iter.snapshot().map_err(script_failure)?.len() as f64)));
        }
        let Some(index) = parse_index(key) else {
            return Ok(None);
        };
        let items = self.iter.snapshot().map_err(script_failure)?;
        match items.get(index) {
            Some(item) => upgrade(&self.marshaller)?
                .to_script(realm, &self.elem, item)
                .map(Some)
                .map_err(script_failure),
            None => Ok(Some(Value::Undefined)),
        }
    }

    fn set(&self, _realm: &Realm, key: &str, _value: Value) -> ScriptResult<bool> {
        match parse_index(key) {
            Some(_) => Err(ScriptError::type_error("host sequence is read-only")),
            None => Ok(false),
        }
    }

    fn own_keys(&self, _realm: &Realm) -> ScriptResult<Vec<String>> {
        let len = self.iter.snapshot().map_err(script_failure)?.len();
        Ok((0..len).map(|i| i.to_string()).collect())
    }
}

/// Read-only indexable script view of a host sequence, with `toArray`
pub fn iterable_view(m: &Marshaller, realm: &Realm, iter: Arc<dyn HostIterable>, elem: TypeSig) -> JsObject {
    let view = realm.create_exotic(Rc::new(IterableView {
        iter: iter.clone(),
        elem: elem.clone(),
        marshaller: m.weak(),
    }));
    tag(&view, HostValue::Iterable(iter.clone()));
    let weak = m.weak();
    view.define_method(
        "toArray",
        Rc::new(move |realm, _, _| {
            let items = iter.snapshot().map_err(script_failure)?;
            elements_to_script(&weak, realm, &elem, &items)
        }),
    );
    view
}
