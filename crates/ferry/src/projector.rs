//! Type graph projection
//!
//! Host namespaces and types appear in the realm on demand. A namespace
//! object resolves unknown names against the known-types index and exports
//! exactly the demanded type or child namespace. An exported type is a
//! [`TypeNode`] whose projection is placed in the export cache before its
//! members are filled, so a member referring back to its own type observes
//! the placeholder instead of recursing.
//!
//! Members are deferred by default: each starts as an accessor placeholder
//! that replaces itself with the real member on first access, exporting
//! the types that member depends on at that point.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use dashmap::{DashMap, DashSet};
use ferry_reflect::{
    CallContext, FieldInfo, MethodInfo, PropertyInfo, TypeDef, TypeKind, TypeSig, attributes,
};
use ferry_script::{GetterFn, JsObject, JsRef, Property, Realm, ScriptError, ScriptResult, SetterFn, Value};
use tracing::{debug, warn};

use crate::error::{MarshalError, MarshalResult};
use crate::marshaller::Marshaller;
use crate::overload::{MemberKind, OverloadCandidate};
use crate::registry::unwrap_slot;

/// Internal slot of a type projection: the type it stands for
#[derive(Debug, Clone)]
pub struct TypeSlot(pub TypeSig);

/// Export state of one type in one realm
#[derive(Clone)]
pub enum TypeNode {
    /// Placeholder registered, members being filled
    Exporting(JsRef),
    Exported(JsRef),
    /// Export failed; cleared when new types are registered
    Unavailable(String),
}

#[derive(Clone)]
enum MemberSource {
    Methods(MemberKind),
    Property(PropertyInfo),
    Field(FieldInfo),
}

/// A member to project onto a holder object
struct MemberSpec {
    ty: Arc<TypeDef>,
    name: String,
    script_name: String,
    source: MemberSource,
}

impl MemberSpec {
    fn frame(&self) -> String {
        format!("{}.{}", self.ty.full_name, self.name)
    }
}

/// Lazy projection of the host type graph into realms
#[derive(Default)]
pub struct Projector {
    nodes: DashMap<(u64, TypeSig), TypeNode>,
    namespaces: DashMap<(u64, String), JsRef>,
    known_types: DashMap<String, Arc<TypeDef>>,
    known_namespaces: DashSet<String>,
    /// Base or interface name -> names of the types deriving from it
    derivations: DashMap<String, Vec<String>>,
    /// Target type name -> extension methods registered against it
    extensions: DashMap<String, Vec<(Arc<TypeDef>, MethodInfo)>>,
    extension_keys: DashSet<(String, String)>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------

    /// Add types to the known-types index without exporting anything
    pub fn register_types(&self, types: &[Arc<TypeDef>]) {
        for ty in types {
            if ty.has_attribute(attributes::SCRIPT_HIDDEN) {
                continue;
            }
            self.known_types.insert(ty.full_name.to_string(), ty.clone());
            let mut prefix = String::new();
            for part in ty.namespace.split('.').filter(|p| !p.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(part);
                self.known_namespaces.insert(prefix.clone());
            }
            for parent in ty.base.iter().chain(ty.interfaces.iter()) {
                let mut derived = self.derivations.entry(parent.to_string()).or_default();
                if !derived.iter().any(|d| **d == *ty.full_name) {
                    derived.push(ty.full_name.to_string());
                }
            }
        }
        self.nodes.retain(|_, node| !matches!(node, TypeNode::Unavailable(_)));
        debug!(count = types.len(), "indexed types");
    }

    pub fn is_known_type(&self, full_name: &str) -> bool {
        self.known_types.contains_key(full_name)
    }

    pub fn is_known_namespace(&self, path: &str) -> bool {
        path.is_empty() || self.known_namespaces.contains(path)
    }

    pub fn node(&self, realm: &Realm, sig: &TypeSig) -> Option<TypeNode> {
        self.nodes.get(&(realm.id(), sig.clone())).map(|n| n.clone())
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// Namespace object for `path`; `""` is the root
    pub fn get_namespace(&self, m: &Marshaller, realm: &Realm, path: &str) -> MarshalResult<JsObject> {
        let key = (realm.id(), path.to_string());
        let cached = self.namespaces.get(&key).map(|r| r.clone());
        if let Some(existing) = cached {
            return Ok(existing.object(realm)?);
        }
        if !self.is_known_namespace(path) {
            return Err(MarshalError::unsupported(format!("namespace {}", path)));
        }

        let namespace = realm.create_object();
        let weak = m.weak();
        let prefix = path.to_string();
        namespace.set_resolver(Rc::new(move |realm, _holder, name| {
            let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(prefix.clone()))?;
            m.projector()
                .resolve_member(&m, realm, &prefix, name)
                .map_err(|e| e.into_script_error(qualify(&prefix, name)))
        }));
        self.namespaces
            .insert(key, realm.persist(Value::Object(namespace.clone())));
        debug!(realm = realm.id(), namespace = path, "created namespace");
        Ok(namespace)
    }

    fn resolve_member(&self, m: &Marshaller, realm: &Realm, prefix: &str, name: &str) -> MarshalResult<Option<Value>> {
        let full = qualify(prefix, name);
        if self.known_types.contains_key(&full) {
            let sig = TypeSig::named(&full);
            return self
                .get_or_export_type(m, realm, &sig, false)
                .map(|projection| Some(Value::Object(projection)));
        }
        if self.known_namespaces.contains(&full) {
            return self.get_namespace(m, realm, &full).map(|ns| Some(Value::Object(ns)));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Projection of `sig`, exporting it on first request
    pub fn get_or_export_type(&self, m: &Marshaller, realm: &Realm, sig: &TypeSig, eager: bool) -> MarshalResult<JsObject> {
        let key = (realm.id(), sig.clone());
        match self.nodes.get(&key).map(|n| n.clone()) {
            Some(TypeNode::Exporting(projection) | TypeNode::Exported(projection)) => {
                return Ok(projection.object(realm)?);
            }
            Some(TypeNode::Unavailable(reason)) => return Err(MarshalError::unsupported(reason)),
            None => {}
        }

        let ty = match self.resolve_exportable(m, sig) {
            Ok(ty) => ty,
            Err(err) => {
                warn!(ty = %sig, %err, "type unavailable");
                self.nodes.insert(key, TypeNode::Unavailable(err.to_string()));
                return Err(err);
            }
        };
        let eager = eager || m.config().eager_export;

        let projection = self.create_projection(m, realm, &ty, sig, eager);
        projection.set_internal(Arc::new(TypeSlot(sig.clone())));
        let handle = realm.persist(Value::Object(projection.clone()));
        self.nodes.insert(key.clone(), TypeNode::Exporting(handle.clone()));
        m.stats().types_exported.fetch_add(1, Ordering::Relaxed);
        debug!(realm = realm.id(), ty = %sig, eager, "exporting type");

        self.fill(m, realm, &ty, &projection, eager);
        self.nodes.insert(key, TypeNode::Exported(handle));
        Ok(projection)
    }

    fn resolve_exportable(&self, m: &Marshaller, sig: &TypeSig) -> MarshalResult<Arc<TypeDef>> {
        if sig.is_open() {
            return Err(MarshalError::unsupported(sig.to_string()));
        }
        let ty = m
            .universe()
            .resolve(sig)
            .map_err(|e| MarshalError::unsupported(format!("{} ({})", sig, e)))?;
        if ty.has_attribute(attributes::SCRIPT_HIDDEN) {
            return Err(MarshalError::unsupported(format!("{} is hidden", sig)));
        }
        Ok(ty)
    }

    fn create_projection(&self, m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, sig: &TypeSig, eager: bool) -> JsObject {
        if ty.is_generic_definition() {
            return generic_maker(m, realm, ty, eager);
        }
        match &ty.kind {
            TypeKind::Class | TypeKind::Struct => constructor(m, realm, ty, sig),
            TypeKind::Interface => {
                let name = ty.full_name.clone();
                let marker = realm.create_function(&ty.name, move |_, _, _| {
                    Err(ScriptError::type_error(format!("{} is an interface and cannot be called", name)))
                });
                marker.define_property("prototype", Property::hidden(Value::Object(realm.create_object())));
                marker
            }
            TypeKind::Enum { .. } | TypeKind::StaticClass => realm.create_object(),
        }
    }

    fn fill(&self, m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, projection: &JsObject, eager: bool) {
        if ty.is_generic_definition() {
            return;
        }
        match &ty.kind {
            TypeKind::Enum { members, .. } => {
                for (name, value) in members {
                    projection.define_value(name.clone(), Value::Number(*value as f64));
                }
                projection.freeze();
            }
            TypeKind::Class => {
                self.link_base(m, realm, ty, projection);
                if let Some(prototype) = prototype_of(projection) {
                    self.fill_instance_members(m, realm, ty, &prototype, eager);
                    self.install_extensions(m, realm, &ty.full_name, &prototype, eager);
                    // Base classes are reached through the prototype chain; interfaces are not.
                    for interface in m
                        .universe()
                        .supertypes(ty)
                        .iter()
                        .filter(|t| matches!(t.kind, TypeKind::Interface))
                    {
                        self.install_extensions(m, realm, &interface.full_name, &prototype, eager);
                    }
                }
                self.fill_static_members(m, realm, ty, projection, eager);
            }
            TypeKind::Struct | TypeKind::StaticClass => self.fill_static_members(m, realm, ty, projection, eager),
            TypeKind::Interface => {
                if let Some(prototype) = prototype_of(projection) {
                    self.install_extensions(m, realm, &ty.full_name, &prototype, eager);
                }
            }
        }
    }

    fn link_base(&self, m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, projection: &JsObject) {
        let Some(base) = &ty.base else {
            return;
        };
        match self.get_or_export_type(m, realm, base, false) {
            Ok(base_ctor) => {
                if let (Some(prototype), Some(base_prototype)) = (prototype_of(projection), prototype_of(&base_ctor)) {
                    prototype.set_prototype(Some(base_prototype));
                }
                projection.set_prototype(Some(base_ctor));
            }
            Err(err) => warn!(ty = %ty.full_name, base = %base, %err, "base type unavailable"),
        }
    }

    fn fill_instance_members(&self, m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, holder: &JsObject, eager: bool) {
        let mut seen = HashSet::new();
        for method in ty
            .methods
            .iter()
            .filter(|method| !method.is_static && !method.has_attribute(attributes::SCRIPT_HIDDEN))
        {
            if seen.insert(method.name.as_str()) {
                self.install(m, realm, holder, spec(m, ty, &method.name, MemberSource::Methods(MemberKind::Method)), eager);
            }
        }
        for property in ty.properties.iter().filter(|p| !p.is_static && !is_hidden(&p.attributes)) {
            seen.insert(property.name.as_str());
            self.install(m, realm, holder, spec(m, ty, &property.name, MemberSource::Property(property.clone())), eager);
        }
        for field in ty.fields.iter().filter(|f| !is_hidden(&f.attributes)) {
            if seen.insert(field.name.as_str()) {
                self.install(m, realm, holder, spec(m, ty, &field.name, MemberSource::Field(field.clone())), eager);
            }
        }
    }

    fn fill_static_members(&self, m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, holder: &JsObject, eager: bool) {
        let mut seen = HashSet::new();
        for method in ty.methods.iter().filter(|method| {
            method.is_static && !method.is_extension() && !method.has_attribute(attributes::SCRIPT_HIDDEN)
        }) {
            if seen.insert(method.name.as_str()) {
                self.install(
                    m,
                    realm,
                    holder,
                    spec(m, ty, &method.name, MemberSource::Methods(MemberKind::StaticMethod)),
                    eager,
                );
            }
        }
        for property in ty.properties.iter().filter(|p| p.is_static && !is_hidden(&p.attributes)) {
            self.install(m, realm, holder, spec(m, ty, &property.name, MemberSource::Property(property.clone())), eager);
        }
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    fn install(&self, m: &Marshaller, realm: &Realm, holder: &JsObject, spec: MemberSpec, eager: bool) {
        if eager {
            self.materialize(m, realm, holder, &spec, true);
        } else {
            defer(m, holder, spec);
        }
    }

    /// Define the real member on `holder`, or an accessor that throws if
    /// the member cannot be projected
    fn materialize(&self, m: &Marshaller, realm: &Realm, holder: &JsObject, spec: &MemberSpec, eager: bool) {
        let result = match &spec.source {
            MemberSource::Methods(kind) => self.materialize_methods(m, realm, holder, spec, *kind, eager),
            MemberSource::Property(property) => {
                self.materialize_accessor(m, realm, holder, spec, &property.ty, !property.readonly, Some(property), eager)
            }
            MemberSource::Field(field) => self.materialize_accessor(m, realm, holder, spec, &field.ty, true, None, eager),
        };
        if let Err(err) = result {
            warn!(ty = %spec.ty.full_name, member = %spec.name, %err, "member unavailable");
            let message = MarshalError::member_failure(spec.ty.full_name.to_string(), spec.name.clone(), err).to_string();
            let getter: GetterFn = Rc::new(move |_, _| Err(ScriptError::type_error(message.clone())));
            holder.define_property(
                spec.script_name.clone(),
                Property::Accessor {
                    get: Some(getter),
                    set: None,
                    enumerable: false,
                },
            );
        }
    }

    fn export_dependencies(&self, m: &Marshaller, realm: &Realm, sig: &TypeSig, eager: bool) -> MarshalResult<()> {
        m.get_converter(sig)?;
        for dependency in sig.referenced_types() {
            if let Err(err) = self.get_or_export_type(m, realm, &dependency, eager) {
                debug!(dependency = %dependency, %err, "dependency not exported");
            }
        }
        Ok(())
    }

    fn materialize_methods(
        &self,
        m: &Marshaller,
        realm: &Realm,
        holder: &JsObject,
        spec: &MemberSpec,
        kind: MemberKind,
        eager: bool,
    ) -> MarshalResult<()> {
        let descriptor = m.descriptor(&spec.ty, &spec.name, kind)?;
        for candidate in descriptor.candidates() {
            for param in candidate.params() {
                self.export_dependencies(m, realm, &param.ty, eager)?;
            }
            self.export_dependencies(m, realm, &candidate.returns(), eager)?;
        }

        let weak = m.weak();
        let ty = spec.ty.clone();
        let name = spec.name.clone();
        let function = realm.create_function(&spec.script_name, move |realm, this, args| {
            let frame = format!("{}.{}", ty.full_name, name);
            let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(frame.clone()))?;
            let descriptor = match kind {
                MemberKind::Extension => m.descriptor(&ty, &name, kind).map_err(|e| e.into_script_error(frame.clone()))?,
                _ => descriptor.clone(),
            };
            match kind {
                MemberKind::Method | MemberKind::Extension => {
                    let receiver = receiver_host(this, &frame)?;
                    descriptor.invoke_script(&m, realm, Some(&receiver), args)
                }
                MemberKind::StaticMethod | MemberKind::Constructor => descriptor.invoke_script(&m, realm, None, args),
            }
        });
        holder.define_property(spec.script_name.clone(), Property::hidden(Value::Object(function)));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize_accessor(
        &self,
        m: &Marshaller,
        realm: &Realm,
        holder: &JsObject,
        spec: &MemberSpec,
        ty: &TypeSig,
        writable: bool,
        property: Option<&PropertyInfo>,
        eager: bool,
    ) -> MarshalResult<()> {
        self.export_dependencies(m, realm, ty, eager)?;
        let is_static = property.is_some_and(|p| p.is_static);

        let weak = m.weak();
        let (declaring, name, sig, frame) = (spec.ty.clone(), spec.name.clone(), ty.clone(), spec.frame());
        let static_getter = property.and_then(|p| p.getter.clone());
        let getter: GetterFn = Rc::new(move |realm, receiver| {
            let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(frame.clone()))?;
            let value = if is_static {
                let getter = static_getter
                    .as_ref()
                    .ok_or_else(|| ScriptError::type_error(format!("{} has no getter", frame)))?;
                getter(&CallContext { this: None, declaring: &declaring }, &[])
            } else {
                m.universe().get_property(&receiver_host(receiver, &frame)?, &name)
            };
            value
                .map_err(MarshalError::from)
                .and_then(|value| m.to_script(realm, &sig, &value))
                .map_err(|e| e.into_script_error(frame.clone()))
        });

        let setter: Option<SetterFn> = writable.then(|| {
            let weak = m.weak();
            let (declaring, name, sig, frame) = (spec.ty.clone(), spec.name.clone(), ty.clone(), spec.frame());
            let static_setter = property.and_then(|p| p.setter.clone());
            let setter: SetterFn = Rc::new(move |realm, receiver, value| {
                let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(frame.clone()))?;
                let value = m.to_host(realm, &sig, &value).map_err(|e| e.into_script_error(frame.clone()))?;
                let assigned = if is_static {
                    let setter = static_setter
                        .as_ref()
                        .ok_or_else(|| ScriptError::type_error(format!("{} is read-only", frame)))?;
                    setter(&CallContext { this: None, declaring: &declaring }, &[value]).map(|_| ())
                } else {
                    m.universe().set_property(&receiver_host(receiver, &frame)?, &name, value)
                };
                assigned.map_err(|e| MarshalError::from(e).into_script_error(frame.clone()))
            });
            setter
        });

        holder.define_property(
            spec.script_name.clone(),
            Property::Accessor {
                get: Some(getter),
                set: setter,
                enumerable: true,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extension methods
    // ------------------------------------------------------------------

    /// Register extension methods and retrofit them onto every exported
    /// target and derived type. Known methods are ignored.
    pub fn register_extension_methods(&self, m: &Marshaller, realm: &Realm, methods: &[(Arc<TypeDef>, MethodInfo)]) {
        let mut changed: Vec<(String, String)> = Vec::new();
        for (declaring, method) in methods {
            let Some(target) = &method.extension_of else {
                continue;
            };
            let target = target.to_string();
            let key = (target.clone(), format!("{}::{}", declaring.full_name, method.signature()));
            if !self.extension_keys.insert(key) {
                continue;
            }
            self.extensions
                .entry(target.clone())
                .or_default()
                .push((declaring.clone(), method.clone()));
            let group = (target, method.name.clone());
            if !changed.contains(&group) {
                changed.push(group);
            }
        }

        for (target, name) in changed {
            m.invalidate_descriptor(&target, &name, MemberKind::Extension);
            debug!(target = %target, method = %name, "registered extension method");
            self.retrofit(m, realm, &target, &name);
        }
    }

    /// Candidates for extension methods named `name` on `target`
    pub fn extension_candidates(&self, target: &str, name: &str) -> Vec<OverloadCandidate> {
        self.extensions
            .get(target)
            .map(|methods| {
                methods
                    .iter()
                    .filter(|(_, method)| method.name == name)
                    .map(|(declaring, method)| OverloadCandidate::method(declaring.clone(), method.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn install_extensions(&self, m: &Marshaller, realm: &Realm, target: &str, prototype: &JsObject, eager: bool) {
        let names: Vec<String> = self
            .extensions
            .get(target)
            .map(|methods| methods.iter().map(|(_, method)| method.name.clone()).collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        for name in names {
            if seen.insert(name.clone()) {
                self.install_extension(m, realm, target, &name, prototype, eager);
            }
        }
    }

    fn install_extension(&self, m: &Marshaller, realm: &Realm, target: &str, name: &str, holder: &JsObject, eager: bool) {
        let script_name = m.config().script_name(name);
        if holder.has_own(&script_name) {
            return;
        }
        let Ok(target_ty) = TypeSig::parse(target).and_then(|sig| m.universe().resolve(&sig)) else {
            return;
        };
        let spec = MemberSpec {
            ty: target_ty,
            name: name.to_string(),
            script_name,
            source: MemberSource::Methods(MemberKind::Extension),
        };
        self.install(m, realm, holder, spec, eager);
    }

    /// Install `name` on the exported target and everything deriving from it
    fn retrofit(&self, m: &Marshaller, realm: &Realm, target: &str, name: &str) {
        let mut queue = vec![target.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(prototype) = self.exported_prototype(realm, &current) {
                self.install_extension(m, realm, target, name, &prototype, m.config().eager_export);
            }
            if let Some(derived) = self.derivations.get(&current) {
                queue.extend(derived.iter().cloned());
            }
        }
    }

    fn exported_prototype(&self, realm: &Realm, full_name: &str) -> Option<JsObject> {
        let sig = TypeSig::parse(full_name).ok()?;
        match self.node(realm, &sig)? {
            TypeNode::Exporting(projection) | TypeNode::Exported(projection) => {
                prototype_of(&projection.object(realm).ok()?)
            }
            TypeNode::Unavailable(_) => None,
        }
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn is_hidden(attrs: &[String]) -> bool {
    attrs.iter().any(|a| a == attributes::SCRIPT_HIDDEN)
}

fn spec(m: &Marshaller, ty: &Arc<TypeDef>, name: &str, source: MemberSource) -> MemberSpec {
    MemberSpec {
        ty: ty.clone(),
        name: name.to_string(),
        script_name: m.config().script_name(name),
        source,
    }
}

/// The `prototype` of a constructor or marker projection
pub fn prototype_of(projection: &JsObject) -> Option<JsObject> {
    match projection.get_own_property("prototype")? {
        Property::Data { value, .. } => value.as_object().cloned(),
        Property::Accessor { .. } => None,
    }
}

fn receiver_host(this: &Value, frame: &str) -> ScriptResult<ferry_reflect::HostValue> {
    unwrap_slot(this)
        .ok_or_else(|| ScriptError::type_error(format!("Illegal invocation of {}: receiver is not a host object", frame)))
}

/// Accessor placeholder that materializes the member on first access
fn defer(m: &Marshaller, holder: &JsObject, spec: MemberSpec) {
    let script_name = spec.script_name.clone();
    let spec = Rc::new(spec);

    let (weak, weak_holder, pending) = (m.weak(), holder.downgrade(), spec.clone());
    let get: GetterFn = Rc::new(move |realm, receiver| {
        let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(pending.frame()))?;
        let holder = weak_holder
            .upgrade()
            .ok_or_else(|| ScriptError::scope_closed(pending.frame()))?;
        m.projector().materialize(&m, realm, &holder, &pending, false);
        match holder.get_own_property(&pending.script_name) {
            Some(Property::Data { value, .. }) => Ok(value),
            Some(Property::Accessor { get: Some(get), .. }) => get(realm, receiver),
            _ => Ok(Value::Undefined),
        }
    });

    let (weak, weak_holder, pending) = (m.weak(), holder.downgrade(), spec);
    let set: SetterFn = Rc::new(move |realm, receiver, value| {
        let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(pending.frame()))?;
        let holder = weak_holder
            .upgrade()
            .ok_or_else(|| ScriptError::scope_closed(pending.frame()))?;
        m.projector().materialize(&m, realm, &holder, &pending, false);
        match holder.get_own_property(&pending.script_name) {
            Some(Property::Accessor { set: Some(set), .. }) => set(realm, receiver, value),
            Some(Property::Accessor { set: None, .. }) => Err(ScriptError::type_error(format!(
                "Cannot set property '{}' which has only a getter",
                pending.script_name
            ))),
            _ => {
                if let Some(target) = receiver.as_object() {
                    target.define_value(pending.script_name.clone(), value);
                }
                Ok(())
            }
        }
    });

    holder.define_property(
        script_name,
        Property::Accessor {
            get: Some(get),
            set: Some(set),
            enumerable: false,
        },
    );
}

/// Constructor projection for a class or struct
fn constructor(m: &Marshaller, realm: &Realm, ty: &Arc<TypeDef>, sig: &TypeSig) -> JsObject {
    let name = ty.full_name.clone();
    let call = Rc::new(move |_: &Realm, _: &Value, _: &[Value]| -> ScriptResult<Value> {
        Err(ScriptError::type_error(format!(
            "Class constructor {} cannot be invoked without 'new'",
            name
        )))
    });

    let weak = m.weak();
    let (declaring, sig) = (ty.clone(), sig.clone());
    let construct = Rc::new(move |realm: &Realm, _: &Value, args: &[Value]| -> ScriptResult<Value> {
        let frame = format!("new {}", declaring.full_name);
        let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(frame.clone()))?;
        if declaring.constructors.is_empty() {
            if let TypeKind::Struct = declaring.kind {
                let value = m.universe().default_value(&sig);
                return m.to_script(realm, &sig, &value).map_err(|e| e.into_script_error(frame));
            }
            return Err(ScriptError::type_error(format!("{} has no public constructor", declaring.full_name)));
        }
        m.descriptor(&declaring, ".ctor", MemberKind::Constructor)
            .map_err(|e| e.into_script_error(frame.clone()))?
            .invoke_script(&m, realm, None, args)
    });
    realm.create_constructor(&ty.name, call, construct)
}

/// Maker callable for a generic definition: `Box("int")` or `Box(Widget)`
fn generic_maker(m: &Marshaller, realm: &Realm, definition: &Arc<TypeDef>, eager: bool) -> JsObject {
    let weak = m.weak();
    let (definition, arity) = (definition.full_name.clone(), definition.generic_params.len());
    let name = definition.to_string();
    realm.create_function(&name, move |realm, _, args| {
        if args.len() != arity {
            return Err(ScriptError::type_error(format!(
                "{} expects {} type argument(s), got {}",
                definition,
                arity,
                args.len()
            )));
        }
        let type_args = args.iter().map(type_argument).collect::<ScriptResult<Vec<_>>>()?;
        let sig = TypeSig::generic(definition.as_ref(), type_args);
        let m = Marshaller::upgrade(&weak).map_err(|e| e.into_script_error(sig.to_string()))?;
        m.projector()
            .get_or_export_type(&m, realm, &sig, eager)
            .map(Value::Object)
            .map_err(|e| e.into_script_error(sig.to_string()))
    })
}

fn type_argument(value: &Value) -> ScriptResult<TypeSig> {
    match value {
        Value::String(name) => TypeSig::parse(name).map_err(|e| ScriptError::type_error(e.to_string())),
        Value::Object(object) => object
            .internal_as::<TypeSlot>()
            .map(|slot| slot.0.clone())
            .ok_or_else(|| ScriptError::type_error("type argument is not a host type")),
        other => Err(ScriptError::type_error(format!(
            "type argument must be a type or a type name, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "Contoso"), "Contoso");
        assert_eq!(qualify("Contoso", "Geometry"), "Contoso.Geometry");
    }

    #[test]
    fn test_register_indexes_namespaces_and_derivations() {
        use ferry_reflect::TypeBuilder;
        let projector = Projector::new();
        let shape = Arc::new(TypeBuilder::class("Contoso.Geometry.Shape").build());
        let circle = Arc::new(
            TypeBuilder::class("Contoso.Geometry.Circle")
                .base(TypeSig::named("Contoso.Geometry.Shape"))
                .build(),
        );
        projector.register_types(&[shape, circle.clone(), circle]);

        assert!(projector.is_known_namespace("Contoso"));
        assert!(projector.is_known_namespace("Contoso.Geometry"));
        assert!(!projector.is_known_namespace("Fabrikam"));
        assert!(projector.is_known_type("Contoso.Geometry.Circle"));
        let derived = projector.derivations.get("Contoso.Geometry.Shape").unwrap();
        assert_eq!(derived.as_slice(), ["Contoso.Geometry.Circle".to_string()]);
    }
}
