//! Reflection provider
//!
//! `TypeUniverse` is the registry of every known host type. It resolves
//! signatures to metadata (instantiating generic definitions on demand),
//! answers assignability questions, and performs late-bound member access for
//! host callers.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{HostError, HostResult};
use crate::sig::TypeSig;
use crate::types::{CallContext, ConstructorInfo, MethodInfo, PropertyInfo, TypeDef, TypeKind};
use crate::value::{EnumValue, HostInstance, HostValue, StructValue};

/// Maximum nesting when building default values of nested structs
const MAX_DEFAULT_DEPTH: usize = 16;

#[derive(Default)]
pub struct TypeUniverse {
    types: DashMap<Arc<str>, Arc<TypeDef>>,
    instances: DashMap<TypeSig, Arc<TypeDef>>,
}

impl TypeUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type
    pub fn register(&self, ty: TypeDef) -> Arc<TypeDef> {
        let ty = Arc::new(ty);
        debug!(ty = %ty.full_name, "registered host type");
        self.types.insert(ty.full_name.clone(), ty.clone());
        // Instantiations of a replaced definition are stale.
        if ty.is_generic_definition() {
            self.instances
                .retain(|sig, _| sig.type_name() != Some(ty.full_name.as_ref()));
        }
        ty
    }

    pub fn get(&self, full_name: &str) -> Option<Arc<TypeDef>> {
        self.types.get(full_name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.types.contains_key(full_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolve a named or generic signature to its metadata
    pub fn resolve(&self, sig: &TypeSig) -> HostResult<Arc<TypeDef>> {
        match sig {
            TypeSig::Named(name) => self
                .get(name)
                .ok_or_else(|| HostError::UnknownType(name.to_string())),
            TypeSig::Generic { definition, args } => {
                if let Some(inst) = self.instances.get(sig) {
                    return Ok(inst.value().clone());
                }
                let def = self
                    .get(definition)
                    .ok_or_else(|| HostError::UnknownType(definition.to_string()))?;
                if def.generic_params.len() != args.len() {
                    return Err(HostError::type_mismatch(
                        format!("{} type argument(s) for {}", def.generic_params.len(), definition),
                        args.len().to_string(),
                    ));
                }
                if args.iter().any(TypeSig::is_open) {
                    return Ok(def);
                }
                let inst = self
                    .instances
                    .entry(sig.clone())
                    .or_insert_with(|| Arc::new(def.instantiate(args)))
                    .clone();
                Ok(inst)
            }
            other => Err(HostError::UnknownType(other.to_string())),
        }
    }

    pub fn types(&self) -> Vec<Arc<TypeDef>> {
        self.types.iter().map(|e| e.value().clone()).collect()
    }

    /// Types declared directly in `namespace`
    pub fn types_in(&self, namespace: &str) -> Vec<Arc<TypeDef>> {
        self.types
            .iter()
            .filter(|e| e.value().namespace == namespace)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every namespace and namespace prefix that contains a type
    pub fn namespaces(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for entry in self.types.iter() {
            let namespace = &entry.value().namespace;
            let mut end = 0;
            for part in namespace.split('.').filter(|p| !p.is_empty()) {
                end += part.len();
                out.insert(namespace[..end].to_string());
                end += 1;
            }
        }
        out
    }

    /// `ty` followed by its base classes
    pub fn base_chain(&self, ty: &Arc<TypeDef>) -> Vec<Arc<TypeDef>> {
        let mut chain = vec![ty.clone()];
        let mut current = ty.clone();
        while let Some(base) = current.base.as_ref().and_then(|b| self.resolve(b).ok()) {
            if chain.iter().any(|t| t.full_name == base.full_name) {
                break;
            }
            chain.push(base.clone());
            current = base;
        }
        chain
    }

    /// Base classes and (transitively) implemented interfaces of `ty`
    pub fn supertypes(&self, ty: &Arc<TypeDef>) -> Vec<Arc<TypeDef>> {
        let mut out: Vec<Arc<TypeDef>> = Vec::new();
        let mut pending: Vec<TypeSig> = Vec::new();
        pending.extend(ty.base.iter().cloned());
        pending.extend(ty.interfaces.iter().cloned());
        while let Some(sig) = pending.pop() {
            let Ok(super_ty) = self.resolve(&sig) else { continue };
            if out.iter().any(|t| t.full_name == super_ty.full_name) {
                continue;
            }
            pending.extend(super_ty.base.iter().cloned());
            pending.extend(super_ty.interfaces.iter().cloned());
            out.push(super_ty);
        }
        out
    }

    /// Whether an instance of `from` can be used where `to` is expected
    pub fn is_assignable(&self, from: &Arc<TypeDef>, to: &TypeSig) -> bool {
        match to {
            TypeSig::Any => true,
            TypeSig::Nullable(inner) => self.is_assignable(from, inner),
            _ => {
                let target = to.to_string();
                *from.full_name == *target
                    || self
                        .supertypes(from)
                        .iter()
                        .any(|t| *t.full_name == *target)
            }
        }
    }

    /// Methods named `name` visible on `ty`, most derived first; overridden
    /// signatures are reported once
    pub fn find_methods(&self, ty: &Arc<TypeDef>, name: &str) -> Vec<(Arc<TypeDef>, MethodInfo)> {
        let mut out: Vec<(Arc<TypeDef>, MethodInfo)> = Vec::new();
        let mut owners = self.base_chain(ty);
        if ty.is_interface() {
            owners.extend(self.supertypes(ty));
        }
        for owner in owners {
            for method in owner.methods_named(name) {
                let signature = method.signature();
                if !out.iter().any(|(_, m)| m.signature() == signature) {
                    out.push((owner.clone(), method.clone()));
                }
            }
        }
        out
    }

    pub fn find_property(&self, ty: &Arc<TypeDef>, name: &str) -> Option<(Arc<TypeDef>, PropertyInfo)> {
        let mut owners = self.base_chain(ty);
        if ty.is_interface() {
            owners.extend(self.supertypes(ty));
        }
        owners
            .into_iter()
            .find_map(|owner| owner.property(name).cloned().map(|p| (owner, p)))
    }

    /// Extension methods declared on static classes
    pub fn extension_methods(&self) -> Vec<(Arc<TypeDef>, MethodInfo)> {
        let mut out = Vec::new();
        for entry in self.types.iter() {
            for method in entry.value().methods.iter().filter(|m| m.is_extension()) {
                out.push((entry.value().clone(), method.clone()));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Late-bound access
    // ------------------------------------------------------------------

    fn type_of(&self, value: &HostValue) -> HostResult<Arc<TypeDef>> {
        match value {
            HostValue::Object(object) => Ok(object.type_def()),
            HostValue::Struct(s) => self.resolve(&TypeSig::Named(s.ty.clone())),
            other => Err(HostError::type_mismatch("object", other.kind_name())),
        }
    }

    /// Run a method with a known declaring type
    pub fn invoke_method(
        &self,
        declaring: &Arc<TypeDef>,
        method: &MethodInfo,
        this: Option<&HostValue>,
        args: &[HostValue],
    ) -> HostResult<HostValue> {
        if let Some(body) = &method.body {
            let ctx = CallContext { this, declaring };
            return body(&ctx, args);
        }
        match this {
            Some(HostValue::Object(object)) => object.invoke(&method.signature(), args),
            _ => Err(HostError::not_supported(format!(
                "{}.{} has no body",
                declaring.full_name,
                method.signature()
            ))),
        }
    }

    /// Call an instance method by name, choosing the first overload whose
    /// parameters accept the arguments
    pub fn call_method(&self, this: &HostValue, name: &str, args: &[HostValue]) -> HostResult<HostValue> {
        let ty = self.type_of(this)?;
        let candidates = self.find_methods(&ty, name);
        if candidates.is_empty() {
            return Err(HostError::missing_member(ty.full_name.to_string(), name));
        }
        for (owner, method) in &candidates {
            if let Some(full_args) = self.bind_args(&method.params, args) {
                return self.invoke_method(owner, method, Some(this), &full_args);
            }
        }
        Err(HostError::type_mismatch(
            candidates
                .iter()
                .map(|(_, m)| m.signature())
                .collect::<Vec<_>>()
                .join(" | "),
            args.iter().map(HostValue::kind_name).collect::<Vec<_>>().join(","),
        ))
    }

    /// Call a static method by name
    pub fn call_static(&self, ty: &Arc<TypeDef>, name: &str, args: &[HostValue]) -> HostResult<HostValue> {
        for method in ty.methods_named(name).filter(|m| m.is_static) {
            if let Some(full_args) = self.bind_args(&method.params, args) {
                return self.invoke_method(ty, method, None, &full_args);
            }
        }
        Err(HostError::missing_member(ty.full_name.to_string(), name))
    }

    fn bind_args(&self, params: &[crate::types::ParamInfo], args: &[HostValue]) -> Option<Vec<HostValue>> {
        if args.len() > params.len() {
            return None;
        }
        let mut bound = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            match args.get(i) {
                Some(arg) if self.accepts(&param.ty, arg) => bound.push(arg.clone()),
                Some(_) => return None,
                None => bound.push(param.default.clone()?),
            }
        }
        Some(bound)
    }

    /// Loose runtime check that `value` fits `sig`
    pub fn accepts(&self, sig: &TypeSig, value: &HostValue) -> bool {
        match (sig, value) {
            (TypeSig::Any, _) => true,
            (TypeSig::Nullable(_), HostValue::Null) => true,
            (TypeSig::Nullable(inner), v) => self.accepts(inner, v),
            (TypeSig::Primitive(p), v) => HostValue::default_for(sig).kind_name() == v.kind_name()
                || (*p == crate::sig::PrimitiveType::String && matches!(v, HostValue::String(_) | HostValue::Null)),
            (TypeSig::Array(_), HostValue::Array(_)) => true,
            (TypeSig::Collection(..), HostValue::List(_) | HostValue::Set(_) | HostValue::Map(_) | HostValue::Iterable(_) | HostValue::Array(_)) => true,
            (TypeSig::Future(_), HostValue::Future(_)) => true,
            (_, HostValue::Enum(e)) => sig.type_name() == Some(e.ty.as_ref()),
            (_, HostValue::Struct(s)) => sig.type_name() == Some(s.ty.as_ref()),
            (_, HostValue::Object(o)) => self.is_assignable(&o.type_def(), sig),
            (TypeSig::Named(_) | TypeSig::Generic { .. } | TypeSig::Collection(..), HostValue::Null) => true,
            _ => false,
        }
    }

    pub fn get_property(&self, this: &HostValue, name: &str) -> HostResult<HostValue> {
        if let HostValue::Struct(s) = this {
            return s
                .get(name)
                .cloned()
                .ok_or_else(|| HostError::missing_member(s.ty.to_string(), name));
        }
        let ty = self.type_of(this)?;
        let object = this
            .as_object()
            .ok_or_else(|| HostError::type_mismatch("object", this.kind_name()))?;
        match self.find_property(&ty, name) {
            Some((owner, PropertyInfo { getter: Some(getter), .. })) => {
                getter(&CallContext { this: Some(this), declaring: &owner }, &[])
            }
            Some(_) => object.get_property(name),
            None => object.get_field(name),
        }
    }

    pub fn set_property(&self, this: &HostValue, name: &str, value: HostValue) -> HostResult<()> {
        let ty = self.type_of(this)?;
        let object = this
            .as_object()
            .ok_or_else(|| HostError::not_supported(format!("assigning to a copy of {}", ty.full_name)))?;
        match self.find_property(&ty, name) {
            Some((owner, PropertyInfo { setter: Some(setter), .. })) => {
                setter(&CallContext { this: Some(this), declaring: &owner }, &[value]).map(|_| ())
            }
            Some((_, PropertyInfo { readonly: true, .. })) => Err(HostError::not_supported(format!(
                "{}.{} is read-only",
                ty.full_name, name
            ))),
            Some(_) => object.set_property(name, value),
            None => object.set_field(name, value),
        }
    }

    /// Run a constructor; unbound constructors assign arguments to the
    /// fields named like their parameters
    pub fn construct(&self, ty: &Arc<TypeDef>, ctor: &ConstructorInfo, args: &[HostValue]) -> HostResult<HostValue> {
        let args = self
            .bind_args(&ctor.params, args)
            .ok_or_else(|| HostError::type_mismatch(ctor.signature(), format!("{} argument(s)", args.len())))?;
        if let Some(body) = &ctor.body {
            return body(&CallContext { this: None, declaring: ty }, &args);
        }
        let assigned = ctor.params.iter().map(|p| p.name.clone()).zip(args);
        match &ty.kind {
            TypeKind::Struct => {
                let HostValue::Struct(mut value) = self.default_value(&ty.sig()) else {
                    return Err(HostError::UnknownType(ty.full_name.to_string()));
                };
                for (name, arg) in assigned {
                    let field = ty
                        .fields
                        .iter()
                        .find(|f| f.name.eq_ignore_ascii_case(&name))
                        .ok_or_else(|| HostError::missing_member(ty.full_name.to_string(), name.clone()))?;
                    value.fields.insert(field.name.clone(), arg);
                }
                Ok(HostValue::Struct(value))
            }
            TypeKind::Class => {
                let instance = self.new_instance(ty);
                for (name, arg) in assigned {
                    let field = ty
                        .fields
                        .iter()
                        .find(|f| f.name.eq_ignore_ascii_case(&name))
                        .map(|f| f.name.clone())
                        .unwrap_or(name);
                    crate::HostObject::set_field(&instance, &field, arg)?;
                }
                Ok(HostValue::Object(instance.into_ref()))
            }
            _ => Err(HostError::not_supported(format!(
                "{} cannot be constructed",
                ty.full_name
            ))),
        }
    }

    /// Fresh instance of a class with the fields of its whole base chain
    pub fn new_instance(&self, ty: &Arc<TypeDef>) -> HostInstance {
        let mut fields = Vec::new();
        for owner in self.base_chain(ty).iter().rev() {
            for field in &owner.fields {
                fields.push((field.name.clone(), self.default_value(&field.ty)));
            }
        }
        HostInstance::with_fields(ty.clone(), fields)
    }

    /// Default value of a type: zeroed primitives, zeroed structs, the
    /// first member of an enum, `Null` otherwise
    pub fn default_value(&self, sig: &TypeSig) -> HostValue {
        self.default_value_at(sig, 0)
    }

    fn default_value_at(&self, sig: &TypeSig, depth: usize) -> HostValue {
        if depth > MAX_DEFAULT_DEPTH {
            return HostValue::Null;
        }
        let (TypeSig::Named(_) | TypeSig::Generic { .. }) = sig else {
            return HostValue::default_for(sig);
        };
        let Ok(ty) = self.resolve(sig) else {
            return HostValue::Null;
        };
        match &ty.kind {
            TypeKind::Struct => {
                let mut value = StructValue::new(ty.full_name.as_ref());
                for field in &ty.fields {
                    value
                        .fields
                        .insert(field.name.clone(), self.default_value_at(&field.ty, depth + 1));
                }
                HostValue::Struct(value)
            }
            TypeKind::Enum { members, .. } => HostValue::Enum(EnumValue {
                ty: ty.full_name.clone(),
                value: members.values().next().copied().unwrap_or(0),
            }),
            _ => HostValue::Null,
        }
    }
}

impl std::fmt::Debug for TypeUniverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeUniverse")
            .field("types", &self.types.len())
            .field("instances", &self.instances.len())
            .finish()
    }
}
