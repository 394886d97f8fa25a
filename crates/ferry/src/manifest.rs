//! Module images and the JSON manifest reader
//!
//! A host module is described by a `<name>.module.json` manifest:
//!
//! ```json
//! {
//!   "name": "Contoso.Geometry",
//!   "version": "1.2.0",
//!   "references": ["Contoso.Core"],
//!   "types": [
//!     {
//!       "name": "Contoso.Geometry.Point",
//!       "kind": "struct",
//!       "members": [
//!         { "kind": "field", "name": "X", "type": "double" },
//!         { "kind": "method", "name": "Scale", "returns": "Contoso.Geometry.Point",
//!           "params": [{ "name": "factor", "type": "double", "default": 1 }] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Member bodies come from a [`NativeBindings`] table. Lookup keys are
//! `Type::Member(sig)` first, then `Type::Member`; constructors use `.ctor`
//! and property accessors `get_Name` / `set_Name`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ferry_reflect::{
    CallContext, ConstructorInfo, EnumValue, HostResult, HostValue, Invoker, MethodInfo, ParamInfo, PrimitiveType,
    PropertyInfo, TypeBuilder, TypeDef, TypeSig,
};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::convert::integer_from_f64;
use crate::error::{MarshalError, MarshalResult};

/// A parsed host module, ready to be registered
#[derive(Debug, Clone)]
pub struct ModuleImage {
    pub name: String,
    pub version: Option<String>,
    /// Simple names of the modules this one depends on
    pub references: Vec<String>,
    pub types: Vec<TypeDef>,
}

impl ModuleImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            references: Vec::new(),
            types: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn reference(mut self, module: impl Into<String>) -> Self {
        self.references.push(module.into());
        self
    }

    pub fn with_type(mut self, mut ty: TypeDef) -> Self {
        ty.module.get_or_insert_with(|| self.name.clone());
        self.types.push(ty);
        self
    }
}

/// Source of module images
pub trait ModuleReader: Send + Sync {
    fn read(&self, path: &Path) -> MarshalResult<ModuleImage>;
}

/// Native member bodies, keyed `Type::Member`
#[derive(Default, Clone)]
pub struct NativeBindings {
    bodies: HashMap<String, Invoker>,
}

impl NativeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<F>(mut self, key: impl Into<String>, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.bodies.insert(key.into(), Arc::new(body));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, body: Invoker) {
        self.bodies.insert(key.into(), body);
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Body for `member` of `ty`, preferring the exact signature
    fn lookup(&self, ty: &str, member: &str, signature: Option<&str>) -> Option<Invoker> {
        signature
            .and_then(|sig| self.bodies.get(&format!("{}::{}", ty, sig)))
            .or_else(|| self.bodies.get(&format!("{}::{}", ty, member)))
            .cloned()
    }
}

// ----------------------------------------------------------------------
// Manifest schema
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    types: Vec<TypeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypeEntryKind {
    Class,
    Struct,
    Interface,
    StaticClass,
    Enum,
}

#[derive(Debug, Deserialize)]
struct TypeEntry {
    name: String,
    kind: TypeEntryKind,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    interfaces: Vec<String>,
    #[serde(default)]
    generic_params: Vec<String>,
    #[serde(default)]
    attributes: Vec<String>,
    /// Enum underlying type
    #[serde(default)]
    underlying: Option<String>,
    /// Enum members in declaration order
    #[serde(default)]
    variants: Vec<(String, i64)>,
    #[serde(default)]
    members: Vec<MemberEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MemberEntry {
    Field {
        name: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        attributes: Vec<String>,
    },
    Property {
        name: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default, rename = "static")]
        is_static: bool,
        #[serde(default)]
        readonly: bool,
        #[serde(default)]
        attributes: Vec<String>,
    },
    Method {
        name: String,
        #[serde(default)]
        params: Vec<ParamEntry>,
        #[serde(default = "void_name")]
        returns: String,
        #[serde(default, rename = "static")]
        is_static: bool,
        /// Extended type of an extension method
        #[serde(default)]
        extends: Option<String>,
        #[serde(default)]
        attributes: Vec<String>,
    },
    Constructor {
        #[serde(default)]
        params: Vec<ParamEntry>,
    },
}

#[derive(Debug, Deserialize)]
struct ParamEntry {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

fn void_name() -> String {
    "void".to_string()
}

/// Reads JSON module manifests, binding bodies from a [`NativeBindings`]
/// table
#[derive(Default, Clone)]
pub struct ManifestReader {
    bindings: NativeBindings,
}

impl ManifestReader {
    pub fn new(bindings: NativeBindings) -> Self {
        Self { bindings }
    }

    /// Parse manifest text; `origin` names the source in errors
    pub fn parse_str(&self, text: &str, origin: &str) -> MarshalResult<ModuleImage> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| MarshalError::invalid_module(origin, e.to_string()))?;

        let mut image = ModuleImage {
            name: manifest.name,
            version: manifest.version,
            references: manifest.references,
            types: Vec::with_capacity(manifest.types.len()),
        };
        for entry in manifest.types {
            let name = entry.name.clone();
            let ty = self
                .build_type(entry, &image.name)
                .map_err(|e| MarshalError::invalid_module(origin, format!("{}: {}", name, e)))?;
            trace!(module = %image.name, ty = %ty.full_name, "read type");
            image.types.push(ty);
        }
        debug!(module = %image.name, types = image.types.len(), origin, "parsed module manifest");
        Ok(image)
    }

    fn build_type(&self, entry: TypeEntry, module: &str) -> MarshalResult<TypeDef> {
        let params: Vec<&str> = entry.generic_params.iter().map(String::as_str).collect();
        let sig = |text: &str| TypeSig::parse_with_params(text, &params).map_err(MarshalError::from);

        let mut builder = match entry.kind {
            TypeEntryKind::Class => TypeBuilder::class(&entry.name),
            TypeEntryKind::Struct => TypeBuilder::struct_type(&entry.name),
            TypeEntryKind::Interface => TypeBuilder::interface(&entry.name),
            TypeEntryKind::StaticClass => TypeBuilder::static_class(&entry.name),
            TypeEntryKind::Enum => {
                let underlying = match entry.underlying.as_deref() {
                    None => PrimitiveType::I32,
                    Some(text) => match TypeSig::parse(text)? {
                        TypeSig::Primitive(p) if p.is_integer() => p,
                        other => return Err(MarshalError::type_mismatch("integer enum base", other.to_string())),
                    },
                };
                let mut builder = TypeBuilder::enumeration(&entry.name, underlying);
                for (name, value) in &entry.variants {
                    builder = builder.variant(name, *value);
                }
                builder
            }
        };
        builder = builder.module(module);
        if !params.is_empty() {
            builder = builder.generic_params(&params);
        }
        for attribute in &entry.attributes {
            builder = builder.attribute(attribute);
        }
        if let Some(base) = &entry.base {
            builder = builder.base(sig(base)?);
        }
        for interface in &entry.interfaces {
            builder = builder.implements(sig(interface)?);
        }

        let ty = entry.name.as_str();
        for member in entry.members {
            builder = match member {
                MemberEntry::Field { name, ty: field_ty, attributes } => {
                    let mut builder = builder.field(&name, sig(&field_ty)?);
                    for attribute in &attributes {
                        builder = builder.attribute(attribute);
                    }
                    builder
                }
                MemberEntry::Property {
                    name,
                    ty: property_ty,
                    is_static,
                    readonly,
                    attributes,
                } => {
                    let getter = self.bindings.lookup(ty, &format!("get_{}", name), None);
                    let setter = self.bindings.lookup(ty, &format!("set_{}", name), None);
                    builder.property_info(PropertyInfo {
                        readonly: readonly || (getter.is_some() && setter.is_none()),
                        name,
                        ty: sig(&property_ty)?,
                        is_static,
                        getter,
                        setter,
                        attributes,
                    })
                }
                MemberEntry::Method {
                    name,
                    params: param_entries,
                    returns,
                    is_static,
                    extends,
                    attributes,
                } => {
                    let mut method = MethodInfo {
                        params: build_params(param_entries, &sig)?,
                        returns: sig(&returns)?,
                        is_static: is_static || extends.is_some(),
                        extension_of: extends.as_deref().map(&sig).transpose()?,
                        body: None,
                        attributes,
                        name,
                    };
                    method.body = self.bindings.lookup(ty, &method.name, Some(&method.signature()));
                    builder.method_info(method)
                }
                MemberEntry::Constructor { params: param_entries } => {
                    let params = build_params(param_entries, &sig)?;
                    let probe = ConstructorInfo { params, body: None };
                    match self.bindings.lookup(ty, ".ctor", Some(&probe.signature())) {
                        Some(body) => builder.constructor(probe.params, move |ctx, args| body(ctx, args)),
                        None => builder.field_constructor(probe.params),
                    }
                }
            };
        }
        Ok(builder.build())
    }
}

impl ModuleReader for ManifestReader {
    fn read(&self, path: &Path) -> MarshalResult<ModuleImage> {
        let text = std::fs::read_to_string(path)?;
        self.parse_str(&text, &path.display().to_string())
    }
}

fn build_params(
    entries: Vec<ParamEntry>,
    sig: &impl Fn(&str) -> MarshalResult<TypeSig>,
) -> MarshalResult<Vec<ParamInfo>> {
    let mut params = Vec::with_capacity(entries.len());
    let mut seen_optional = false;
    for entry in entries {
        let ty = sig(&entry.ty)?;
        match entry.default {
            Some(default) => {
                seen_optional = true;
                let value = default_value(&default, &ty)?;
                params.push(ParamInfo::optional(entry.name, ty, value));
            }
            None if seen_optional => {
                return Err(MarshalError::type_mismatch(
                    "optional trailing parameters",
                    format!("required parameter {} after an optional one", entry.name),
                ));
            }
            None => params.push(ParamInfo::new(entry.name, ty)),
        }
    }
    Ok(params)
}

/// Host value of a JSON parameter default
fn default_value(json: &serde_json::Value, ty: &TypeSig) -> MarshalResult<HostValue> {
    use serde_json::Value as Json;

    let mismatch = || MarshalError::type_mismatch(ty.to_string(), json.to_string());
    match (ty, json) {
        (_, Json::Null) => Ok(HostValue::Null),
        (TypeSig::Nullable(inner), _) => default_value(json, inner),
        (TypeSig::Primitive(PrimitiveType::Bool), Json::Bool(b)) => Ok(HostValue::Bool(*b)),
        (TypeSig::Primitive(PrimitiveType::String), Json::String(s)) => Ok(HostValue::string(s)),
        (TypeSig::Primitive(PrimitiveType::Char), Json::String(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(HostValue::Char(c)),
                _ => Err(mismatch()),
            }
        }
        (TypeSig::Primitive(PrimitiveType::F32), Json::Number(n)) => {
            n.as_f64().map(|f| HostValue::F32(f as f32)).ok_or_else(mismatch)
        }
        (TypeSig::Primitive(PrimitiveType::F64), Json::Number(n)) => n.as_f64().map(HostValue::F64).ok_or_else(mismatch),
        (TypeSig::Primitive(p), Json::Number(n)) if p.is_integer() => n
            .as_f64()
            .and_then(|f| integer_from_f64(*p, f))
            .ok_or_else(mismatch),
        (TypeSig::Named(name), Json::Number(n)) => n
            .as_i64()
            .map(|value| {
                HostValue::Enum(EnumValue {
                    ty: name.clone(),
                    value,
                })
            })
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_reflect::TypeKind;

    const GEOMETRY: &str = r#"{
        "name": "Contoso.Geometry",
        "version": "1.2.0",
        "references": ["Contoso.Core"],
        "types": [
            {
                "name": "Contoso.Geometry.Point",
                "kind": "struct",
                "members": [
                    { "kind": "field", "name": "X", "type": "double" },
                    { "kind": "field", "name": "Y", "type": "double" },
                    { "kind": "constructor", "params": [
                        { "name": "X", "type": "double" },
                        { "name": "Y", "type": "double" }
                    ] },
                    { "kind": "property", "name": "Length", "type": "double" },
                    { "kind": "method", "name": "Scale", "returns": "Contoso.Geometry.Point",
                      "params": [{ "name": "factor", "type": "double", "default": 2 }] }
                ]
            },
            {
                "name": "Contoso.Geometry.Color",
                "kind": "enum",
                "underlying": "byte",
                "variants": [["Red", 1], ["Blue", 4]]
            }
        ]
    }"#;

    #[test]
    fn test_parse_manifest_binds_bodies() {
        let bindings = NativeBindings::new()
            .bind("Contoso.Geometry.Point::Scale(double)", |_, args| Ok(args[0].clone()))
            .bind("Contoso.Geometry.Point::get_Length", |_, _| Ok(HostValue::F64(5.0)));
        let image = ManifestReader::new(bindings).parse_str(GEOMETRY, "geometry").unwrap();

        assert_eq!(image.name, "Contoso.Geometry");
        assert_eq!(image.version.as_deref(), Some("1.2.0"));
        assert_eq!(image.references, vec!["Contoso.Core".to_string()]);

        let point = &image.types[0];
        assert_eq!(point.module.as_deref(), Some("Contoso.Geometry"));
        assert!(point.constructors[0].body.is_none());
        let scale = point.methods_named("Scale").next().unwrap();
        assert!(scale.body.is_some());
        assert!(matches!(scale.params[0].default, Some(HostValue::F64(f)) if f == 2.0));
        let length = point.property("Length").unwrap();
        assert!(length.getter.is_some());
        assert!(length.readonly);

        let color = &image.types[1];
        assert!(matches!(color.kind, TypeKind::Enum { underlying: PrimitiveType::U8, .. }));
        assert_eq!(color.enum_member("Blue"), Some(4));
    }

    #[test]
    fn test_unbound_property_is_field_backed() {
        let image = ManifestReader::default().parse_str(GEOMETRY, "geometry").unwrap();
        let length = image.types[0].property("Length").unwrap();
        assert!(length.getter.is_none());
        assert!(!length.readonly);
    }

    #[test]
    fn test_required_after_optional_is_rejected() {
        let text = r#"{ "name": "M", "types": [{ "name": "M.T", "kind": "class", "members": [
            { "kind": "method", "name": "F", "params": [
                { "name": "a", "type": "int", "default": 1 },
                { "name": "b", "type": "int" }
            ] }
        ] }] }"#;
        let err = ManifestReader::default().parse_str(text, "m.module.json").unwrap_err();
        assert!(matches!(err, MarshalError::InvalidModule { ref path, .. } if path == "m.module.json"));
    }

    #[test]
    fn test_malformed_manifest() {
        assert!(matches!(
            ManifestReader::default().parse_str("{ \"types\": [] }", "broken"),
            Err(MarshalError::InvalidModule { .. })
        ));
    }
}
