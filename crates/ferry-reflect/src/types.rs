//! Host type metadata
//!
//! A [`TypeDef`] describes one host type: its kind, generic shape, base type,
//! implemented interfaces and members. Member bodies are [`Invoker`] closures,
//! so a type is fully self-describing and the engine never needs compiled
//! host code to call it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::HostResult;
use crate::sig::{PrimitiveType, TypeSig};
use crate::value::HostValue;

/// Well-known attribute names
pub mod attributes {
    /// Member or type is not projected into the script realm
    pub const SCRIPT_HIDDEN: &str = "ScriptHidden";
}

/// Receiver and declaring type handed to member bodies
pub struct CallContext<'a> {
    /// Instance receiver, `None` for static members and constructors
    pub this: Option<&'a HostValue>,
    pub declaring: &'a Arc<TypeDef>,
}

impl CallContext<'_> {
    /// The receiver, or a `TypeMismatch` for static calls
    pub fn this(&self) -> HostResult<&HostValue> {
        self.this.ok_or_else(|| {
            crate::HostError::type_mismatch(self.declaring.full_name.to_string(), "static call")
        })
    }
}

/// Member body
pub type Invoker = Arc<dyn Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Enum {
        underlying: PrimitiveType,
        members: IndexMap<String, i64>,
    },
    Struct,
    Class,
    Interface,
    /// Class with only static members, not instantiable
    StaticClass,
}

#[derive(Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeSig,
    /// Default value for an optional trailing parameter
    pub default: Option<HostValue>,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, ty: TypeSig) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: TypeSig, default: HostValue) -> Self {
        Self {
            name: name.into(),
            ty,
            default: Some(default),
        }
    }
}

#[derive(Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeSig,
    pub attributes: Vec<String>,
}

/// A property; without a getter it is backed by the field of the same name
#[derive(Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: TypeSig,
    pub is_static: bool,
    pub readonly: bool,
    pub getter: Option<Invoker>,
    pub setter: Option<Invoker>,
    pub attributes: Vec<String>,
}

#[derive(Clone)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub returns: TypeSig,
    pub is_static: bool,
    /// For extension methods: the extended type, passed as the receiver
    pub extension_of: Option<TypeSig>,
    pub body: Option<Invoker>,
    pub attributes: Vec<String>,
}

impl MethodInfo {
    /// `name(int,string)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }

    pub fn is_extension(&self) -> bool {
        self.extension_of.is_some()
    }
}

#[derive(Clone)]
pub struct ConstructorInfo {
    pub params: Vec<ParamInfo>,
    /// Returns the new instance; `None` initializes fields from arguments
    pub body: Option<Invoker>,
}

impl ConstructorInfo {
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!(".ctor({})", params.join(","))
    }
}

#[derive(Clone)]
pub struct TypeDef {
    pub full_name: Arc<str>,
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    /// Parameter names of a generic definition
    pub generic_params: Vec<Arc<str>>,
    /// Arguments of a generic instantiation
    pub generic_args: Vec<TypeSig>,
    /// Definition an instantiation was built from
    pub definition: Option<Arc<str>>,
    pub base: Option<TypeSig>,
    pub interfaces: Vec<TypeSig>,
    pub fields: Vec<FieldInfo>,
    pub properties: Vec<PropertyInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<ConstructorInfo>,
    /// Name of the module that declared this type
    pub module: Option<String>,
    pub attributes: Vec<String>,
}

impl TypeDef {
    pub fn new(full_name: &str, kind: TypeKind) -> Self {
        let (namespace, name) = match full_name.rfind('.') {
            Some(i) => (full_name[..i].to_string(), full_name[i + 1..].to_string()),
            None => (String::new(), full_name.to_string()),
        };
        Self {
            full_name: Arc::from(full_name),
            namespace,
            name,
            kind,
            generic_params: Vec::new(),
            generic_args: Vec::new(),
            definition: None,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            module: None,
            attributes: Vec::new(),
        }
    }

    /// Signature naming this type
    pub fn sig(&self) -> TypeSig {
        match &self.definition {
            Some(definition) => TypeSig::generic(definition.as_ref(), self.generic_args.clone()),
            None if self.is_generic_definition() => TypeSig::generic(
                self.full_name.as_ref(),
                self.generic_params.iter().map(|p| TypeSig::Param(p.clone())).collect(),
            ),
            None => TypeSig::Named(self.full_name.clone()),
        }
    }

    pub fn is_generic_definition(&self) -> bool {
        !self.generic_params.is_empty() && self.generic_args.is_empty()
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::Struct | TypeKind::Enum { .. })
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.kind, TypeKind::Interface)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodInfo> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Enum member value by name
    pub fn enum_member(&self, name: &str) -> Option<i64> {
        match &self.kind {
            TypeKind::Enum { members, .. } => members.get(name).copied(),
            _ => None,
        }
    }

    /// Enum member name by value
    pub fn enum_name(&self, value: i64) -> Option<&str> {
        match &self.kind {
            TypeKind::Enum { members, .. } => members
                .iter()
                .find(|(_, v)| **v == value)
                .map(|(k, _)| k.as_str()),
            _ => None,
        }
    }

    /// Build the closed instantiation of a generic definition
    pub fn instantiate(&self, args: &[TypeSig]) -> TypeDef {
        let bindings: HashMap<Arc<str>, TypeSig> = self
            .generic_params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        let mut inst = self.clone();
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        inst.full_name = Arc::from(format!("{}<{}>", self.full_name, rendered.join(",")));
        inst.name = format!("{}<{}>", self.name, rendered.join(","));
        inst.definition = Some(self.full_name.clone());
        inst.generic_args = args.to_vec();
        inst.base = self.base.as_ref().map(|b| b.substitute(&bindings));
        inst.interfaces = self.interfaces.iter().map(|i| i.substitute(&bindings)).collect();
        for field in &mut inst.fields {
            field.ty = field.ty.substitute(&bindings);
        }
        for property in &mut inst.properties {
            property.ty = property.ty.substitute(&bindings);
        }
        for method in &mut inst.methods {
            method.returns = method.returns.substitute(&bindings);
            for param in &mut method.params {
                param.ty = param.ty.substitute(&bindings);
            }
        }
        for ctor in &mut inst.constructors {
            for param in &mut ctor.params {
                param.ty = param.ty.substitute(&bindings);
            }
        }
        inst
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDef")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("fields", &self.fields.len())
            .field("properties", &self.properties.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodInfo({} -> {})", self.signature(), self.returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_namespace() {
        let ty = TypeDef::new("Contoso.Geometry.Point", TypeKind::Struct);
        assert_eq!(ty.namespace, "Contoso.Geometry");
        assert_eq!(ty.name, "Point");
        assert_eq!(ty.sig(), TypeSig::named("Contoso.Geometry.Point"));
    }

    #[test]
    fn test_instantiate_substitutes_members() {
        let mut ty = TypeDef::new("Contoso.Box", TypeKind::Class);
        ty.generic_params = vec![Arc::from("T")];
        ty.fields.push(FieldInfo {
            name: "Value".into(),
            ty: TypeSig::param("T"),
            attributes: Vec::new(),
        });
        assert!(ty.is_generic_definition());

        let inst = ty.instantiate(&[TypeSig::int()]);
        assert_eq!(&*inst.full_name, "Contoso.Box<int>");
        assert_eq!(inst.sig(), TypeSig::generic("Contoso.Box", vec![TypeSig::int()]));
        assert_eq!(inst.fields[0].ty, TypeSig::int());
        assert!(!inst.is_generic_definition());
    }

    #[test]
    fn test_enum_lookup() {
        let mut members = IndexMap::new();
        members.insert("Red".to_string(), 1);
        members.insert("Green".to_string(), 2);
        let ty = TypeDef::new(
            "Contoso.Color",
            TypeKind::Enum {
                underlying: PrimitiveType::I32,
                members,
            },
        );
        assert_eq!(ty.enum_member("Green"), Some(2));
        assert_eq!(ty.enum_name(1), Some("Red"));
        assert!(ty.is_value_type());
    }
}
