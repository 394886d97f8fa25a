//! Fluent construction of [`TypeDef`]s

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::HostResult;
use crate::sig::{PrimitiveType, TypeSig};
use crate::types::{
    CallContext, ConstructorInfo, FieldInfo, Invoker, MethodInfo, ParamInfo, PropertyInfo,
    TypeDef, TypeKind,
};
use crate::value::HostValue;

enum LastMember {
    Field(usize),
    Property(usize),
    Method(usize),
}

/// Builder for host type metadata
///
/// ```ignore
/// let point = TypeBuilder::struct_type("Contoso.Point")
///     .field("X", TypeSig::double())
///     .field("Y", TypeSig::double())
///     .build();
/// ```
pub struct TypeBuilder {
    def: TypeDef,
    last: Option<LastMember>,
}

fn invoker<F>(body: F) -> Invoker
where
    F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
{
    Arc::new(body)
}

impl TypeBuilder {
    fn new(full_name: &str, kind: TypeKind) -> Self {
        Self {
            def: TypeDef::new(full_name, kind),
            last: None,
        }
    }

    pub fn class(full_name: &str) -> Self {
        Self::new(full_name, TypeKind::Class)
    }

    pub fn struct_type(full_name: &str) -> Self {
        Self::new(full_name, TypeKind::Struct)
    }

    pub fn interface(full_name: &str) -> Self {
        Self::new(full_name, TypeKind::Interface)
    }

    pub fn static_class(full_name: &str) -> Self {
        Self::new(full_name, TypeKind::StaticClass)
    }

    pub fn enumeration(full_name: &str, underlying: PrimitiveType) -> Self {
        Self::new(
            full_name,
            TypeKind::Enum {
                underlying,
                members: IndexMap::new(),
            },
        )
    }

    /// Add an enum member
    pub fn variant(mut self, name: &str, value: i64) -> Self {
        if let TypeKind::Enum { members, .. } = &mut self.def.kind {
            members.insert(name.to_string(), value);
        }
        self
    }

    pub fn generic_params(mut self, params: &[&str]) -> Self {
        self.def.generic_params = params.iter().map(|p| Arc::from(*p)).collect();
        self
    }

    pub fn base(mut self, base: TypeSig) -> Self {
        self.def.base = Some(base);
        self
    }

    pub fn implements(mut self, interface: TypeSig) -> Self {
        self.def.interfaces.push(interface);
        self
    }

    pub fn module(mut self, module: &str) -> Self {
        self.def.module = Some(module.to_string());
        self
    }

    /// Attach an attribute to the last added member, or to the type if no
    /// member was added yet
    pub fn attribute(mut self, name: &str) -> Self {
        let name = name.to_string();
        match self.last {
            Some(LastMember::Field(i)) => self.def.fields[i].attributes.push(name),
            Some(LastMember::Property(i)) => self.def.properties[i].attributes.push(name),
            Some(LastMember::Method(i)) => self.def.methods[i].attributes.push(name),
            None => self.def.attributes.push(name),
        }
        self
    }

    pub fn field(mut self, name: &str, ty: TypeSig) -> Self {
        self.def.fields.push(FieldInfo {
            name: name.to_string(),
            ty,
            attributes: Vec::new(),
        });
        self.last = Some(LastMember::Field(self.def.fields.len() - 1));
        self
    }

    fn push_property(mut self, property: PropertyInfo) -> Self {
        self.def.properties.push(property);
        self.last = Some(LastMember::Property(self.def.properties.len() - 1));
        self
    }

    /// Read-write property backed by the field of the same name
    pub fn property(self, name: &str, ty: TypeSig) -> Self {
        self.push_property(PropertyInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            readonly: false,
            getter: None,
            setter: None,
            attributes: Vec::new(),
        })
    }

    /// Computed read-only property
    pub fn getter<G>(self, name: &str, ty: TypeSig, getter: G) -> Self
    where
        G: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.push_property(PropertyInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            readonly: true,
            getter: Some(invoker(getter)),
            setter: None,
            attributes: Vec::new(),
        })
    }

    /// Computed read-write property; the setter receives the value as its
    /// only argument
    pub fn accessor<G, S>(self, name: &str, ty: TypeSig, getter: G, setter: S) -> Self
    where
        G: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
        S: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.push_property(PropertyInfo {
            name: name.to_string(),
            ty,
            is_static: false,
            readonly: false,
            getter: Some(invoker(getter)),
            setter: Some(invoker(setter)),
            attributes: Vec::new(),
        })
    }

    pub fn static_property<G>(self, name: &str, ty: TypeSig, getter: G) -> Self
    where
        G: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.push_property(PropertyInfo {
            name: name.to_string(),
            ty,
            is_static: true,
            readonly: true,
            getter: Some(invoker(getter)),
            setter: None,
            attributes: Vec::new(),
        })
    }

    /// Add a fully described property (used by module readers)
    pub fn property_info(self, property: PropertyInfo) -> Self {
        self.push_property(property)
    }

    /// Add a fully described method (used by module readers)
    pub fn method_info(mut self, method: MethodInfo) -> Self {
        self.def.methods.push(method);
        self.last = Some(LastMember::Method(self.def.methods.len() - 1));
        self
    }

    pub fn method<F>(self, name: &str, params: Vec<ParamInfo>, returns: TypeSig, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.method_info(MethodInfo {
            name: name.to_string(),
            params,
            returns,
            is_static: false,
            extension_of: None,
            body: Some(invoker(body)),
            attributes: Vec::new(),
        })
    }

    /// Method without a body (interface members)
    pub fn abstract_method(self, name: &str, params: Vec<ParamInfo>, returns: TypeSig) -> Self {
        self.method_info(MethodInfo {
            name: name.to_string(),
            params,
            returns,
            is_static: false,
            extension_of: None,
            body: None,
            attributes: Vec::new(),
        })
    }

    pub fn static_method<F>(self, name: &str, params: Vec<ParamInfo>, returns: TypeSig, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.method_info(MethodInfo {
            name: name.to_string(),
            params,
            returns,
            is_static: true,
            extension_of: None,
            body: Some(invoker(body)),
            attributes: Vec::new(),
        })
    }

    /// Static extension method; the body receives the extended instance as
    /// the call receiver (`ctx.this`)
    pub fn extension_method<F>(
        self,
        name: &str,
        target: TypeSig,
        params: Vec<ParamInfo>,
        returns: TypeSig,
        body: F,
    ) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.method_info(MethodInfo {
            name: name.to_string(),
            params,
            returns,
            is_static: true,
            extension_of: Some(target),
            body: Some(invoker(body)),
            attributes: Vec::new(),
        })
    }

    pub fn constructor<F>(mut self, params: Vec<ParamInfo>, body: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    {
        self.def.constructors.push(ConstructorInfo {
            params,
            body: Some(invoker(body)),
        });
        self
    }

    /// Constructor assigning each argument to the field of the same name
    pub fn field_constructor(mut self, params: Vec<ParamInfo>) -> Self {
        self.def.constructors.push(ConstructorInfo { params, body: None });
        self
    }

    pub fn build(self) -> TypeDef {
        self.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::attributes::SCRIPT_HIDDEN;

    #[test]
    fn test_attribute_targets_last_member() {
        let ty = TypeBuilder::class("Contoso.Widget")
            .attribute("Serializable")
            .field("Secret", TypeSig::string())
            .attribute(SCRIPT_HIDDEN)
            .build();
        assert!(ty.has_attribute("Serializable"));
        assert_eq!(ty.fields[0].attributes, vec![SCRIPT_HIDDEN.to_string()]);
    }

    #[test]
    fn test_enum_variants() {
        let ty = TypeBuilder::enumeration("Contoso.Color", PrimitiveType::U8)
            .variant("Red", 1)
            .variant("Blue", 4)
            .build();
        assert_eq!(ty.enum_member("Blue"), Some(4));
    }
}
