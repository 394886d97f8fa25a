//! Structural classification of static host types

use std::sync::Arc;

use ferry_reflect::{CollectionKind, PrimitiveType, TypeDef, TypeKind, TypeSig, TypeUniverse, attributes};

use crate::error::{MarshalError, MarshalResult};

/// Conversion strategy family of a static type
#[derive(Debug, Clone)]
pub enum Shape {
    Void,
    Any,
    /// Castable primitive, `string` included
    Primitive(PrimitiveType),
    Enum(Arc<TypeDef>),
    Array(TypeSig),
    /// By-value aggregate
    Struct(Arc<TypeDef>),
    /// By-reference class
    Reference(Arc<TypeDef>),
    Collection(CollectionKind, Vec<TypeSig>),
    Future(TypeSig),
    Interface(Arc<TypeDef>),
    Optional(TypeSig),
}

impl Shape {
    /// Classify `sig` against the universe
    pub fn classify(universe: &TypeUniverse, sig: &TypeSig) -> MarshalResult<Shape> {
        Ok(match sig {
            TypeSig::Void => Shape::Void,
            TypeSig::Any => Shape::Any,
            TypeSig::Primitive(p) => Shape::Primitive(*p),
            TypeSig::Array(elem) => Shape::Array((**elem).clone()),
            TypeSig::Nullable(inner) => Shape::Optional((**inner).clone()),
            TypeSig::Collection(kind, args) => {
                if args.len() != kind.arity() {
                    return Err(MarshalError::unsupported(sig.to_string()));
                }
                Shape::Collection(*kind, args.clone())
            }
            TypeSig::Future(result) => Shape::Future((**result).clone()),
            TypeSig::Param(_) => return Err(MarshalError::unsupported(sig.to_string())),
            TypeSig::Named(_) | TypeSig::Generic { .. } => {
                if sig.is_open() {
                    return Err(MarshalError::unsupported(sig.to_string()));
                }
                let ty = universe
                    .resolve(sig)
                    .map_err(|e| MarshalError::unsupported(format!("{} ({})", sig, e)))?;
                if ty.has_attribute(attributes::SCRIPT_HIDDEN) || ty.is_generic_definition() {
                    return Err(MarshalError::unsupported(sig.to_string()));
                }
                match &ty.kind {
                    TypeKind::Enum { .. } => Shape::Enum(ty),
                    TypeKind::Struct => Shape::Struct(ty),
                    TypeKind::Class => Shape::Reference(ty),
                    TypeKind::Interface => Shape::Interface(ty),
                    TypeKind::StaticClass => return Err(MarshalError::unsupported(sig.to_string())),
                }
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Void => "void",
            Shape::Any => "any",
            Shape::Primitive(_) => "primitive",
            Shape::Enum(_) => "enum",
            Shape::Array(_) => "array",
            Shape::Struct(_) => "struct",
            Shape::Reference(_) => "reference",
            Shape::Collection(..) => "collection",
            Shape::Future(_) => "future",
            Shape::Interface(_) => "interface",
            Shape::Optional(_) => "optional",
        }
    }

    /// Whether values of this shape are copied on every crossing
    pub fn is_by_value(&self) -> bool {
        matches!(
            self,
            Shape::Primitive(_) | Shape::Enum(_) | Shape::Array(_) | Shape::Struct(_)
        )
    }
}
