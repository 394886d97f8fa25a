//! Conversion plans
//!
//! A [`Plan`] is the closed intermediate representation of one type's
//! conversion. The [`Converter`](crate::convert::Converter) interprets it at
//! run time; a code-emission backend can walk the same plan with a
//! [`PlanVisitor`] and produce source or machine code instead.
//!
//! Nested conversions are never inlined: a plan refers to the converter of
//! another type by its [`TypeSig`], which keeps recursive types finite.

use std::fmt::Write as _;
use std::sync::Arc;

use ferry_reflect::{CollectionKind, PrimitiveType, TypeSig};
use smallvec::SmallVec;

use crate::shape::Shape;

/// One struct field as seen from both sides
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlan {
    /// Host field name
    pub name: String,
    /// Property name on the script object
    pub script_name: String,
    pub ty: TypeSig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// No value crosses (`undefined` / `Null`)
    Void,
    /// Dynamic inference in both directions
    Passthrough,
    /// Direct primitive cast
    Cast(PrimitiveType),
    /// Integer cast reinterpreted as an enum
    Enum {
        ty: Arc<str>,
        underlying: PrimitiveType,
    },
    /// Element-by-element copy
    Elements { elem: TypeSig },
    /// Field-by-field copy
    Fields { ty: Arc<str>, fields: Vec<FieldPlan> },
    /// Identity-preserving wrap through the registry
    Wrap { ty: TypeSig },
    /// Lazy adapter over a collection contract
    Collection { kind: CollectionKind, args: Vec<TypeSig> },
    /// Completion bridge
    Future { result: TypeSig },
    /// Registry unwrap, else a synthesized proxy
    Interface { ty: TypeSig },
    /// Null sentinel around the inner conversion
    Optional { inner: TypeSig },
}

impl Plan {
    /// Lower a shape to its plan
    pub fn for_shape(sig: &TypeSig, shape: &Shape, script_name: impl Fn(&str) -> String) -> Plan {
        match shape {
            Shape::Void => Plan::Void,
            Shape::Any => Plan::Passthrough,
            Shape::Primitive(p) => Plan::Cast(*p),
            Shape::Enum(ty) => Plan::Enum {
                ty: ty.full_name.clone(),
                underlying: match &ty.kind {
                    ferry_reflect::TypeKind::Enum { underlying, .. } => *underlying,
                    _ => PrimitiveType::I32,
                },
            },
            Shape::Array(elem) => Plan::Elements { elem: elem.clone() },
            Shape::Struct(ty) => Plan::Fields {
                ty: ty.full_name.clone(),
                fields: ty
                    .fields
                    .iter()
                    .filter(|f| !f.attributes.iter().any(|a| a == ferry_reflect::attributes::SCRIPT_HIDDEN))
                    .map(|f| FieldPlan {
                        name: f.name.clone(),
                        script_name: script_name(&f.name),
                        ty: f.ty.clone(),
                    })
                    .collect(),
            },
            Shape::Reference(_) => Plan::Wrap { ty: sig.clone() },
            Shape::Collection(kind, args) => Plan::Collection {
                kind: *kind,
                args: args.clone(),
            },
            Shape::Future(result) => Plan::Future { result: result.clone() },
            Shape::Interface(_) => Plan::Interface { ty: sig.clone() },
            Shape::Optional(inner) => Plan::Optional { inner: inner.clone() },
        }
    }

    /// Signatures of the converters this plan calls
    pub fn children(&self) -> SmallVec<[TypeSig; 4]> {
        match self {
            Plan::Elements { elem } => smallvec::smallvec![elem.clone()],
            Plan::Fields { fields, .. } => fields.iter().map(|f| f.ty.clone()).collect(),
            Plan::Collection { args, .. } => args.iter().cloned().collect(),
            Plan::Future { result } if *result != TypeSig::Void => smallvec::smallvec![result.clone()],
            Plan::Optional { inner } => smallvec::smallvec![inner.clone()],
            _ => SmallVec::new(),
        }
    }

    pub fn accept<V: PlanVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Plan::Void => visitor.visit_void(),
            Plan::Passthrough => visitor.visit_passthrough(),
            Plan::Cast(p) => visitor.visit_cast(*p),
            Plan::Enum { ty, underlying } => visitor.visit_enum(ty, *underlying),
            Plan::Elements { elem } => visitor.visit_elements(elem),
            Plan::Fields { ty, fields } => visitor.visit_fields(ty, fields),
            Plan::Wrap { ty } => visitor.visit_wrap(ty),
            Plan::Collection { kind, args } => visitor.visit_collection(*kind, args),
            Plan::Future { result } => visitor.visit_future(result),
            Plan::Interface { ty } => visitor.visit_interface(ty),
            Plan::Optional { inner } => visitor.visit_optional(inner),
        }
    }
}

/// Replays the per-shape decisions of a plan
pub trait PlanVisitor {
    type Output;

    fn visit_void(&mut self) -> Self::Output;
    fn visit_passthrough(&mut self) -> Self::Output;
    fn visit_cast(&mut self, primitive: PrimitiveType) -> Self::Output;
    fn visit_enum(&mut self, ty: &str, underlying: PrimitiveType) -> Self::Output;
    fn visit_elements(&mut self, elem: &TypeSig) -> Self::Output;
    fn visit_fields(&mut self, ty: &str, fields: &[FieldPlan]) -> Self::Output;
    fn visit_wrap(&mut self, ty: &TypeSig) -> Self::Output;
    fn visit_collection(&mut self, kind: CollectionKind, args: &[TypeSig]) -> Self::Output;
    fn visit_future(&mut self, result: &TypeSig) -> Self::Output;
    fn visit_interface(&mut self, ty: &TypeSig) -> Self::Output;
    fn visit_optional(&mut self, inner: &TypeSig) -> Self::Output;
}

/// Renders a plan as one line of pseudo code, e.g.
/// `fields Contoso.Point { X: call<double>, Y: call<double> }`
#[derive(Debug, Default)]
pub struct PlanPrinter;

impl PlanVisitor for PlanPrinter {
    type Output = String;

    fn visit_void(&mut self) -> String {
        "void".to_string()
    }

    fn visit_passthrough(&mut self) -> String {
        "passthrough".to_string()
    }

    fn visit_cast(&mut self, primitive: PrimitiveType) -> String {
        format!("cast {}", primitive.name())
    }

    fn visit_enum(&mut self, ty: &str, underlying: PrimitiveType) -> String {
        format!("enum {} as {}", ty, underlying.name())
    }

    fn visit_elements(&mut self, elem: &TypeSig) -> String {
        format!("for each: call<{}>", elem)
    }

    fn visit_fields(&mut self, ty: &str, fields: &[FieldPlan]) -> String {
        let mut out = format!("fields {} {{", ty);
        for (i, field) in fields.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            let _ = write!(out, "{}{}: call<{}>", sep, field.name, field.ty);
        }
        out.push_str(" }");
        out
    }

    fn visit_wrap(&mut self, ty: &TypeSig) -> String {
        format!("wrap {}", ty)
    }

    fn visit_collection(&mut self, kind: CollectionKind, args: &[TypeSig]) -> String {
        let args: Vec<String> = args.iter().map(|a| format!("call<{}>", a)).collect();
        format!("adapt {}({})", kind.name(), args.join(", "))
    }

    fn visit_future(&mut self, result: &TypeSig) -> String {
        format!("bridge -> call<{}>", result)
    }

    fn visit_interface(&mut self, ty: &TypeSig) -> String {
        format!("unwrap or proxy {}", ty)
    }

    fn visit_optional(&mut self, inner: &TypeSig) -> String {
        format!("if null then null else call<{}>", inner)
    }
}
