//! Converters
//!
//! A [`Converter`] is the bidirectional conversion procedure of one static
//! type. It is built once per type by [`Marshaller::get_converter`] from the
//! type's [`Shape`] and [`Plan`], and interprets that plan on every crossing.
//! Child converters named by the plan are linked lazily on first use, so a
//! self-referencing type builds without recursion.

use std::sync::Arc;

use ferry_reflect::{EnumValue, HostValue, PrimitiveType, StructValue, TypeSig};
use ferry_script::{JsPromise, Realm, Value, format_number};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::collections;
use crate::error::{MarshalError, MarshalResult};
use crate::future;
use crate::marshaller::Marshaller;
use crate::plan::{FieldPlan, Plan};
use crate::registry::{ScriptObjectHandle, unwrap_slot};
use crate::shape::Shape;

/// Bidirectional conversion procedure for one type
pub struct Converter {
    sig: TypeSig,
    shape: Shape,
    plan: Plan,
    children: Vec<(TypeSig, OnceCell<Arc<Converter>>)>,
}

impl Converter {
    /// Classify `sig`, lower it to a plan and validate the converters the
    /// plan calls. Children currently being built are not revisited.
    pub(crate) fn build(m: &Marshaller, sig: &TypeSig) -> MarshalResult<Converter> {
        let shape = Shape::classify(m.universe(), sig)?;
        let plan = Plan::for_shape(sig, &shape, |name| m.config().script_name(name));

        for (member, child) in plan_members(&plan) {
            if m.is_building(&child) {
                continue;
            }
            m.get_converter(&child)
                .map_err(|cause| MarshalError::member_failure(sig.to_string(), member, cause))?;
        }

        debug!(ty = %sig, shape = shape.name(), "built converter");
        let children = plan
            .children()
            .into_iter()
            .map(|child| (child, OnceCell::new()))
            .collect();
        Ok(Converter {
            sig: sig.clone(),
            shape,
            plan,
            children,
        })
    }

    pub fn sig(&self) -> &TypeSig {
        &self.sig
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The conversion IR this converter interprets
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    fn child(&self, m: &Marshaller, sig: &TypeSig) -> MarshalResult<Arc<Converter>> {
        match self.children.iter().find(|(child, _)| child == sig) {
            Some((_, cell)) => cell.get_or_try_init(|| m.get_converter(sig)).cloned(),
            None => m.get_converter(sig),
        }
    }

    fn mismatch(&self, found: impl Into<String>) -> MarshalError {
        MarshalError::type_mismatch(self.sig.to_string(), found)
    }

    /// Convert a script value to this type
    pub fn to_host(&self, m: &Marshaller, realm: &Realm, value: &Value) -> MarshalResult<HostValue> {
        match &self.plan {
            Plan::Void => Ok(HostValue::Null),
            Plan::Passthrough => infer_to_host(m, realm, value),
            Plan::Cast(p) => cast_to_host(*p, value),
            Plan::Enum { ty, underlying } => {
                let number = match value {
                    Value::Number(n) => *n,
                    Value::String(name) => {
                        let Shape::Enum(def) = &self.shape else {
                            return Err(self.mismatch(value.type_name()));
                        };
                        let member = def
                            .enum_member(name)
                            .ok_or_else(|| self.mismatch(format!("\"{}\"", name)))?;
                        return Ok(HostValue::Enum(EnumValue { ty: ty.clone(), value: member }));
                    }
                    other => return Err(self.mismatch(other.type_name())),
                };
                let raw = integer_from_f64(*underlying, number)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| self.mismatch(format_number(number)))?;
                Ok(HostValue::Enum(EnumValue { ty: ty.clone(), value: raw }))
            }
            Plan::Elements { elem } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                let items = match value.as_object().and_then(|o| o.array_values()) {
                    Some(items) => items,
                    None => match unwrap_slot(value) {
                        Some(host) => return Ok(HostValue::Array(host.elements()?)),
                        None => return Err(self.mismatch(value.type_name())),
                    },
                };
                let elem = self.child(m, elem)?;
                let converted = items
                    .iter()
                    .map(|item| elem.to_host(m, realm, item))
                    .collect::<MarshalResult<Vec<_>>>()?;
                Ok(HostValue::Array(converted))
            }
            Plan::Fields { ty, fields } => self.fields_to_host(m, realm, ty, fields, value),
            Plan::Wrap { ty } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                match unwrap_slot(value) {
                    Some(HostValue::Object(object)) if m.universe().is_assignable(&object.type_def(), ty) => {
                        Ok(HostValue::Object(object))
                    }
                    Some(other) => Err(self.mismatch(other.kind_name())),
                    None => Err(self.mismatch(value.type_name())),
                }
            }
            Plan::Interface { ty } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                if let Some(host) = unwrap_slot(value) {
                    return match host {
                        HostValue::Object(object) if m.universe().is_assignable(&object.type_def(), ty) => {
                            Ok(HostValue::Object(object))
                        }
                        other => Err(self.mismatch(other.kind_name())),
                    };
                }
                if value.as_object().is_none() {
                    return Err(self.mismatch(value.type_name()));
                }
                let proxy = m.implement(ty)?;
                Ok(HostValue::Object(proxy.instantiate(realm.persist(value.clone()), realm.dispatcher())))
            }
            Plan::Collection { kind, args } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                collections::to_host(m, realm, *kind, args, value)
            }
            Plan::Future { result } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                if let Some(HostValue::Future(future)) = unwrap_slot(value) {
                    return Ok(HostValue::Future(future));
                }
                match JsPromise::from_value(value) {
                    Some(promise) => Ok(HostValue::Future(future::promise_to_future(m, realm, &promise, result)?)),
                    None => {
                        let settled = self.child(m, result)?.to_host(m, realm, value)?;
                        Ok(HostValue::Future(ferry_reflect::HostFuture::completed(settled)))
                    }
                }
            }
            Plan::Optional { inner } => {
                if value.is_nullish() {
                    return Ok(HostValue::Null);
                }
                self.child(m, inner)?.to_host(m, realm, value)
            }
        }
    }

    fn fields_to_host(
        &self,
        m: &Marshaller,
        realm: &Realm,
        ty: &Arc<str>,
        fields: &[FieldPlan],
        value: &Value,
    ) -> MarshalResult<HostValue> {
        let object = match value.as_object() {
            Some(object) if !object.is_array() && !object.is_function() => object,
            _ => return Err(self.mismatch(value.type_name())),
        };
        let mut out = StructValue::new(ty.as_ref());
        for field in fields {
            let raw = object.get(realm, &field.script_name)?;
            let converted = if raw.is_undefined() {
                m.universe().default_value(&field.ty)
            } else {
                self.child(m, &field.ty)?.to_host(m, realm, &raw)?
            };
            out.fields.insert(field.name.clone(), converted);
        }
        Ok(HostValue::Struct(out))
    }

    /// Convert a host value of this type to a script value
    pub fn to_script(&self, m: &Marshaller, realm: &Realm, value: &HostValue) -> MarshalResult<Value> {
        match &self.plan {
            Plan::Void => Ok(Value::Undefined),
            Plan::Passthrough => infer_to_script(m, realm, value),
            Plan::Cast(p) => cast_to_script(*p, value),
            Plan::Enum { .. } => match value {
                HostValue::Enum(e) => Ok(Value::Number(e.value as f64)),
                other => other
                    .as_i64()
                    .map(|v| Value::Number(v as f64))
                    .ok_or_else(|| self.mismatch(other.kind_name())),
            },
            Plan::Elements { elem } => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let elem = self.child(m, elem)?;
                let items = value
                    .elements()?
                    .iter()
                    .map(|item| elem.to_script(m, realm, item))
                    .collect::<MarshalResult<Vec<_>>>()?;
                Ok(Value::Object(realm.create_array(items)))
            }
            Plan::Fields { ty, fields } => {
                let HostValue::Struct(host) = value else {
                    return Err(self.mismatch(value.kind_name()));
                };
                if host.ty != *ty {
                    return Err(self.mismatch(host.ty.to_string()));
                }
                let object = realm.create_object();
                for field in fields {
                    let field_value = match host.get(&field.name) {
                        Some(v) => v.clone(),
                        None => m.universe().default_value(&field.ty),
                    };
                    let converted = self.child(m, &field.ty)?.to_script(m, realm, &field_value)?;
                    object.define_value(field.script_name.clone(), converted);
                }
                Ok(Value::Object(object))
            }
            Plan::Wrap { .. } | Plan::Interface { .. } => match value {
                HostValue::Null => Ok(Value::Null),
                HostValue::Object(object) => m.object_to_script(realm, object),
                other => Err(self.mismatch(other.kind_name())),
            },
            Plan::Collection { kind, args } => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                collections::to_script(m, realm, *kind, args, value)
            }
            Plan::Future { result } => match value {
                HostValue::Null => Ok(Value::Null),
                HostValue::Future(f) => Ok(future::future_to_promise(m, realm, f, result).to_value()),
                other => Err(self.mismatch(other.kind_name())),
            },
            Plan::Optional { inner } => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                self.child(m, inner)?.to_script(m, realm, value)
            }
        }
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("sig", &self.sig)
            .field("shape", &self.shape.name())
            .field("plan", &self.plan)
            .finish()
    }
}

/// Child converters of a plan, labelled by the member they convert
fn plan_members(plan: &Plan) -> Vec<(String, TypeSig)> {
    match plan {
        Plan::Fields { fields, .. } => fields.iter().map(|f| (f.name.clone(), f.ty.clone())).collect(),
        Plan::Elements { elem } => vec![("<element>".to_string(), elem.clone())],
        Plan::Collection { args, .. } => args
            .iter()
            .enumerate()
            .map(|(i, arg)| (format!("<arg{}>", i), arg.clone()))
            .collect(),
        Plan::Future { result } if *result != TypeSig::Void => vec![("<result>".to_string(), result.clone())],
        Plan::Optional { inner } => vec![("<value>".to_string(), inner.clone())],
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Primitive casts
// ---------------------------------------------------------------------------

/// Integer host value for `n` truncated toward zero; `None` when not finite
/// or out of range
pub(crate) fn integer_from_f64(p: PrimitiveType, n: f64) -> Option<HostValue> {
    if !n.is_finite() {
        return None;
    }
    let t = n.trunc();
    let (lo, hi) = p.integer_range()?;
    if t < lo || t > hi {
        return None;
    }
    Some(match p {
        PrimitiveType::I8 => HostValue::I8(t as i8),
        PrimitiveType::U8 => HostValue::U8(t as u8),
        PrimitiveType::I16 => HostValue::I16(t as i16),
        PrimitiveType::U16 => HostValue::U16(t as u16),
        PrimitiveType::I32 => HostValue::I32(t as i32),
        PrimitiveType::U32 => HostValue::U32(t as u32),
        PrimitiveType::I64 => HostValue::I64(t as i64),
        PrimitiveType::U64 => HostValue::U64(t as u64),
        _ => return None,
    })
}

fn cast_to_host(p: PrimitiveType, value: &Value) -> MarshalResult<HostValue> {
    let mismatch = || MarshalError::type_mismatch(p.name(), value.type_name());
    match p {
        PrimitiveType::Bool => value.as_bool().map(HostValue::Bool).ok_or_else(mismatch),
        PrimitiveType::Char => {
            let text = value.as_str().ok_or_else(mismatch)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(HostValue::Char(c)),
                _ => Err(MarshalError::type_mismatch("char", format!("\"{}\"", text))),
            }
        }
        PrimitiveType::String => match value {
            Value::String(s) => Ok(HostValue::string(&**s)),
            Value::Null | Value::Undefined => Ok(HostValue::Null),
            _ => Err(mismatch()),
        },
        PrimitiveType::F32 => value.as_number().map(|n| HostValue::F32(n as f32)).ok_or_else(mismatch),
        PrimitiveType::F64 => value.as_number().map(HostValue::F64).ok_or_else(mismatch),
        integer => {
            let n = value.as_number().ok_or_else(mismatch)?;
            integer_from_f64(integer, n).ok_or_else(|| MarshalError::type_mismatch(integer.name(), format_number(n)))
        }
    }
}

fn cast_to_script(p: PrimitiveType, value: &HostValue) -> MarshalResult<Value> {
    let mismatch = || MarshalError::type_mismatch(p.name(), value.kind_name());
    match (p, value) {
        (PrimitiveType::String, HostValue::Null) => Ok(Value::Null),
        (PrimitiveType::String, HostValue::String(s)) => Ok(Value::string(&**s)),
        (PrimitiveType::String | PrimitiveType::Char, HostValue::Char(c)) => Ok(Value::string(c.to_string())),
        (PrimitiveType::Bool, HostValue::Bool(b)) => Ok(Value::Bool(*b)),
        (p, v) if p.is_integer() || p.is_float() => v.as_f64().map(Value::Number).ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

// ---------------------------------------------------------------------------
// Dynamic inference for `any`
// ---------------------------------------------------------------------------

/// Host value of a script value of unknown static type
pub fn infer_to_host(m: &Marshaller, realm: &Realm, value: &Value) -> MarshalResult<HostValue> {
    Ok(match value {
        Value::Undefined | Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::F64(*n),
        Value::String(s) => HostValue::string(&**s),
        Value::Object(object) => {
            if let Some(host) = unwrap_slot(value) {
                return Ok(host);
            }
            if let Some(promise) = JsPromise::from_object(object) {
                return Ok(HostValue::Future(future::promise_to_future(m, realm, &promise, &TypeSig::Any)?));
            }
            if let Some(items) = object.array_values() {
                return Ok(HostValue::Array(
                    items
                        .iter()
                        .map(|item| infer_to_host(m, realm, item))
                        .collect::<MarshalResult<Vec<_>>>()?,
                ));
            }
            HostValue::Object(Arc::new(ScriptObjectHandle::new(realm.persist(value.clone()))))
        }
    })
}

/// Script value of a host value of unknown static type
pub fn infer_to_script(m: &Marshaller, realm: &Realm, value: &HostValue) -> MarshalResult<Value> {
    Ok(match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Char(c) => Value::string(c.to_string()),
        HostValue::String(s) => Value::string(&**s),
        HostValue::Enum(e) => Value::Number(e.value as f64),
        HostValue::Array(items) => Value::Object(
            realm.create_array(
                items
                    .iter()
                    .map(|item| infer_to_script(m, realm, item))
                    .collect::<MarshalResult<Vec<_>>>()?,
            ),
        ),
        HostValue::Struct(s) => match m.get_converter(&TypeSig::Named(s.ty.clone())) {
            Ok(converter) => converter.to_script(m, realm, value)?,
            Err(_) => {
                let object = realm.create_object();
                for (name, field) in &s.fields {
                    object.define_value(m.config().script_name(name), infer_to_script(m, realm, field)?);
                }
                Value::Object(object)
            }
        },
        HostValue::Object(object) => m.object_to_script(realm, object)?,
        HostValue::List(_) | HostValue::Set(_) | HostValue::Iterable(_) => {
            let kind = match value {
                HostValue::List(_) => ferry_reflect::CollectionKind::List,
                HostValue::Set(_) => ferry_reflect::CollectionKind::Set,
                _ => ferry_reflect::CollectionKind::Iterable,
            };
            collections::to_script(m, realm, kind, &[TypeSig::Any], value)?
        }
        HostValue::Map(_) => {
            collections::to_script(m, realm, ferry_reflect::CollectionKind::Map, &[TypeSig::Any, TypeSig::Any], value)?
        }
        HostValue::Future(f) => future::future_to_promise(m, realm, f, &TypeSig::Any).to_value(),
        number => number
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| MarshalError::type_mismatch("any", number.kind_name()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_truncation_and_range() {
        assert_eq!(integer_from_f64(PrimitiveType::I32, 2.9), Some(HostValue::I32(2)));
        assert_eq!(integer_from_f64(PrimitiveType::I32, -2.9), Some(HostValue::I32(-2)));
        assert_eq!(integer_from_f64(PrimitiveType::U8, 256.0), None);
        assert_eq!(integer_from_f64(PrimitiveType::U8, -1.0), None);
        assert_eq!(integer_from_f64(PrimitiveType::I64, f64::NAN), None);
        assert_eq!(integer_from_f64(PrimitiveType::I16, f64::INFINITY), None);
    }

    #[test]
    fn test_char_requires_single_character() {
        assert_eq!(
            cast_to_host(PrimitiveType::Char, &Value::from("x")).unwrap(),
            HostValue::Char('x')
        );
        assert!(cast_to_host(PrimitiveType::Char, &Value::from("xy")).is_err());
        assert_eq!(
            cast_to_script(PrimitiveType::Char, &HostValue::Char('é')).unwrap().as_str(),
            Some("é")
        );
    }

    #[test]
    fn test_string_accepts_null() {
        assert_eq!(cast_to_host(PrimitiveType::String, &Value::Null).unwrap(), HostValue::Null);
        assert!(cast_to_script(PrimitiveType::String, &HostValue::Null).unwrap().is_null());
        assert!(cast_to_host(PrimitiveType::Bool, &Value::Null).is_err());
    }
}
