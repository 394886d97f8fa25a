//! Host values
//!
//! `HostValue` is `Send + Sync`: primitives, strings and by-value aggregates
//! are owned, while reference instances, collections and futures are shared
//! through `Arc` and compare by identity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::collections::{HostIterable, HostList, HostMap, HostSet};
use crate::error::{HostError, HostResult};
use crate::future::HostFuture;
use crate::sig::{PrimitiveType, TypeSig};
use crate::types::TypeDef;

/// Shared reference to a host instance
pub type HostObjectRef = Arc<dyn HostObject>;

/// A by-reference host instance
pub trait HostObject: Send + Sync + 'static {
    fn type_def(&self) -> Arc<TypeDef>;

    fn get_field(&self, name: &str) -> HostResult<HostValue> {
        Err(HostError::missing_member(self.type_def().full_name.to_string(), name))
    }

    fn set_field(&self, name: &str, _value: HostValue) -> HostResult<()> {
        Err(HostError::missing_member(self.type_def().full_name.to_string(), name))
    }

    /// Read a property without a declared getter
    fn get_property(&self, name: &str) -> HostResult<HostValue> {
        self.get_field(name)
    }

    /// Write a property without a declared setter
    fn set_property(&self, name: &str, value: HostValue) -> HostResult<()> {
        self.set_field(name, value)
    }

    /// Invoke a method without a declared body, by signature (`name(int)`)
    fn invoke(&self, signature: &str, _args: &[HostValue]) -> HostResult<HostValue> {
        Err(HostError::not_supported(format!(
            "{} cannot invoke {}",
            self.type_def().full_name,
            signature
        )))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Address identity of a shared host object
pub fn object_addr(object: &HostObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Value of an enum type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub ty: Arc<str>,
    pub value: i64,
}

/// By-value aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub ty: Arc<str>,
    pub fields: IndexMap<String, HostValue>,
}

impl StructValue {
    pub fn new(ty: impl AsRef<str>) -> Self {
        Self {
            ty: Arc::from(ty.as_ref()),
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: HostValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.fields.get(name)
    }
}

#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    Char(char),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    Enum(EnumValue),
    Array(Vec<HostValue>),
    Struct(StructValue),
    Object(HostObjectRef),
    List(Arc<dyn HostList>),
    Set(Arc<dyn HostSet>),
    Map(Arc<dyn HostMap>),
    Iterable(Arc<dyn HostIterable>),
    Future(HostFuture),
}

impl HostValue {
    pub fn string(s: impl AsRef<str>) -> Self {
        HostValue::String(Arc::from(s.as_ref()))
    }

    pub fn object<T: HostObject>(object: T) -> Self {
        HostValue::Object(Arc::new(object))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Short label of the runtime kind, for error messages
    pub fn kind_name(&self) -> String {
        match self {
            HostValue::Null => "null".into(),
            HostValue::Bool(_) => "bool".into(),
            HostValue::Char(_) => "char".into(),
            HostValue::I8(_) => "sbyte".into(),
            HostValue::U8(_) => "byte".into(),
            HostValue::I16(_) => "short".into(),
            HostValue::U16(_) => "ushort".into(),
            HostValue::I32(_) => "int".into(),
            HostValue::U32(_) => "uint".into(),
            HostValue::I64(_) => "long".into(),
            HostValue::U64(_) => "ulong".into(),
            HostValue::F32(_) => "float".into(),
            HostValue::F64(_) => "double".into(),
            HostValue::String(_) => "string".into(),
            HostValue::Enum(e) => e.ty.to_string(),
            HostValue::Array(_) => "array".into(),
            HostValue::Struct(s) => s.ty.to_string(),
            HostValue::Object(o) => o.type_def().full_name.to_string(),
            HostValue::List(_) => "List".into(),
            HostValue::Set(_) => "Set".into(),
            HostValue::Map(_) => "Map".into(),
            HostValue::Iterable(_) => "Iterable".into(),
            HostValue::Future(_) => "Task".into(),
        }
    }

    /// Integer view of any integral value (enums included)
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            HostValue::I8(v) => *v as i64,
            HostValue::U8(v) => *v as i64,
            HostValue::I16(v) => *v as i64,
            HostValue::U16(v) => *v as i64,
            HostValue::I32(v) => *v as i64,
            HostValue::U32(v) => *v as i64,
            HostValue::I64(v) => *v,
            HostValue::U64(v) => i64::try_from(*v).ok()?,
            HostValue::Enum(e) => e.value,
            _ => return None,
        })
    }

    /// Numeric view of any number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::F32(v) => Some(*v as f64),
            HostValue::F64(v) => Some(*v),
            HostValue::U64(v) => Some(*v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObjectRef> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            HostValue::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast a host object to its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(|o| o.as_any().downcast_ref::<T>())
    }

    /// Elements of any sequence-like value
    pub fn elements(&self) -> HostResult<Vec<HostValue>> {
        match self {
            HostValue::Array(items) => Ok(items.clone()),
            HostValue::List(list) => list.snapshot(),
            HostValue::Set(set) => set.snapshot(),
            HostValue::Iterable(iter) => iter.snapshot(),
            other => Err(HostError::type_mismatch("sequence", other.kind_name())),
        }
    }

    /// Zero value of a primitive signature; `Null` for everything else
    pub fn default_for(sig: &TypeSig) -> HostValue {
        match sig {
            TypeSig::Primitive(p) => match p {
                PrimitiveType::Bool => HostValue::Bool(false),
                PrimitiveType::Char => HostValue::Char('\0'),
                PrimitiveType::I8 => HostValue::I8(0),
                PrimitiveType::U8 => HostValue::U8(0),
                PrimitiveType::I16 => HostValue::I16(0),
                PrimitiveType::U16 => HostValue::U16(0),
                PrimitiveType::I32 => HostValue::I32(0),
                PrimitiveType::U32 => HostValue::U32(0),
                PrimitiveType::I64 => HostValue::I64(0),
                PrimitiveType::U64 => HostValue::U64(0),
                PrimitiveType::F32 => HostValue::F32(0.0),
                PrimitiveType::F64 => HostValue::F64(0.0),
                PrimitiveType::String => HostValue::Null,
            },
            _ => HostValue::Null,
        }
    }
}

fn arc_addr<T: ?Sized>(arc: &Arc<T>) -> *const () {
    Arc::as_ptr(arc) as *const ()
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Enum(a), Enum(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Struct(a), Struct(b)) => a == b,
            (Object(a), Object(b)) => arc_addr(a) == arc_addr(b),
            (List(a), List(b)) => arc_addr(a) == arc_addr(b),
            (Set(a), Set(b)) => arc_addr(a) == arc_addr(b),
            (Map(a), Map(b)) => arc_addr(a) == arc_addr(b),
            (Iterable(a), Iterable(b)) => arc_addr(a) == arc_addr(b),
            (Future(a), Future(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(v) => write!(f, "{}", v),
            HostValue::Char(v) => write!(f, "{:?}", v),
            HostValue::String(v) => write!(f, "{:?}", v),
            HostValue::F32(v) => write!(f, "{}f", v),
            HostValue::F64(v) => write!(f, "{}d", v),
            HostValue::Enum(e) => write!(f, "{}({})", e.ty, e.value),
            HostValue::Array(items) => f.debug_list().entries(items).finish(),
            HostValue::Struct(s) => {
                let mut d = f.debug_struct(&s.ty);
                for (k, v) in &s.fields {
                    d.field(k, v);
                }
                d.finish()
            }
            HostValue::Object(o) => write!(f, "{}@{:#x}", o.type_def().full_name, object_addr(o)),
            other => match other.as_i64() {
                Some(v) => write!(f, "{}:{}", v, other.kind_name()),
                None => write!(f, "<{}>", other.kind_name()),
            },
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for HostValue {
            fn from(v: $t) -> Self {
                HostValue::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    char => Char,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    StructValue => Struct,
    EnumValue => Enum,
    HostFuture => Future,
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(Arc::from(s))
    }
}

impl From<HostObjectRef> for HostValue {
    fn from(o: HostObjectRef) -> Self {
        HostValue::Object(o)
    }
}

/// Generic by-reference instance storing its fields in a map
pub struct HostInstance {
    ty: Arc<TypeDef>,
    fields: RwLock<IndexMap<String, HostValue>>,
}

impl HostInstance {
    /// Create an instance with every declared field at its default
    pub fn new(ty: Arc<TypeDef>) -> Self {
        let fields = ty
            .fields
            .iter()
            .map(|f| (f.name.clone(), HostValue::default_for(&f.ty)))
            .collect();
        Self {
            ty,
            fields: RwLock::new(fields),
        }
    }

    pub fn with_fields(ty: Arc<TypeDef>, values: impl IntoIterator<Item = (String, HostValue)>) -> Self {
        let instance = Self::new(ty);
        {
            let mut fields = instance.fields.write();
            for (name, value) in values {
                fields.insert(name, value);
            }
        }
        instance
    }

    pub fn into_ref(self) -> HostObjectRef {
        Arc::new(self)
    }
}

impl HostObject for HostInstance {
    fn type_def(&self) -> Arc<TypeDef> {
        self.ty.clone()
    }

    fn get_field(&self, name: &str) -> HostResult<HostValue> {
        self.fields
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::missing_member(self.ty.full_name.to_string(), name))
    }

    fn set_field(&self, name: &str, value: HostValue) -> HostResult<()> {
        let mut fields = self.fields.write();
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(HostError::missing_member(self.ty.full_name.to_string(), name)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldInfo, TypeKind};

    fn widget() -> Arc<TypeDef> {
        let mut ty = TypeDef::new("Contoso.Widget", TypeKind::Class);
        ty.fields.push(FieldInfo {
            name: "Size".into(),
            ty: TypeSig::int(),
            attributes: Vec::new(),
        });
        Arc::new(ty)
    }

    #[test]
    fn test_instance_fields() {
        let instance = HostInstance::new(widget());
        assert_eq!(instance.get_field("Size").unwrap(), HostValue::I32(0));
        instance.set_field("Size", HostValue::I32(4)).unwrap();
        assert_eq!(instance.get_field("Size").unwrap(), HostValue::I32(4));
        assert!(instance.set_field("Color", HostValue::Null).is_err());
    }

    #[test]
    fn test_object_equality_is_identity() {
        let a = HostInstance::new(widget()).into_ref();
        let b = HostInstance::new(widget()).into_ref();
        assert_eq!(HostValue::Object(a.clone()), HostValue::Object(a.clone()));
        assert_ne!(HostValue::Object(a), HostValue::Object(b));
    }

    #[test]
    fn test_struct_equality_is_structural() {
        let p = StructValue::new("Contoso.Point").with("X", 1.into());
        let q = StructValue::new("Contoso.Point").with("X", 1.into());
        assert_eq!(HostValue::Struct(p), HostValue::Struct(q));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(HostValue::U8(200).as_i64(), Some(200));
        assert_eq!(HostValue::U64(u64::MAX).as_i64(), None);
        assert_eq!(HostValue::F32(1.5).as_f64(), Some(1.5));
    }
}
