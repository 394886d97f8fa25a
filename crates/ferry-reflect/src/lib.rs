//! # Ferry Reflect
//!
//! The host-side type model used by the ferry marshalling engine:
//! - `TypeSig`: hashable structural type signatures with a text syntax
//! - `TypeDef` and member metadata with closure-backed bodies
//! - `HostValue` / `HostObject`: thread-safe host values and instances
//! - collection contracts and `HostFuture`
//! - `TypeUniverse`: the reflection provider

#![warn(clippy::all)]

pub mod builder;
pub mod collections;
pub mod error;
pub mod future;
pub mod sig;
pub mod types;
pub mod universe;
pub mod value;

pub use builder::TypeBuilder;
pub use collections::{HostIterable, HostList, HostMap, HostSet, VecList, VecMap, VecSet};
pub use error::{HostError, HostResult};
pub use future::{FutureStatus, HostFuture};
pub use sig::{CollectionKind, PrimitiveType, TypeSig};
pub use types::{
    CallContext, ConstructorInfo, FieldInfo, Invoker, MethodInfo, ParamInfo, PropertyInfo,
    TypeDef, TypeKind, attributes,
};
pub use universe::TypeUniverse;
pub use value::{
    EnumValue, HostInstance, HostObject, HostObjectRef, HostValue, StructValue, object_addr,
};
