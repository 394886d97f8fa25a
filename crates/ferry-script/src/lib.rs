//! # Ferry Script
//!
//! The script-side object model used by the ferry marshalling engine:
//! - `Value` / `JsObject`: dynamically typed values, objects, arrays,
//!   native functions, promises and exotic objects
//! - `Realm`: the single-thread scope owning values, microtasks and
//!   persistent handles
//! - `JsRef` / `JsWeakRef`: `Send` references that resolve on the owner thread
//! - `Dispatcher` / `ScriptThread`: the synchronization context hopping work
//!   onto the realm's thread

#![warn(clippy::all)]

pub mod dispatch;
pub mod error;
pub mod object;
pub mod promise;
pub mod realm;
pub mod reference;
pub mod value;

pub use dispatch::{
    DispatchStats, DispatchStatsSnapshot, Dispatcher, ScriptThread, ScriptThreadBuilder,
};
pub use error::{Exception, ScriptError, ScriptResult};
pub use object::{
    ExoticObject, GetterFn, InternalSlot, JsObject, LazyResolver, NativeFunction, Property,
    SetterFn, WeakObject,
};
pub use promise::{JsPromise, PromiseState};
pub use realm::Realm;
pub use reference::{JsRef, JsWeakRef};
pub use value::{Value, ValueType, format_number};
