//! # Ferry
//!
//! Bidirectional value marshalling between a single-threaded script realm
//! (`ferry-script`) and a reflective, multi-threaded host runtime
//! (`ferry-reflect`).
//!
//! - **Conversion engine**: per-type converters classified by [`Shape`],
//!   compiled to a [`Plan`] and cached concurrently
//! - **Wrapper registry**: identity-preserving projections of host instances
//! - **Overload resolution**: three-tier matching with ambiguity detection
//! - **Type projection**: lazy namespaces, constructors, enums and generic
//!   makers inside the realm
//! - **Interface proxies**: host implementations of interfaces backed by
//!   script objects, callable from any thread
//! - **Host loader**: JSON module manifests with dependency resolution
//!
//! # Example
//!
//! ```ignore
//! use ferry::{Host, LoaderConfig};
//!
//! let host = Host::builder()
//!     .loader_config(LoaderConfig::new("./modules"))
//!     .build()?;
//! host.load_module("Contoso.Geometry")?;
//!
//! let area = host.run(|m, realm| {
//!     let point = m.get_namespace(realm, "Contoso.Geometry")?;
//!     // ...
//!     Ok(())
//! })?;
//! ```

#![warn(clippy::all)]

pub mod collections;
pub mod config;
pub mod convert;
pub mod error;
pub mod future;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod marshaller;
pub mod overload;
pub mod plan;
pub mod projector;
pub mod proxy;
pub mod registry;
pub mod shape;

pub use collections::{ScriptArrayAdapter, ScriptMapAdapter};
pub use config::{LoaderConfig, MarshalConfig, MemberNaming};
pub use convert::{Converter, infer_to_host, infer_to_script};
pub use error::{MarshalError, MarshalResult};
pub use host::{Host, HostBuilder};
pub use loader::{HostLoader, ModuleHandle, ModuleListener, ResolveHook, ResolveRequest};
pub use manifest::{ManifestReader, ModuleImage, ModuleReader, NativeBindings};
pub use marshaller::{MarshalStats, MarshalStatsSnapshot, Marshaller};
pub use overload::{MatchLevel, MemberKind, OverloadCandidate, OverloadDescriptor};
pub use plan::{FieldPlan, Plan, PlanPrinter, PlanVisitor};
pub use projector::{Projector, TypeNode, TypeSlot};
pub use proxy::{InterfaceProxy, ProxyState, ProxyType, Thunk};
pub use registry::{HostSlot, ScriptObjectHandle, WrapperRegistry, unwrap_slot};
pub use shape::Shape;

pub use ferry_reflect;
pub use ferry_script;
