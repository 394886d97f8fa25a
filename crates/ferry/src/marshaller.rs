//! The marshalling engine
//!
//! [`Marshaller`] owns every cache of the engine: converters, overload
//! descriptors, interface proxies, the wrapper registry and the type graph
//! projector. It is shared as an `Arc`; closures installed in a realm hold a
//! `Weak` so that a realm never keeps the engine alive.
//!
//! # Example
//!
//! ```ignore
//! let universe = Arc::new(TypeUniverse::new());
//! let marshaller = Marshaller::new(universe, MarshalConfig::default());
//! let converter = marshaller.get_converter(&TypeSig::parse("List<int>")?)?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use ferry_reflect::{HostObjectRef, HostValue, MethodInfo, TypeDef, TypeKind, TypeSig, TypeUniverse};
use ferry_script::{JsObject, Realm, Value};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::config::MarshalConfig;
use crate::convert::Converter;
use crate::error::{MarshalError, MarshalResult};
use crate::overload::{MemberKind, OverloadCandidate, OverloadDescriptor};
use crate::projector::{Projector, prototype_of};
use crate::proxy::{InterfaceProxy, ProxyType};
use crate::registry::{ScriptObjectHandle, WrapperRegistry};

/// Engine counters; all atomic, readable at any time
#[derive(Debug, Default)]
pub struct MarshalStats {
    pub converters_built: AtomicU64,
    pub adapters_compiled: AtomicU64,
    pub proxies_built: AtomicU64,
    pub types_exported: AtomicU64,
    pub wrappers_created: AtomicU64,
}

impl MarshalStats {
    pub fn snapshot(&self) -> MarshalStatsSnapshot {
        MarshalStatsSnapshot {
            converters_built: self.converters_built.load(Ordering::Relaxed),
            adapters_compiled: self.adapters_compiled.load(Ordering::Relaxed),
            proxies_built: self.proxies_built.load(Ordering::Relaxed),
            types_exported: self.types_exported.load(Ordering::Relaxed),
            wrappers_created: self.wrappers_created.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`MarshalStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalStatsSnapshot {
    pub converters_built: u64,
    pub adapters_compiled: u64,
    pub proxies_built: u64,
    pub types_exported: u64,
    pub wrappers_created: u64,
}

type DescriptorKey = (Arc<str>, String, MemberKind);

/// Removes a signature from the in-progress set when its build ends
struct BuildingGuard<'a> {
    building: &'a DashSet<TypeSig>,
    sig: TypeSig,
}

impl<'a> BuildingGuard<'a> {
    fn enter(building: &'a DashSet<TypeSig>, sig: &TypeSig) -> Self {
        building.insert(sig.clone());
        Self {
            building,
            sig: sig.clone(),
        }
    }
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        self.building.remove(&self.sig);
    }
}

pub struct Marshaller {
    this: Weak<Marshaller>,
    universe: Arc<TypeUniverse>,
    config: MarshalConfig,
    converters: DashMap<TypeSig, Arc<OnceCell<Arc<Converter>>>>,
    building: DashSet<TypeSig>,
    descriptors: DashMap<DescriptorKey, Arc<OverloadDescriptor>>,
    proxies: DashMap<Arc<str>, Arc<ProxyType>>,
    wrappers: WrapperRegistry,
    projector: Projector,
    stats: MarshalStats,
}

impl Marshaller {
    pub fn new(universe: Arc<TypeUniverse>, config: MarshalConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            universe,
            config,
            converters: DashMap::new(),
            building: DashSet::new(),
            descriptors: DashMap::new(),
            proxies: DashMap::new(),
            wrappers: WrapperRegistry::new(),
            projector: Projector::new(),
            stats: MarshalStats::default(),
        })
    }

    /// Weak handle for closures installed in a realm
    pub fn weak(&self) -> Weak<Marshaller> {
        self.this.clone()
    }

    pub fn upgrade(weak: &Weak<Marshaller>) -> MarshalResult<Arc<Marshaller>> {
        weak.upgrade()
            .ok_or_else(|| MarshalError::ScopeClosed("marshaller has been dropped".to_string()))
    }

    pub fn universe(&self) -> &TypeUniverse {
        &self.universe
    }

    pub fn universe_arc(&self) -> &Arc<TypeUniverse> {
        &self.universe
    }

    pub fn config(&self) -> &MarshalConfig {
        &self.config
    }

    pub fn stats(&self) -> &MarshalStats {
        &self.stats
    }

    pub fn wrappers(&self) -> &WrapperRegistry {
        &self.wrappers
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    // ------------------------------------------------------------------
    // Conversion engine
    // ------------------------------------------------------------------

    /// Converter for `sig`, built on first request.
    ///
    /// Concurrent first requests build once; the others wait and adopt the
    /// result. Failures are not cached.
    pub fn get_converter(&self, sig: &TypeSig) -> MarshalResult<Arc<Converter>> {
        if let Some(cell) = self.converters.get(sig) {
            if let Some(converter) = cell.get() {
                return Ok(converter.clone());
            }
        }
        let cell = self.converters.entry(sig.clone()).or_default().clone();
        let result = cell
            .get_or_try_init(|| {
                let _guard = BuildingGuard::enter(&self.building, sig);
                let converter = Converter::build(self, sig)?;
                self.stats.converters_built.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(converter))
            })
            .cloned();
        if result.is_err() {
            self.converters.remove_if(sig, |_, cell| cell.get().is_none());
        }
        result
    }

    /// Whether a converter for `sig` is being built right now
    pub(crate) fn is_building(&self, sig: &TypeSig) -> bool {
        self.building.contains(sig)
    }

    /// Number of cached converters
    pub fn converter_count(&self) -> usize {
        self.converters.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub fn to_host(&self, realm: &Realm, sig: &TypeSig, value: &Value) -> MarshalResult<HostValue> {
        self.get_converter(sig)?.to_host(self, realm, value)
    }

    pub fn to_script(&self, realm: &Realm, sig: &TypeSig, value: &HostValue) -> MarshalResult<Value> {
        self.get_converter(sig)?.to_script(self, realm, value)
    }

    /// Script value for a host reference: the original script object for
    /// script-backed instances, otherwise the registry projection
    pub fn object_to_script(&self, realm: &Realm, object: &HostObjectRef) -> MarshalResult<Value> {
        let any = object.as_any();
        if let Some(handle) = any.downcast_ref::<ScriptObjectHandle>() {
            if handle.target().realm_id() == realm.id() {
                return Ok(handle.target().get(realm)?);
            }
        }
        if let Some(proxy) = any.downcast_ref::<InterfaceProxy>() {
            if proxy.target().realm_id() == realm.id() {
                return Ok(proxy.target().get(realm)?);
            }
        }
        let ty = object.type_def();
        let (projection, created) = self
            .wrappers
            .wrap_or_reuse(realm, object, || self.prototype_for(realm, &ty))?;
        if created {
            self.stats.wrappers_created.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Value::Object(projection))
    }

    fn prototype_for(&self, realm: &Realm, ty: &Arc<TypeDef>) -> Option<JsObject> {
        if ty.has_attribute(ferry_reflect::attributes::SCRIPT_HIDDEN) {
            return None;
        }
        match self.projector.get_or_export_type(self, realm, &ty.sig(), false) {
            Ok(projection) => prototype_of(&projection),
            Err(err) => {
                debug!(ty = %ty.full_name, %err, "projection without prototype");
                None
            }
        }
    }

    /// Drop registry entries whose projection or instance is gone
    pub fn sweep(&self, realm: &Realm) -> usize {
        self.wrappers.sweep(realm)
    }

    // ------------------------------------------------------------------
    // Overloads
    // ------------------------------------------------------------------

    /// Descriptor for the members `name` of `ty`, cached per kind
    pub fn descriptor(&self, ty: &Arc<TypeDef>, name: &str, kind: MemberKind) -> MarshalResult<Arc<OverloadDescriptor>> {
        let key = (ty.full_name.clone(), name.to_string(), kind);
        if let Some(existing) = self.descriptors.get(&key) {
            return Ok(existing.clone());
        }

        let candidates: Vec<OverloadCandidate> = match kind {
            MemberKind::Method => self
                .universe
                .find_methods(ty, name)
                .into_iter()
                .filter(|(_, method)| !method.is_static)
                .map(|(owner, method)| OverloadCandidate::method(owner, method))
                .collect(),
            MemberKind::StaticMethod => ty
                .methods_named(name)
                .filter(|method| method.is_static && !method.is_extension())
                .map(|method| OverloadCandidate::method(ty.clone(), method.clone()))
                .collect(),
            MemberKind::Constructor => ty
                .constructors
                .iter()
                .map(|ctor| OverloadCandidate::constructor(ty.clone(), ctor.clone()))
                .collect(),
            MemberKind::Extension => self.projector.extension_candidates(&ty.full_name, name),
        };
        if candidates.is_empty() {
            return Err(MarshalError::Host(ferry_reflect::HostError::missing_member(
                ty.full_name.to_string(),
                name,
            )));
        }

        let descriptor = Arc::new(OverloadDescriptor::build(ty.full_name.clone(), name, candidates));
        debug!(ty = %ty.full_name, member = name, ?kind, "built overload descriptor");
        Ok(self.descriptors.entry(key).or_insert(descriptor).clone())
    }

    pub(crate) fn invalidate_descriptor(&self, ty: &str, name: &str, kind: MemberKind) {
        self.descriptors.remove(&(Arc::from(ty), name.to_string(), kind));
    }

    // ------------------------------------------------------------------
    // Interface proxies
    // ------------------------------------------------------------------

    /// Proxy type implementing the interface `sig`, built once.
    ///
    /// The skeleton enters the cache before its dispatch table is bound and
    /// leaves it again if binding fails.
    pub fn implement(&self, sig: &TypeSig) -> MarshalResult<Arc<ProxyType>> {
        let interface = self
            .universe
            .resolve(sig)
            .map_err(|e| MarshalError::unsupported(format!("{} ({})", sig, e)))?;
        if !matches!(interface.kind, TypeKind::Interface) {
            return Err(MarshalError::type_mismatch("interface", interface.full_name.to_string()));
        }

        let (proxy, fresh) = match self.proxies.entry(interface.full_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => (existing.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let skeleton = Arc::new(ProxyType::skeleton(interface.clone(), self.weak()));
                vacant.insert(skeleton.clone());
                (skeleton, true)
            }
        };
        if !fresh {
            // The builder sees its own skeleton; recursion stops there.
            if !proxy.is_builder_thread() {
                proxy.wait_bound()?;
            }
            return Ok(proxy);
        }

        if let Err(err) = proxy.bind(self) {
            self.proxies.remove(&interface.full_name);
            return Err(err);
        }
        self.stats.proxies_built.fetch_add(1, Ordering::Relaxed);
        Ok(proxy)
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    pub fn get_or_export_type(&self, realm: &Realm, sig: &TypeSig, eager: bool) -> MarshalResult<JsObject> {
        self.projector.get_or_export_type(self, realm, sig, eager)
    }

    pub fn get_namespace(&self, realm: &Realm, path: &str) -> MarshalResult<JsObject> {
        self.projector.get_namespace(self, realm, path)
    }

    pub fn register_types(&self, types: &[Arc<TypeDef>]) {
        self.projector.register_types(types);
    }

    pub fn register_extension_methods(&self, realm: &Realm, methods: &[(Arc<TypeDef>, MethodInfo)]) {
        self.projector.register_extension_methods(self, realm, methods);
    }
}

impl std::fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaller")
            .field("config", &self.config)
            .field("converters", &self.converters.len())
            .field("wrappers", &self.wrappers.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
