//! Object wrapper registry
//!
//! Maps host reference instances to their script projections so that the
//! same instance always crosses as the same script object. The registry is
//! weak on both sides: the projection's internal slot holds the only strong
//! reference to the host instance, and the registry keeps a `Weak` of the
//! instance plus a realm weak slot for the projection.
//!
//! Stale entries (dead projection or reused address) are replaced on lookup
//! and removed in bulk by [`WrapperRegistry::sweep`].

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferry_reflect::{HostObject, HostObjectRef, HostResult, HostValue, TypeDef, TypeKind, object_addr};
use ferry_script::{JsObject, JsRef, JsWeakRef, Realm, Value};
use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::MarshalResult;

/// Internal slot payload of a projection: the host value it stands for
#[derive(Clone)]
pub struct HostSlot(pub HostValue);

struct WrapperEntry {
    host: Weak<dyn HostObject>,
    projection: JsWeakRef,
}

impl WrapperEntry {
    fn live_projection(&self, realm: &Realm, instance: &HostObjectRef) -> MarshalResult<Option<JsObject>> {
        match self.host.upgrade() {
            Some(host) if Arc::ptr_eq(&host, instance) => Ok(self.projection.get(realm)?),
            _ => Ok(None),
        }
    }
}

/// Identity map between host instances and script projections
#[derive(Default)]
pub struct WrapperRegistry {
    entries: DashMap<(u64, usize), WrapperEntry>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Projection of `instance` in `realm`, creating it on first use.
    ///
    /// `prototype` is only evaluated when a new projection is built. The
    /// returned flag is `true` when this call created the projection.
    pub fn wrap_or_reuse(
        &self,
        realm: &Realm,
        instance: &HostObjectRef,
        prototype: impl FnOnce() -> Option<JsObject>,
    ) -> MarshalResult<(JsObject, bool)> {
        let key = (realm.id(), object_addr(instance));
        if let Some(entry) = self.entries.get(&key) {
            if let Some(existing) = entry.live_projection(realm, instance)? {
                return Ok((existing, false));
            }
        }

        let projection = realm.create_external(
            Arc::new(HostSlot(HostValue::Object(instance.clone()))),
            prototype(),
        );
        let entry = WrapperEntry {
            host: Arc::downgrade(instance),
            projection: realm.persist_weak(&projection),
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(winner) = occupied.get().live_projection(realm, instance)? {
                    return Ok((winner, false));
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        trace!(
            realm = realm.id(),
            ty = %instance.type_def().full_name,
            "created projection"
        );
        Ok((projection, true))
    }

    /// The host value a projection stands for, if `value` is one
    pub fn try_unwrap(&self, value: &Value) -> Option<HostValue> {
        unwrap_slot(value)
    }

    /// Remove entries whose projection or instance is gone; returns the
    /// number removed
    pub fn sweep(&self, realm: &Realm) -> usize {
        let before = self.entries.len();
        let realm_id = realm.id();
        self.entries.retain(|(owner, _), entry| {
            *owner != realm_id
                || (entry.host.strong_count() > 0 && matches!(entry.projection.get(realm), Ok(Some(_))))
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host value stored in the internal slot of a script object
pub fn unwrap_slot(value: &Value) -> Option<HostValue> {
    let object = value.as_object()?;
    object.internal_as::<HostSlot>().map(|slot| slot.0.clone())
}

static SCRIPT_OBJECT_TYPE: Lazy<Arc<TypeDef>> =
    Lazy::new(|| Arc::new(TypeDef::new("ferry.ScriptObject", TypeKind::Class)));

/// A script object held by the host as an opaque `object`.
///
/// Converting the handle back to the script side yields the original object.
pub struct ScriptObjectHandle {
    target: JsRef,
}

impl ScriptObjectHandle {
    pub fn new(target: JsRef) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &JsRef {
        &self.target
    }

    /// Type of every script object handle
    pub fn type_def_static() -> Arc<TypeDef> {
        SCRIPT_OBJECT_TYPE.clone()
    }
}

impl HostObject for ScriptObjectHandle {
    fn type_def(&self) -> Arc<TypeDef> {
        SCRIPT_OBJECT_TYPE.clone()
    }

    fn get_field(&self, name: &str) -> HostResult<HostValue> {
        Err(ferry_reflect::HostError::not_supported(format!(
            "reading '{}' of a script object from the host",
            name
        )))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
