//! Interface proxies
//!
//! A [`ProxyType`] is the synthesized host implementation of one interface
//! over script objects: a dispatch table from member signature to a
//! forwarding [`Thunk`]. Instances ([`InterfaceProxy`]) hold a persistent
//! reference to their script object and forward every call through the
//! realm's [`Dispatcher`], so host code may call them from any thread.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use ferry_reflect::{HostError, HostObject, HostObjectRef, HostResult, HostValue, TypeDef, TypeSig, attributes};
use ferry_script::{Dispatcher, JsRef, Value};
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::error::{MarshalError, MarshalResult};
use crate::marshaller::Marshaller;

/// Build progress of a proxy type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    Unbuilt = 0,
    /// Skeleton registered, dispatch table not yet bound
    Building = 1,
    Built = 2,
    Ready = 3,
}

impl ProxyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProxyState::Building,
            2 => ProxyState::Built,
            3 => ProxyState::Ready,
            _ => ProxyState::Unbuilt,
        }
    }
}

/// Forwarding operation for one interface member
#[derive(Debug, Clone)]
pub enum Thunk {
    Method {
        script_name: String,
        params: Vec<TypeSig>,
        returns: TypeSig,
    },
    Getter {
        script_name: String,
        ty: TypeSig,
    },
    Setter {
        script_name: String,
        ty: TypeSig,
    },
}

/// Synthesized implementation of one host interface
///
/// Only the building thread may observe the skeleton before its table is
/// bound; every other thread waits for the build outcome.
pub struct ProxyType {
    interface: Arc<TypeDef>,
    state: AtomicU8,
    thunks: OnceCell<HashMap<String, Thunk>>,
    builder: ThreadId,
    /// Set once binding finishes; failures keep their message
    outcome: OnceCell<Result<(), String>>,
    marshaller: Weak<Marshaller>,
}

/// Releases waiters if binding unwinds
struct AbandonOnUnwind<'a>(&'a OnceCell<Result<(), String>>);

impl Drop for AbandonOnUnwind<'_> {
    fn drop(&mut self) {
        let _ = self.0.set(Err("proxy build did not complete".to_string()));
    }
}

impl ProxyType {
    /// Unbound proxy, registered in the cache before its table is built
    pub(crate) fn skeleton(interface: Arc<TypeDef>, marshaller: Weak<Marshaller>) -> Self {
        Self {
            interface,
            state: AtomicU8::new(ProxyState::Building as u8),
            thunks: OnceCell::new(),
            builder: std::thread::current().id(),
            outcome: OnceCell::new(),
            marshaller,
        }
    }

    pub fn interface(&self) -> &Arc<TypeDef> {
        &self.interface
    }

    pub fn state(&self) -> ProxyState {
        ProxyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the caller is the thread binding this proxy
    pub(crate) fn is_builder_thread(&self) -> bool {
        std::thread::current().id() == self.builder
    }

    /// Block until the dispatch table is bound, adopting the builder's result
    pub(crate) fn wait_bound(&self) -> MarshalResult<()> {
        match self.outcome.wait() {
            Ok(()) => Ok(()),
            Err(reason) => Err(MarshalError::unsupported(format!(
                "{} ({})",
                self.interface.full_name, reason
            ))),
        }
    }

    /// Signatures of the members this proxy forwards
    pub fn members(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .thunks
            .get()
            .map(|t| t.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Bind the dispatch table for the interface and its base interfaces
    pub(crate) fn bind(&self, m: &Marshaller) -> MarshalResult<()> {
        let _unwind = AbandonOnUnwind(&self.outcome);
        match self.build_table(m) {
            Ok(thunks) => {
                let count = thunks.len();
                let _ = self.thunks.set(thunks);
                self.state.store(ProxyState::Built as u8, Ordering::Release);
                self.state.store(ProxyState::Ready as u8, Ordering::Release);
                let _ = self.outcome.set(Ok(()));
                debug!(interface = %self.interface.full_name, members = count, "built interface proxy");
                Ok(())
            }
            Err(err) => {
                let _ = self.outcome.set(Err(err.to_string()));
                Err(err)
            }
        }
    }

    fn build_table(&self, m: &Marshaller) -> MarshalResult<HashMap<String, Thunk>> {
        let universe = m.universe();
        let mut owners = vec![self.interface.clone()];
        owners.extend(universe.supertypes(&self.interface));

        let mut thunks = HashMap::new();
        for owner in owners.iter().filter(|t| t.is_interface()) {
            for method in owner.methods.iter().filter(|m| !m.has_attribute(attributes::SCRIPT_HIDDEN)) {
                let signature = method.signature();
                if thunks.contains_key(&signature) {
                    continue;
                }
                for ty in method.params.iter().map(|p| &p.ty).chain([&method.returns]) {
                    m.get_converter(ty).map_err(|cause| {
                        MarshalError::member_failure(self.interface.full_name.to_string(), signature.clone(), cause)
                    })?;
                }
                thunks.insert(
                    signature,
                    Thunk::Method {
                        script_name: m.config().script_name(&method.name),
                        params: method.params.iter().map(|p| p.ty.clone()).collect(),
                        returns: method.returns.clone(),
                    },
                );
            }
            for property in owner
                .properties
                .iter()
                .filter(|p| !p.is_static && !p.attributes.iter().any(|a| a == attributes::SCRIPT_HIDDEN))
            {
                m.get_converter(&property.ty).map_err(|cause| {
                    MarshalError::member_failure(self.interface.full_name.to_string(), property.name.clone(), cause)
                })?;
                let script_name = m.config().script_name(&property.name);
                thunks.entry(format!("get_{}", property.name)).or_insert(Thunk::Getter {
                    script_name: script_name.clone(),
                    ty: property.ty.clone(),
                });
                if !property.readonly {
                    thunks.entry(format!("set_{}", property.name)).or_insert(Thunk::Setter {
                        script_name,
                        ty: property.ty.clone(),
                    });
                }
            }
        }

        Ok(thunks)
    }

    /// Host instance of the interface backed by `target`
    pub fn instantiate(self: &Arc<Self>, target: JsRef, dispatcher: Dispatcher) -> HostObjectRef {
        Arc::new(InterfaceProxy {
            proxy: self.clone(),
            target,
            dispatcher,
        })
    }

    fn thunk(&self, key: &str) -> HostResult<&Thunk> {
        if self.thunks.get().is_none() && !self.is_builder_thread() {
            self.wait_bound()?;
        }
        self.thunks
            .get()
            .and_then(|t| t.get(key))
            .ok_or_else(|| HostError::missing_member(self.interface.full_name.to_string(), key))
    }
}

/// Host instance of an interface implemented by a script object
pub struct InterfaceProxy {
    proxy: Arc<ProxyType>,
    target: JsRef,
    dispatcher: Dispatcher,
}

impl InterfaceProxy {
    /// The script object this proxy forwards to
    pub fn target(&self) -> &JsRef {
        &self.target
    }

    /// Run one thunk on the script thread
    fn forward(&self, key: &str, args: Vec<HostValue>) -> HostResult<HostValue> {
        let thunk = self.proxy.thunk(key)?.clone();
        let m = Marshaller::upgrade(&self.proxy.marshaller)?;
        let target = self.target.clone();
        let frame = format!("{}.{}", self.proxy.interface.full_name, key);
        trace!(interface = %self.proxy.interface.full_name, member = key, "proxy call");

        let outcome = self
            .dispatcher
            .run(move |realm| -> MarshalResult<HostValue> {
                let object = target.object(realm)?;
                match thunk {
                    Thunk::Method {
                        script_name,
                        params,
                        returns,
                    } => {
                        let function = object.get(realm, &script_name)?;
                        let function = function
                            .as_object()
                            .filter(|f| f.is_function())
                            .ok_or_else(|| MarshalError::Host(HostError::missing_member("script object", &script_name)))?;
                        let script_args = params
                            .iter()
                            .zip(&args)
                            .map(|(sig, arg)| m.to_script(realm, sig, arg))
                            .collect::<MarshalResult<Vec<_>>>()?;
                        let result = function.call(realm, &Value::Object(object.clone()), &script_args)?;
                        m.to_host(realm, &returns, &result)
                    }
                    Thunk::Getter { script_name, ty } => {
                        let value = object.get(realm, &script_name)?;
                        m.to_host(realm, &ty, &value)
                    }
                    Thunk::Setter { script_name, ty } => {
                        let value = args.into_iter().next().unwrap_or(HostValue::Null);
                        object.set(realm, &script_name, m.to_script(realm, &ty, &value)?)?;
                        Ok(HostValue::Null)
                    }
                }
            })
            .map_err(MarshalError::from)?;

        outcome.map_err(|err| match err {
            MarshalError::Script(script) => HostError::from(MarshalError::Script(script.with_frame(frame))),
            other => HostError::from(other),
        })
    }
}

impl HostObject for InterfaceProxy {
    fn type_def(&self) -> Arc<TypeDef> {
        self.proxy.interface.clone()
    }

    fn get_field(&self, name: &str) -> HostResult<HostValue> {
        self.get_property(name)
    }

    fn set_field(&self, name: &str, value: HostValue) -> HostResult<()> {
        self.set_property(name, value)
    }

    fn get_property(&self, name: &str) -> HostResult<HostValue> {
        self.forward(&format!("get_{}", name), Vec::new())
    }

    fn set_property(&self, name: &str, value: HostValue) -> HostResult<()> {
        self.forward(&format!("set_{}", name), vec![value]).map(|_| ())
    }

    fn invoke(&self, signature: &str, args: &[HostValue]) -> HostResult<HostValue> {
        self.forward(signature, args.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
