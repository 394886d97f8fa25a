//! Embedding entry point
//!
//! A [`Host`] owns a script thread, the [`Marshaller`] for its realm and a
//! [`HostLoader`] feeding both. Modules loaded through the host are indexed
//! for projection as soon as they load, their extension methods are attached
//! on the script thread, and the root namespace is installed as a global.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use ferry_reflect::{MethodInfo, TypeDef, TypeUniverse};
use ferry_script::{DispatchStatsSnapshot, Dispatcher, Realm, ScriptThread, ScriptThreadBuilder, Value};
use tracing::{debug, warn};

use crate::config::{LoaderConfig, MarshalConfig};
use crate::error::MarshalResult;
use crate::loader::{HostLoader, ModuleHandle, ResolveRequest};
use crate::manifest::{ManifestReader, ModuleImage, ModuleReader, NativeBindings};
use crate::marshaller::{MarshalStatsSnapshot, Marshaller};

/// Builder for a [`Host`]
pub struct HostBuilder {
    marshal: MarshalConfig,
    loader: LoaderConfig,
    thread: ScriptThreadBuilder,
    universe: Option<Arc<TypeUniverse>>,
    reader: Option<Box<dyn ModuleReader>>,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self {
            marshal: MarshalConfig::default(),
            loader: LoaderConfig::default(),
            thread: ScriptThread::builder(),
            universe: None,
            reader: None,
        }
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marshal_config(mut self, config: MarshalConfig) -> Self {
        self.marshal = config;
        self
    }

    pub fn loader_config(mut self, config: LoaderConfig) -> Self {
        self.loader = config;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread = self.thread.name(name);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.thread = self.thread.queue_capacity(capacity);
        self
    }

    /// Share an existing universe; types already in it are projected too
    pub fn universe(mut self, universe: Arc<TypeUniverse>) -> Self {
        self.universe = Some(universe);
        self
    }

    pub fn reader(mut self, reader: impl ModuleReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Read JSON manifests with these native bodies
    pub fn bindings(self, bindings: NativeBindings) -> Self {
        self.reader(ManifestReader::new(bindings))
    }

    pub fn build(self) -> MarshalResult<Host> {
        let universe = self.universe.unwrap_or_default();
        let root = self.marshal.root_namespace.clone();
        let thread = self.thread.spawn()?;
        let marshaller = Marshaller::new(universe.clone(), self.marshal);
        let reader = self.reader.unwrap_or_else(|| Box::new(ManifestReader::default()));
        let loader = Arc::new(HostLoader::with_reader(self.loader, universe.clone(), reader));

        marshaller.register_types(&universe.types());
        let weak = marshaller.weak();
        let dispatcher = thread.dispatcher();
        loader.on_module_loaded(move |module| announce(&weak, &dispatcher, module));

        let existing = universe.extension_methods();
        let m = marshaller.clone();
        thread.dispatcher().run(move |realm| -> MarshalResult<()> {
            if !existing.is_empty() {
                m.register_extension_methods(realm, &existing);
            }
            let namespace = m.get_namespace(realm, "")?;
            realm.global().set(realm, &root, Value::Object(namespace))?;
            Ok(())
        })??;

        debug!(types = universe.len(), "host ready");
        Ok(Host {
            thread,
            marshaller,
            loader,
        })
    }
}

/// Index a freshly loaded module and attach its extension methods
fn announce(weak: &Weak<Marshaller>, dispatcher: &Dispatcher, module: &Arc<ModuleHandle>) {
    let Ok(m) = Marshaller::upgrade(weak) else {
        return;
    };
    m.register_types(&module.types);

    let extensions: Vec<(Arc<TypeDef>, MethodInfo)> = module
        .types
        .iter()
        .flat_map(|ty| {
            ty.methods
                .iter()
                .filter(|method| method.is_extension())
                .map(move |method| (ty.clone(), method.clone()))
        })
        .collect();
    if extensions.is_empty() {
        return;
    }
    let count = extensions.len();
    let posted = dispatcher.post(move |realm| m.register_extension_methods(realm, &extensions));
    if let Err(err) = posted {
        warn!(module = %module.name, count, %err, "could not attach extension methods");
    }
}

/// A script realm on its own thread, wired to a marshaller and a loader
pub struct Host {
    thread: ScriptThread,
    marshaller: Arc<Marshaller>,
    loader: Arc<HostLoader>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Host with default settings
    pub fn new() -> MarshalResult<Self> {
        HostBuilder::new().build()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.thread.dispatcher()
    }

    pub fn marshaller(&self) -> &Arc<Marshaller> {
        &self.marshaller
    }

    pub fn loader(&self) -> &Arc<HostLoader> {
        &self.loader
    }

    pub fn universe(&self) -> &Arc<TypeUniverse> {
        self.marshaller.universe_arc()
    }

    pub fn load_module(&self, path_or_name: &str) -> MarshalResult<Arc<ModuleHandle>> {
        self.loader.load_module(path_or_name)
    }

    pub fn register_module(&self, image: ModuleImage) -> MarshalResult<Arc<ModuleHandle>> {
        self.loader.register_module(image)
    }

    pub fn add_resolve_hook<F>(&self, hook: F)
    where
        F: Fn(&ResolveRequest) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.loader.add_resolve_hook(hook);
    }

    /// Run `f` on the script thread and wait for its result
    pub fn run<R, F>(&self, f: F) -> MarshalResult<R>
    where
        F: FnOnce(&Marshaller, &Realm) -> MarshalResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let m = self.marshaller.clone();
        self.thread.dispatcher().run(move |realm| f(&m, realm))?
    }

    /// Run `f` on the script thread without blocking the caller
    pub async fn run_async<R, F>(&self, f: F) -> MarshalResult<R>
    where
        F: FnOnce(&Marshaller, &Realm) -> MarshalResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let m = self.marshaller.clone();
        self.thread.dispatcher().run_async(move |realm| f(&m, realm)).await?
    }

    pub fn stats(&self) -> MarshalStatsSnapshot {
        self.marshaller.stats().snapshot()
    }

    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.thread.dispatcher().stats().snapshot()
    }

    /// Stop the script thread after the jobs already queued
    pub fn shutdown(self) {
        self.thread.shutdown();
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("dispatcher", &self.thread.dispatcher())
            .field("marshaller", &self.marshaller)
            .field("loader", &self.loader)
            .finish()
    }
}
