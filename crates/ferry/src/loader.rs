//! Host module loader
//!
//! Loads module images into the shared [`TypeUniverse`] and announces each
//! loaded module to listeners. Loading is idempotent per canonical path and
//! per simple name.
//!
//! A dependency `name` is located by, in order:
//! 1. modules already loaded (or registered in memory) under that name
//! 2. `<name><suffix>` in each of [`LoaderConfig::probe_dirs`]
//! 3. registered resolution hooks
//! 4. the directory of the module currently loading
//!
//! and raises [`MarshalError::ModuleNotFound`] when every step misses.
//! Reference cycles are skipped; the loader never waits for types to become
//! ready in any realm.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferry_reflect::{TypeDef, TypeUniverse};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::config::LoaderConfig;
use crate::error::{MarshalError, MarshalResult};
use crate::manifest::{ManifestReader, ModuleImage, ModuleReader};

/// A dependency the default probing could not find
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Simple name of the missing module
    pub name: String,
    /// Module that references it, when loading a dependency
    pub requester: Option<String>,
    pub requester_dir: Option<PathBuf>,
}

/// Maps a missing module to a manifest path
pub type ResolveHook = Arc<dyn Fn(&ResolveRequest) -> Option<PathBuf> + Send + Sync>;

/// Called once per newly loaded module
pub type ModuleListener = Arc<dyn Fn(&Arc<ModuleHandle>) + Send + Sync>;

/// A loaded module
#[derive(Debug)]
pub struct ModuleHandle {
    pub name: String,
    pub version: Option<String>,
    /// Canonical manifest path; `None` for in-memory modules
    pub path: Option<PathBuf>,
    pub references: Vec<String>,
    pub types: Vec<Arc<TypeDef>>,
}

/// One module on the loading stack
struct Frame {
    name: String,
    dir: Option<PathBuf>,
}

pub struct HostLoader {
    config: LoaderConfig,
    universe: Arc<TypeUniverse>,
    reader: Box<dyn ModuleReader>,
    by_name: DashMap<String, Arc<ModuleHandle>>,
    by_path: DashMap<PathBuf, Arc<ModuleHandle>>,
    hooks: RwLock<Vec<ResolveHook>>,
    listeners: RwLock<Vec<ModuleListener>>,
}

impl HostLoader {
    /// Loader reading JSON manifests without native bindings
    pub fn new(config: LoaderConfig, universe: Arc<TypeUniverse>) -> Self {
        Self::with_reader(config, universe, Box::new(ManifestReader::default()))
    }

    pub fn with_reader(config: LoaderConfig, universe: Arc<TypeUniverse>, reader: Box<dyn ModuleReader>) -> Self {
        Self {
            config,
            universe,
            reader,
            by_name: DashMap::new(),
            by_path: DashMap::new(),
            hooks: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn universe(&self) -> &Arc<TypeUniverse> {
        &self.universe
    }

    pub fn add_resolve_hook<F>(&self, hook: F)
    where
        F: Fn(&ResolveRequest) -> Option<PathBuf> + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Register a listener; it sees modules loaded from now on
    pub fn on_module_loaded<F>(&self, listener: F)
    where
        F: Fn(&Arc<ModuleHandle>) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn module(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        self.by_name.get(name).map(|m| m.clone())
    }

    pub fn modules(&self) -> Vec<Arc<ModuleHandle>> {
        let mut modules: Vec<_> = self.by_name.iter().map(|m| m.value().clone()).collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    /// Load a module by manifest path or by simple name
    pub fn load_module(&self, path_or_name: &str) -> MarshalResult<Arc<ModuleHandle>> {
        let mut stack = Vec::new();
        if self.looks_like_path(path_or_name) {
            let path = Path::new(path_or_name);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.config.base_dir.join(path)
            };
            if !path.is_file() {
                return Err(MarshalError::ModuleNotFound {
                    name: path_or_name.to_string(),
                    requester: None,
                });
            }
            self.load_path(&path, &mut stack)
        } else {
            self.load_named(path_or_name, &mut stack)
        }
    }

    /// Register an in-memory module image; its references load as usual
    pub fn register_module(&self, image: ModuleImage) -> MarshalResult<Arc<ModuleHandle>> {
        if let Some(existing) = self.module(&image.name) {
            return Ok(existing);
        }
        let mut stack = vec![Frame {
            name: image.name.clone(),
            dir: None,
        }];
        self.load_references(&image, &mut stack)?;
        Ok(self.install(image, None))
    }

    fn looks_like_path(&self, text: &str) -> bool {
        text.contains('/') || text.contains('\\') || text.ends_with(&self.config.manifest_suffix)
    }

    fn load_named(&self, name: &str, stack: &mut Vec<Frame>) -> MarshalResult<Arc<ModuleHandle>> {
        if let Some(existing) = self.module(name) {
            return Ok(existing);
        }

        let file_name = self.config.manifest_file_name(name);
        for dir in self.config.probe_dirs() {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return self.load_path(&candidate, stack);
            }
        }

        let request = ResolveRequest {
            name: name.to_string(),
            requester: stack.last().map(|f| f.name.clone()),
            requester_dir: stack.last().and_then(|f| f.dir.clone()),
        };
        trace!(module = name, requester = ?request.requester, "default probing missed");

        let hooks = self.hooks.read().clone();
        for hook in hooks {
            if let Some(candidate) = hook(&request) {
                if candidate.is_file() {
                    debug!(module = name, path = %candidate.display(), "resolved by hook");
                    return self.load_path(&candidate, stack);
                }
            }
        }

        if self.config.probe_requester_dir {
            if let Some(dir) = &request.requester_dir {
                let candidate = dir.join(&file_name);
                if candidate.is_file() {
                    debug!(module = name, path = %candidate.display(), "resolved next to requester");
                    return self.load_path(&candidate, stack);
                }
            }
        }

        Err(MarshalError::ModuleNotFound {
            name: name.to_string(),
            requester: request.requester,
        })
    }

    fn load_path(&self, path: &Path, stack: &mut Vec<Frame>) -> MarshalResult<Arc<ModuleHandle>> {
        let canonical = std::fs::canonicalize(path)?;
        if let Some(existing) = self.by_path.get(&canonical) {
            return Ok(existing.clone());
        }

        let image = self.reader.read(&canonical)?;
        if let Some(existing) = self.module(&image.name) {
            return Ok(existing);
        }

        stack.push(Frame {
            name: image.name.clone(),
            dir: canonical.parent().map(Path::to_path_buf),
        });
        let references = self.load_references(&image, stack);
        stack.pop();
        references?;

        Ok(self.install(image, Some(canonical)))
    }

    fn load_references(&self, image: &ModuleImage, stack: &mut Vec<Frame>) -> MarshalResult<()> {
        for reference in &image.references {
            if stack.iter().any(|f| &f.name == reference) {
                trace!(module = %image.name, reference = %reference, "skipping reference cycle");
                continue;
            }
            self.load_named(reference, stack).inspect_err(|err| {
                warn!(module = %image.name, reference = %reference, %err, "unresolved module reference");
            })?;
        }
        Ok(())
    }

    fn install(&self, image: ModuleImage, path: Option<PathBuf>) -> Arc<ModuleHandle> {
        let handle = match self.by_name.entry(image.name.clone()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(vacant) => {
                let types = image
                    .types
                    .into_iter()
                    .map(|mut ty| {
                        ty.module.get_or_insert_with(|| image.name.clone());
                        self.universe.register(ty)
                    })
                    .collect();
                let handle = Arc::new(ModuleHandle {
                    name: image.name,
                    version: image.version,
                    path,
                    references: image.references,
                    types,
                });
                vacant.insert(handle.clone());
                handle
            }
        };
        if let Some(path) = &handle.path {
            self.by_path.insert(path.clone(), handle.clone());
        }
        debug!(module = %handle.name, types = handle.types.len(), "loaded host module");

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(&handle);
        }
        handle
    }
}

impl std::fmt::Debug for HostLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoader")
            .field("config", &self.config)
            .field("modules", &self.by_name.len())
            .finish()
    }
}
