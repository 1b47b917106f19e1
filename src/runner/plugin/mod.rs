//! Dynamic extension modules.
//!
//! A module is a shared library exporting one function named
//! [`PLUGIN_INIT_PROC_NAME`](crate::config::PLUGIN_INIT_PROC_NAME) with the
//! [`PluginInitFn`] signature. Loading a module by name:
//!
//! ```text
//! load_module("fs")
//!      ↓
//! 1. Already in the context's table? → return its exports
//! 2. Probe <search path>/fs<PLUGIN_SUFFIX> in order
//! 3. Open the library, resolve the entry point
//! 4. Call it with a PluginScope for the context's isolate
//! 5. Record { library, exports } under "fs"
//! ```
//!
//! Every failure before step 5 leaves the table untouched. An entry point that
//! returns `Err` is reported as [`ModuleError::Init`]: the library loaded fine
//! but the module refused to initialize.
//!
//! ## Unloading
//!
//! Scripts may hold values a module produced long after the context that
//! loaded it is gone, and function objects point into the library's code.
//! Whether a library is closed when its context is destroyed is therefore the
//! host's decision, expressed as an [`UnloadPolicy`]. The default keeps
//! libraries mapped.

pub mod entry;
pub mod loader;
pub mod table;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, info};

pub use crate::config::UnloadPolicy;
pub use entry::{PluginInitFn, PluginScope};
pub use loader::{DylibLoader, LibraryLoader, NativeLibrary};
pub use table::{DynamicModule, ModuleTable};

use crate::config::PLUGIN_INIT_PROC_NAME;
use crate::engine::{ContextId, Engine, EngineError, IsolateId, JsValue};
use crate::runner::handle::{Global, HandleScope};

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module `{name}` not found (searched {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("failed to load {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("{path:?} does not export `{symbol}`")]
    MissingEntryPoint { path: PathBuf, symbol: String },

    #[error("module `{name}` failed to initialize: {message}")]
    Init { name: String, message: String },

    #[error("context has been destroyed")]
    Inert,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ModuleError {
    /// The library loaded but its entry point reported a failure.
    pub fn is_init_failure(&self) -> bool {
        matches!(self, ModuleError::Init { .. })
    }
}

/// Module state shared between a context and its `require` helper.
pub(crate) struct ModuleHost {
    pub(crate) table: ModuleTable,
    pub(crate) search_paths: Vec<PathBuf>,
    pub(crate) loader: Rc<dyn LibraryLoader>,
    pub(crate) unload_policy: UnloadPolicy,
}

impl ModuleHost {
    pub(crate) fn new(
        search_paths: Vec<PathBuf>,
        loader: Rc<dyn LibraryLoader>,
        unload_policy: UnloadPolicy,
    ) -> Self {
        ModuleHost {
            table: ModuleTable::new(),
            search_paths,
            loader,
            unload_policy,
        }
    }
}

/// Load `name` into `context`, or return the exports it was loaded with before.
///
/// `host` is not borrowed while the module's entry point runs, so modules may
/// load other modules.
pub(crate) fn load(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    context: ContextId,
    host: &RefCell<ModuleHost>,
    name: &str,
) -> Result<JsValue, ModuleError> {
    let (loader, search_paths, policy) = {
        let host = host.borrow();
        if let Some(exports) = host.table.get(name).and_then(|m| m.exports()) {
            debug!(module = name, "module already loaded");
            return Ok(exports);
        }
        (
            host.loader.clone(),
            host.search_paths.clone(),
            host.unload_policy,
        )
    };

    let path = loader::resolve_module_path(&*loader, &search_paths, name)?;
    let library = loader.open(&path)?;
    let init = library.init_fn(PLUGIN_INIT_PROC_NAME)?;

    let outcome = {
        let _handles = HandleScope::new(&**engine, isolate)?;
        let mut scope = PluginScope::new(engine, isolate, context, name);
        init(&mut scope)
    };
    let exports = match outcome {
        Ok(v) => v,
        Err(message) => {
            // The module may already have handed code pointers to the engine.
            table::release_library(library, policy);
            return Err(ModuleError::Init {
                name: name.to_string(),
                message,
            });
        }
    };

    let handle = match Global::new(engine, isolate, exports.clone()) {
        Ok(h) => h,
        Err(e) => {
            table::release_library(library, policy);
            return Err(e.into());
        }
    };
    let record = DynamicModule::new(handle, path.clone(), library);
    let mut host = host.borrow_mut();
    if let Err(duplicate) = host.table.insert(name, record) {
        // Loaded re-entrantly while initializing; the first record wins.
        duplicate.finish(policy);
        if let Some(existing) = host.table.get(name).and_then(|m| m.exports()) {
            return Ok(existing);
        }
    }
    info!(module = name, path = ?path, "module loaded");
    Ok(exports)
}

/// Remove `name` from the table, release its exports and close its library.
pub(crate) fn unload(host: &RefCell<ModuleHost>, name: &str) -> bool {
    let record = host.borrow_mut().table.remove(name);
    match record {
        Some(module) => {
            module.finish(UnloadPolicy::Unload);
            info!(module = name, "module unloaded");
            true
        }
        None => false,
    }
}
