//! Execution contexts.
//!
//! A [`Context`] is a global-binding scope inside one isolate plus the
//! extension modules loaded into it. It either owns its isolate (created on
//! construction, disposed on destruction) or borrows one the host created.
//!
//! ## Teardown order
//!
//! Destruction happens exactly once, explicitly through [`Context::destroy`]
//! or on drop, and always in this order:
//!
//! ```text
//! 1. inert?                     → nothing to do
//! 2. class registry cleanup     (drops durable refs into the scope's values)
//! 3. exit the context           (only if it was entered on construction)
//! 4. release the scope ref, then every module's exports ref
//! 5. exit + dispose the isolate (only if owned)
//! 6. module libraries           → retained or closed per UnloadPolicy
//! ```
//!
//! ## Moving out
//!
//! `std::mem::take(&mut ctx)` (or [`Context::take`]) moves the whole state
//! into a new value and leaves the source inert; destroying an inert context
//! does nothing.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ModuleConfig, UnloadPolicy};
use crate::engine::{
    ArrayBufferAllocator, ContextId, Engine, EngineError, IsolateId, JsValue, ObjectId,
    ObjectTemplate, ScriptError,
};
use crate::runner::class_registry;
use crate::runner::globals;
use crate::runner::handle::{Global, HandleScope};
use crate::runner::isolate::{Isolate, IsolateScope};
use crate::runner::module::Module;
use crate::runner::plugin::{self, DylibLoader, LibraryLoader, ModuleError, ModuleHost};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context has been destroyed")]
    Inert,

    #[error("failed to read script {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Construction options for [`Context::new`].
#[derive(Clone)]
pub struct ContextOptions {
    /// Borrow this isolate instead of creating one.
    pub isolate: Option<IsolateId>,
    /// Allocator for a newly created isolate. Ignored when borrowing.
    pub allocator: Option<Arc<dyn ArrayBufferAllocator>>,
    /// Install `require` and `run` in the global object.
    pub add_default_global_methods: bool,
    /// Make the new context the isolate's current context until destruction.
    pub enter_context: bool,
    /// Template for the global object; empty when `None`.
    pub global: Option<ObjectTemplate>,
    /// Directories probed for extension modules, in order.
    pub search_paths: Vec<PathBuf>,
    /// Dynamic library loader; the platform linker when `None`.
    pub loader: Option<Rc<dyn LibraryLoader>>,
    pub unload_policy: UnloadPolicy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            isolate: None,
            allocator: None,
            add_default_global_methods: true,
            enter_context: true,
            global: None,
            search_paths: Vec::new(),
            loader: None,
            unload_policy: UnloadPolicy::Retain,
        }
    }
}

impl ContextOptions {
    pub fn new() -> Self {
        ContextOptions::default()
    }

    /// Options taken from the `[context]` and `[modules]` sections of a config.
    pub fn from_config(config: &ModuleConfig) -> Self {
        ContextOptions {
            add_default_global_methods: config.context.default_globals,
            enter_context: config.context.enter,
            search_paths: config.modules.search_path.clone(),
            unload_policy: config.modules.unload,
            ..ContextOptions::default()
        }
    }

    pub fn with_isolate(mut self, isolate: IsolateId) -> Self {
        self.isolate = Some(isolate);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn ArrayBufferAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn default_global_methods(mut self, install: bool) -> Self {
        self.add_default_global_methods = install;
        self
    }

    pub fn enter(mut self, enter: bool) -> Self {
        self.enter_context = enter;
        self
    }

    pub fn with_global(mut self, global: ObjectTemplate) -> Self {
        self.global = Some(global);
        self
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_loader(mut self, loader: Rc<dyn LibraryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn unload_policy(mut self, policy: UnloadPolicy) -> Self {
        self.unload_policy = policy;
        self
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("isolate", &self.isolate)
            .field("add_default_global_methods", &self.add_default_global_methods)
            .field("enter_context", &self.enter_context)
            .field("search_paths", &self.search_paths)
            .field("unload_policy", &self.unload_policy)
            .finish_non_exhaustive()
    }
}

struct ActiveContext {
    scope: Global<ContextId>,
    id: ContextId,
    entered: bool,
    modules: Rc<RefCell<ModuleHost>>,
    isolate: Isolate,
}

impl ActiveContext {
    fn engine(&self) -> &Rc<dyn Engine> {
        self.isolate.engine()
    }

    fn global_object(&self) -> Result<ObjectId, EngineError> {
        let context = self
            .scope
            .get()
            .ok_or(EngineError::UnknownContext { context: self.id })?;
        self.engine().global_object(self.isolate.id(), context)
    }
}

/// Exits a context entered during construction unless construction completes.
struct EnteredContext<'a> {
    engine: &'a dyn Engine,
    isolate: IsolateId,
    context: ContextId,
}

impl<'a> EnteredContext<'a> {
    fn enter(
        engine: &'a dyn Engine,
        isolate: IsolateId,
        context: ContextId,
    ) -> Result<Self, EngineError> {
        engine.enter_context(isolate, context)?;
        Ok(EnteredContext {
            engine,
            isolate,
            context,
        })
    }

    /// Leave the context entered; `Context::destroy` exits it.
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl<'a> Drop for EnteredContext<'a> {
    fn drop(&mut self) {
        self.engine.exit_context(self.isolate, self.context);
    }
}

enum ContextState {
    Active(ActiveContext),
    Inert,
}

/// A script execution context.
pub struct Context {
    state: ContextState,
}

impl Context {
    pub fn new(engine: Rc<dyn Engine>, options: ContextOptions) -> Result<Self, EngineError> {
        let ContextOptions {
            isolate,
            allocator,
            add_default_global_methods,
            enter_context,
            global,
            search_paths,
            loader,
            unload_policy,
        } = options;

        let isolate = Isolate::acquire(engine.clone(), isolate, allocator)?;
        let iso = isolate.id();

        let (id, scope) = {
            let _handles = HandleScope::new(&*engine, iso)?;
            let template = global.unwrap_or_default();
            let id = engine.new_context(iso, &template)?;
            let entered = if enter_context {
                Some(EnteredContext::enter(&*engine, iso, id)?)
            } else {
                None
            };
            let scope = Global::new(&engine, iso, id)?;
            if let Some(entered) = entered {
                entered.keep();
            }
            (id, scope)
        };

        let loader = loader.unwrap_or_else(|| Rc::new(DylibLoader));
        let modules = Rc::new(RefCell::new(ModuleHost::new(
            search_paths,
            loader,
            unload_policy,
        )));

        let context = Context {
            state: ContextState::Active(ActiveContext {
                scope,
                id,
                entered: enter_context,
                modules,
                isolate,
            }),
        };

        if add_default_global_methods {
            if let ContextState::Active(active) = &context.state {
                let global = active.global_object()?;
                globals::install(active.engine(), iso, id, global, &active.modules)?;
            }
        }

        debug!(
            isolate = %iso,
            context = id.0,
            owned = context.owns_isolate(),
            entered = enter_context,
            "context created"
        );
        Ok(context)
    }

    /// A context with default options on a fresh isolate.
    pub fn with_defaults(engine: Rc<dyn Engine>) -> Result<Self, EngineError> {
        Context::new(engine, ContextOptions::default())
    }

    /// Move the state out, leaving `self` inert.
    pub fn take(&mut self) -> Context {
        std::mem::take(self)
    }

    fn active(&self) -> Option<&ActiveContext> {
        match &self.state {
            ContextState::Active(a) => Some(a),
            ContextState::Inert => None,
        }
    }

    fn expect_active(&self, what: &str) -> &ActiveContext {
        match &self.state {
            ContextState::Active(a) => a,
            ContextState::Inert => panic!("{} on a destroyed context", what),
        }
    }

    pub fn is_inert(&self) -> bool {
        matches!(self.state, ContextState::Inert)
    }

    pub fn id(&self) -> Option<ContextId> {
        self.active().map(|a| a.id)
    }

    pub fn isolate(&self) -> Option<IsolateId> {
        self.active().map(|a| a.isolate.id())
    }

    pub fn engine(&self) -> Option<&Rc<dyn Engine>> {
        self.active().map(|a| a.engine())
    }

    pub fn owns_isolate(&self) -> bool {
        self.active().map_or(false, |a| a.isolate.is_owned())
    }

    pub fn is_entered(&self) -> bool {
        self.active().map_or(false, |a| a.entered)
    }

    /// Make this context's isolate the thread-current one while the guard lives.
    pub fn isolate_scope(&self) -> Option<IsolateScope<'_>> {
        self.active().map(|a| a.isolate.scope())
    }

    /// The global object.
    pub fn global(&self) -> Result<ObjectId, ContextError> {
        let active = self.active().ok_or(ContextError::Inert)?;
        Ok(active.global_object()?)
    }

    /// Bind `name` on the global object, replacing any previous binding.
    ///
    /// # Panics
    ///
    /// If the context has been destroyed or the engine rejects the write.
    pub fn set(&mut self, name: &str, value: impl Into<JsValue>) -> &mut Self {
        {
            let active = self.expect_active("set");
            let engine = active.engine();
            let iso = active.isolate.id();
            let _handles = HandleScope::new(&**engine, iso)
                .unwrap_or_else(|e| panic!("cannot open a handle scope to set `{}`: {}", name, e));
            let global = active.global_object().unwrap_or_else(|e| {
                panic!("global object unavailable while setting `{}`: {}", name, e)
            });
            if let Err(e) = engine.set_property(iso, global, name, value.into()) {
                panic!("setting global `{}` failed: {}", name, e);
            }
        }
        self
    }

    /// Instantiate `module` and bind it as `name`.
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`Context::set`].
    pub fn bind_module(&mut self, name: &str, module: &Module) -> &mut Self {
        let active = self.expect_active("bind_module");
        let instance = module
            .new_instance(&**active.engine(), active.isolate.id())
            .unwrap_or_else(|e| panic!("cannot instantiate module `{}`: {}", name, e));
        self.set(name, instance)
    }

    /// Read a global binding; `undefined` when absent.
    pub fn get(&self, name: &str) -> Result<JsValue, ContextError> {
        let active = self.active().ok_or(ContextError::Inert)?;
        let global = active.global_object()?;
        Ok(active
            .engine()
            .get_property(active.isolate.id(), global, name)?)
    }

    pub fn run_script(&self, source: &str) -> Result<JsValue, ContextError> {
        self.run_script_named(source, "<script>")
    }

    /// Run `source`, reporting errors against `origin`.
    pub fn run_script_named(&self, source: &str, origin: &str) -> Result<JsValue, ContextError> {
        let active = self.active().ok_or(ContextError::Inert)?;
        let iso = active.isolate.id();
        let _handles = HandleScope::new(&**active.engine(), iso)?;
        Ok(active.engine().run_script(iso, active.id, source, origin)?)
    }

    pub fn run_file(&self, path: &Path) -> Result<JsValue, ContextError> {
        let source = fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.run_script_named(&source, &path.display().to_string())
    }

    /// Load an extension module, or return the exports of an already loaded one.
    pub fn load_module(&mut self, name: &str) -> Result<JsValue, ModuleError> {
        let active = self.active().ok_or(ModuleError::Inert)?;
        plugin::load(
            active.engine(),
            active.isolate.id(),
            active.id,
            &active.modules,
            name,
        )
    }

    /// Load every enabled preload entry of `config` and bind its exports.
    pub fn load_configured_modules(&mut self, config: &ModuleConfig) -> Result<(), ModuleError> {
        for entry in config.enabled_preloads() {
            let exports = self.load_module(&entry.name)?;
            self.set(entry.binding(), exports);
        }
        Ok(())
    }

    /// Drop a module's record, release its exports and close its library.
    ///
    /// Values the module produced that scripts still hold must not be used
    /// afterwards. Returns whether the module was loaded.
    pub fn unload_module(&mut self, name: &str) -> bool {
        match self.active() {
            Some(active) => plugin::unload(&active.modules, name),
            None => false,
        }
    }

    pub fn module_exports(&self, name: &str) -> Option<JsValue> {
        let active = self.active()?;
        let modules = active.modules.borrow();
        modules.table.get(name).and_then(|m| m.exports())
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.active()
            .map(|a| a.modules.borrow().table.names())
            .unwrap_or_default()
    }

    pub fn module_count(&self) -> usize {
        self.active()
            .map_or(0, |a| a.modules.borrow().table.len())
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.active()
            .map(|a| a.modules.borrow().search_paths.clone())
            .unwrap_or_default()
    }

    pub fn set_search_paths(&mut self, paths: Vec<PathBuf>) -> &mut Self {
        if let Some(active) = self.active() {
            active.modules.borrow_mut().search_paths = paths;
        }
        self
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        if let Some(active) = self.active() {
            active.modules.borrow_mut().search_paths.push(path.into());
        }
        self
    }

    /// Tear the context down. Later calls, and the eventual drop, do nothing.
    pub fn destroy(&mut self) {
        let active = match std::mem::replace(&mut self.state, ContextState::Inert) {
            ContextState::Active(active) => active,
            ContextState::Inert => return,
        };
        let ActiveContext {
            mut scope,
            id,
            entered,
            modules,
            isolate,
        } = active;
        let iso = isolate.id();
        let engine = isolate.engine().clone();

        let purged = class_registry::cleanup(iso);

        if entered {
            engine.exit_context(iso, id);
        }

        scope.reset();
        let (records, policy) = {
            let mut host = modules.borrow_mut();
            host.table.release_all_exports();
            (host.table.drain(), host.unload_policy)
        };

        let owned = isolate.is_owned();
        isolate.dispose();

        let module_count = records.len();
        for (_, module) in records {
            module.finish(policy);
        }

        debug!(
            isolate = %iso,
            context = id.0,
            owned,
            classes = purged,
            modules = module_count,
            "context destroyed"
        );
    }
}

impl Default for Context {
    /// An inert context.
    fn default() -> Self {
        Context {
            state: ContextState::Inert,
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.active() {
            Some(a) => f
                .debug_struct("Context")
                .field("id", &a.id)
                .field("isolate", &a.isolate)
                .field("entered", &a.entered)
                .finish(),
            None => write!(f, "Context(inert)"),
        }
    }
}
