//! Shared fixtures: an engine that records teardown-relevant calls, an
//! in-memory library loader and a counting allocator.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use just_embed::config::{PLUGIN_INIT_PROC_NAME, PLUGIN_SUFFIX};
use just_embed::engine::{
    ArrayBufferAllocator, ContextId, CreateParams, DefaultAllocator, Engine, EngineError,
    HandleScopeId, HeapEngine, IsolateId, JsValue, ObjectId, ObjectTemplate, Persistable,
    PersistentId, ScriptError,
};
use just_embed::runner::class_registry;
use just_embed::runner::plugin::{LibraryLoader, ModuleError, NativeLibrary, PluginInitFn};

/// Initialize tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Purge,
    ExitContext(ContextId),
    PersistContext,
    PersistValue,
    ResetPersistent,
    ExitIsolate,
    DisposeIsolate,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// [`HeapEngine`] that logs lifecycle calls.
pub struct RecordingEngine {
    pub heap: HeapEngine,
    pub log: EventLog,
    /// Reject every `persist` call while set.
    pub fail_persist: Cell<bool>,
}

impl RecordingEngine {
    pub fn new() -> Rc<Self> {
        Rc::new(RecordingEngine {
            heap: HeapEngine::new(),
            log: Rc::new(RefCell::new(Vec::new())),
            fail_persist: Cell::new(false),
        })
    }

    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    /// Record a `Purge` event when the registry of `isolate` is cleaned up.
    pub fn watch_purge(&self, isolate: IsolateId) {
        let log = self.log.clone();
        class_registry::on_cleanup(isolate, move |_| log.borrow_mut().push(Event::Purge));
    }
}

impl Engine for RecordingEngine {
    fn new_isolate(&self, params: CreateParams) -> Result<IsolateId, EngineError> {
        self.heap.new_isolate(params)
    }

    fn enter_isolate(&self, isolate: IsolateId) {
        self.heap.enter_isolate(isolate)
    }

    fn exit_isolate(&self, isolate: IsolateId) {
        self.record(Event::ExitIsolate);
        self.heap.exit_isolate(isolate)
    }

    fn dispose_isolate(&self, isolate: IsolateId) {
        self.record(Event::DisposeIsolate);
        self.heap.dispose_isolate(isolate)
    }

    fn current_isolate(&self) -> Option<IsolateId> {
        self.heap.current_isolate()
    }

    fn open_handle_scope(&self, isolate: IsolateId) -> Result<HandleScopeId, EngineError> {
        self.heap.open_handle_scope(isolate)
    }

    fn close_handle_scope(&self, isolate: IsolateId, scope: HandleScopeId) {
        self.heap.close_handle_scope(isolate, scope)
    }

    fn new_context(
        &self,
        isolate: IsolateId,
        global: &ObjectTemplate,
    ) -> Result<ContextId, EngineError> {
        self.heap.new_context(isolate, global)
    }

    fn enter_context(&self, isolate: IsolateId, context: ContextId) -> Result<(), EngineError> {
        self.heap.enter_context(isolate, context)
    }

    fn exit_context(&self, isolate: IsolateId, context: ContextId) {
        self.record(Event::ExitContext(context));
        self.heap.exit_context(isolate, context)
    }

    fn current_context(&self, isolate: IsolateId) -> Option<ContextId> {
        self.heap.current_context(isolate)
    }

    fn global_object(
        &self,
        isolate: IsolateId,
        context: ContextId,
    ) -> Result<ObjectId, EngineError> {
        self.heap.global_object(isolate, context)
    }

    fn persist(&self, isolate: IsolateId, target: Persistable) -> Result<PersistentId, EngineError> {
        self.record(match target {
            Persistable::Context(_) => Event::PersistContext,
            Persistable::Value(_) => Event::PersistValue,
        });
        if self.fail_persist.get() {
            return Err(EngineError::ContextCreation {
                reason: "persistent handle table full".to_string(),
            });
        }
        self.heap.persist(isolate, target)
    }

    fn resolve_persistent(&self, isolate: IsolateId, id: PersistentId) -> Option<Persistable> {
        self.heap.resolve_persistent(isolate, id)
    }

    fn reset_persistent(&self, isolate: IsolateId, id: PersistentId) {
        self.record(Event::ResetPersistent);
        self.heap.reset_persistent(isolate, id)
    }

    fn new_object(&self, isolate: IsolateId) -> Result<ObjectId, EngineError> {
        self.heap.new_object(isolate)
    }

    fn instantiate(
        &self,
        isolate: IsolateId,
        template: &ObjectTemplate,
    ) -> Result<JsValue, EngineError> {
        self.heap.instantiate(isolate, template)
    }

    fn set_property(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
        value: JsValue,
    ) -> Result<(), EngineError> {
        self.heap.set_property(isolate, object, key, value)
    }

    fn get_property(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
    ) -> Result<JsValue, EngineError> {
        self.heap.get_property(isolate, object, key)
    }

    fn new_array_buffer(&self, isolate: IsolateId, len: usize) -> Result<ObjectId, EngineError> {
        self.heap.new_array_buffer(isolate, len)
    }

    fn run_script(
        &self,
        isolate: IsolateId,
        context: ContextId,
        source: &str,
        origin: &str,
    ) -> Result<JsValue, ScriptError> {
        self.heap.run_script(isolate, context, source, origin)
    }
}

/// In-memory stand-in for a shared library.
struct FakeLibrary {
    path: PathBuf,
    init: Option<PluginInitFn>,
    closed: Rc<Cell<usize>>,
}

impl NativeLibrary for FakeLibrary {
    fn init_fn(&self, symbol: &str) -> Result<PluginInitFn, ModuleError> {
        match self.init {
            Some(init) if symbol == PLUGIN_INIT_PROC_NAME => Ok(init),
            _ => Err(ModuleError::MissingEntryPoint {
                path: self.path.clone(),
                symbol: symbol.to_string(),
            }),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FakeLibrary {
    fn drop(&mut self) {
        self.closed.set(self.closed.get() + 1);
    }
}

/// Loader serving [`FakeLibrary`] instances from a fixed map of paths.
#[derive(Default)]
pub struct FakeLoader {
    libraries: HashMap<PathBuf, Option<PluginInitFn>>,
    opened: Cell<usize>,
    closed: Rc<Cell<usize>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        FakeLoader::default()
    }

    /// Serve `name` from `dir` with the given entry point.
    pub fn with_module(mut self, dir: &str, name: &str, init: PluginInitFn) -> Self {
        self.libraries.insert(module_path(dir, name), Some(init));
        self
    }

    /// Serve `name` from `dir` as a library without an entry point.
    pub fn with_library(mut self, dir: &str, name: &str) -> Self {
        self.libraries.insert(module_path(dir, name), None);
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    pub fn closed(&self) -> usize {
        self.closed.get()
    }
}

pub fn module_path(dir: &str, name: &str) -> PathBuf {
    Path::new(dir).join(format!("{}{}", name, PLUGIN_SUFFIX))
}

impl LibraryLoader for FakeLoader {
    fn exists(&self, path: &Path) -> bool {
        self.libraries.contains_key(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, ModuleError> {
        let init = self
            .libraries
            .get(path)
            .copied()
            .ok_or_else(|| ModuleError::Load {
                path: path.to_path_buf(),
                reason: "no such library".to_string(),
            })?;
        self.opened.set(self.opened.get() + 1);
        Ok(Box::new(FakeLibrary {
            path: path.to_path_buf(),
            init,
            closed: self.closed.clone(),
        }))
    }
}

/// Allocator that counts calls on top of [`DefaultAllocator`].
#[derive(Default)]
pub struct CountingAllocator {
    inner: DefaultAllocator,
    pub allocations: AtomicUsize,
    pub frees: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(CountingAllocator::default())
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.inner.allocated_bytes()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl ArrayBufferAllocator for CountingAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate(len)
    }

    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate_uninitialized(len)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, len: usize) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.free(ptr, len)
    }
}
