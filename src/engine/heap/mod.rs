//! In-process engine keeping every isolate's objects in a plain map.
//!
//! Objects are never collected before their isolate is disposed; contexts are
//! reference counted by handle scopes, entries on the entered-context stack and
//! durable references, and are dropped once none remain. The "current isolate"
//! of the calling thread is an explicit stack owned by the engine value, so a
//! single thread can host several isolates the way separate threads would.

mod script;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::engine::allocator::ArrayBufferAllocator;
use crate::engine::template::{ObjectTemplate, TemplateValue};
use crate::engine::value::{JsValue, NativeFunction, ObjectId};
use crate::engine::{
    ContextId, CreateParams, Engine, EngineError, HandleScopeId, IsolateId, Persistable,
    PersistentId, ScriptError,
};

enum ObjectKind {
    Ordinary,
    Function(NativeFunction),
    ArrayBuffer(BackingStore),
}

struct BackingStore {
    ptr: NonNull<u8>,
    len: usize,
}

struct HeapObject {
    kind: ObjectKind,
    properties: BTreeMap<String, JsValue>,
    read_only: bool,
}

impl HeapObject {
    fn ordinary() -> Self {
        HeapObject {
            kind: ObjectKind::Ordinary,
            properties: BTreeMap::new(),
            read_only: false,
        }
    }
}

struct ContextRecord {
    global: ObjectId,
    refs: usize,
}

struct HandleScopeRecord {
    id: HandleScopeId,
    contexts: Vec<ContextId>,
}

struct IsolateState {
    allocator: Arc<dyn ArrayBufferAllocator>,
    next_id: u64,
    objects: HashMap<ObjectId, HeapObject>,
    contexts: HashMap<ContextId, ContextRecord>,
    entered_contexts: Vec<ContextId>,
    persistents: HashMap<PersistentId, Persistable>,
    handle_scopes: Vec<HandleScopeRecord>,
}

impl IsolateState {
    fn new(allocator: Arc<dyn ArrayBufferAllocator>) -> Self {
        IsolateState {
            allocator,
            next_id: 1,
            objects: HashMap::new(),
            contexts: HashMap::new(),
            entered_contexts: Vec::new(),
            persistents: HashMap::new(),
            handle_scopes: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn alloc_object(&mut self, object: HeapObject) -> ObjectId {
        let id = ObjectId(self.next_id());
        self.objects.insert(id, object);
        id
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut HeapObject, EngineError> {
        self.objects
            .get_mut(&id)
            .ok_or(EngineError::UnknownObject { object: id })
    }

    fn instantiate(&mut self, template: &ObjectTemplate) -> ObjectId {
        let mut properties = BTreeMap::new();
        for (name, entry) in template.entries() {
            let value = match entry {
                TemplateValue::Value(v) => v.clone(),
                TemplateValue::Function(f) => JsValue::Object(self.alloc_object(HeapObject {
                    kind: ObjectKind::Function(f.clone()),
                    properties: BTreeMap::new(),
                    read_only: true,
                })),
                TemplateValue::Object(t) => JsValue::Object(self.instantiate(t)),
            };
            properties.insert(name.to_string(), value);
        }
        self.alloc_object(HeapObject {
            kind: ObjectKind::Ordinary,
            properties,
            read_only: template.is_read_only(),
        })
    }

    fn retain_context(&mut self, context: ContextId) -> Result<(), EngineError> {
        let record = self
            .contexts
            .get_mut(&context)
            .ok_or(EngineError::UnknownContext { context })?;
        record.refs += 1;
        Ok(())
    }

    fn release_context(&mut self, context: ContextId) {
        let drop_it = match self.contexts.get_mut(&context) {
            Some(record) => {
                record.refs = record.refs.saturating_sub(1);
                record.refs == 0
            }
            None => false,
        };
        if drop_it {
            self.contexts.remove(&context);
            trace!(context = context.0, "context released");
        }
    }

    fn free_backing_stores(&mut self) -> usize {
        let mut freed = 0;
        for (_, object) in self.objects.drain() {
            if let ObjectKind::ArrayBuffer(store) = object.kind {
                // SAFETY: the store was allocated by this isolate's allocator with this length.
                unsafe { self.allocator.free(store.ptr, store.len) };
                freed += store.len;
            }
        }
        freed
    }
}

#[derive(Default)]
struct HeapState {
    isolates: HashMap<IsolateId, IsolateState>,
    entered: Vec<IsolateId>,
    created: usize,
    disposed: usize,
}

impl HeapState {
    fn isolate(&self, id: IsolateId) -> Result<&IsolateState, EngineError> {
        self.isolates
            .get(&id)
            .ok_or(EngineError::UnknownIsolate { isolate: id })
    }

    fn isolate_mut(&mut self, id: IsolateId) -> Result<&mut IsolateState, EngineError> {
        self.isolates
            .get_mut(&id)
            .ok_or(EngineError::UnknownIsolate { isolate: id })
    }
}

/// Reference implementation of [`Engine`].
#[derive(Default)]
pub struct HeapEngine {
    state: RefCell<HeapState>,
}

impl HeapEngine {
    pub fn new() -> Self {
        HeapEngine::default()
    }

    /// Isolates created and not yet disposed.
    pub fn live_isolates(&self) -> usize {
        self.state.borrow().isolates.len()
    }

    pub fn created_isolates(&self) -> usize {
        self.state.borrow().created
    }

    pub fn disposed_isolates(&self) -> usize {
        self.state.borrow().disposed
    }

    pub fn is_alive(&self, isolate: IsolateId) -> bool {
        self.state.borrow().isolates.contains_key(&isolate)
    }

    pub fn context_count(&self, isolate: IsolateId) -> usize {
        self.state
            .borrow()
            .isolates
            .get(&isolate)
            .map_or(0, |i| i.contexts.len())
    }

    pub fn persistent_count(&self, isolate: IsolateId) -> usize {
        self.state
            .borrow()
            .isolates
            .get(&isolate)
            .map_or(0, |i| i.persistents.len())
    }

    pub fn handle_scope_depth(&self, isolate: IsolateId) -> usize {
        self.state
            .borrow()
            .isolates
            .get(&isolate)
            .map_or(0, |i| i.handle_scopes.len())
    }

    pub fn array_buffer_len(&self, isolate: IsolateId, buffer: ObjectId) -> Option<usize> {
        let state = self.state.borrow();
        match state.isolates.get(&isolate)?.objects.get(&buffer)?.kind {
            ObjectKind::ArrayBuffer(ref store) => Some(store.len),
            _ => None,
        }
    }

    /// Whether `object` has an own property named `key`.
    pub fn has_property(&self, isolate: IsolateId, object: ObjectId, key: &str) -> bool {
        self.lookup(isolate, object, key)
            .map(|v| v.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn lookup(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
    ) -> Result<Option<JsValue>, EngineError> {
        let state = self.state.borrow();
        let object = state
            .isolate(isolate)?
            .objects
            .get(&object)
            .ok_or(EngineError::UnknownObject { object })?;
        Ok(object.properties.get(key).cloned())
    }

    /// Invoke a function object. The engine is not borrowed while the host callable runs.
    pub fn call_function(
        &self,
        isolate: IsolateId,
        function: ObjectId,
        args: &[JsValue],
    ) -> Result<JsValue, ScriptError> {
        let callable = {
            let state = self.state.borrow();
            let object = state
                .isolate(isolate)?
                .objects
                .get(&function)
                .ok_or(EngineError::UnknownObject { object: function })?;
            match &object.kind {
                ObjectKind::Function(f) => f.clone(),
                _ => return Err(ScriptError::Type(format!("object{} is not a function", function))),
            }
        };
        callable.call(args)
    }

    fn create_array_buffer(&self, isolate: IsolateId, len: usize) -> Result<ObjectId, EngineError> {
        let mut state = self.state.borrow_mut();
        let iso = state.isolate_mut(isolate)?;
        let ptr = iso
            .allocator
            .allocate(len)
            .ok_or(EngineError::Allocation { len })?;
        let mut object = HeapObject::ordinary();
        object.kind = ObjectKind::ArrayBuffer(BackingStore { ptr, len });
        Ok(iso.alloc_object(object))
    }
}

impl Engine for HeapEngine {
    fn new_isolate(&self, params: CreateParams) -> Result<IsolateId, EngineError> {
        let id = IsolateId::new_v4();
        let mut state = self.state.borrow_mut();
        state.isolates.insert(id, IsolateState::new(params.allocator));
        state.created += 1;
        debug!(isolate = %id, "isolate created");
        Ok(id)
    }

    fn enter_isolate(&self, isolate: IsolateId) {
        self.state.borrow_mut().entered.push(isolate);
    }

    fn exit_isolate(&self, isolate: IsolateId) {
        let mut state = self.state.borrow_mut();
        match state.entered.iter().rposition(|i| *i == isolate) {
            Some(pos) => {
                if pos + 1 != state.entered.len() {
                    warn!(isolate = %isolate, "exiting an isolate that is not the innermost entered one");
                }
                state.entered.remove(pos);
            }
            None => warn!(isolate = %isolate, "exit of an isolate that was never entered"),
        }
    }

    fn dispose_isolate(&self, isolate: IsolateId) {
        let mut state = self.state.borrow_mut();
        let removed = state.isolates.remove(&isolate);
        if state.entered.contains(&isolate) {
            warn!(isolate = %isolate, "disposing an isolate that is still entered");
            state.entered.retain(|i| *i != isolate);
        }
        if let Some(mut iso) = removed {
            state.disposed += 1;
            // Host callables may drop engine handles of their own; release the borrow first.
            drop(state);
            let freed = iso.free_backing_stores();
            debug!(isolate = %isolate, freed_bytes = freed, "isolate disposed");
        }
    }

    fn current_isolate(&self) -> Option<IsolateId> {
        self.state.borrow().entered.last().copied()
    }

    fn open_handle_scope(&self, isolate: IsolateId) -> Result<HandleScopeId, EngineError> {
        let mut state = self.state.borrow_mut();
        let iso = state.isolate_mut(isolate)?;
        let id = HandleScopeId(iso.next_id());
        iso.handle_scopes.push(HandleScopeRecord {
            id,
            contexts: Vec::new(),
        });
        Ok(id)
    }

    fn close_handle_scope(&self, isolate: IsolateId, scope: HandleScopeId) {
        let mut state = self.state.borrow_mut();
        let iso = match state.isolates.get_mut(&isolate) {
            Some(iso) => iso,
            None => return,
        };
        match iso.handle_scopes.last() {
            Some(top) if top.id == scope => {}
            _ => {
                warn!(isolate = %isolate, scope = scope.0, "handle scope closed out of order");
            }
        }
        if let Some(pos) = iso.handle_scopes.iter().rposition(|s| s.id == scope) {
            let record = iso.handle_scopes.remove(pos);
            for context in record.contexts {
                iso.release_context(context);
            }
        }
    }

    fn new_context(
        &self,
        isolate: IsolateId,
        global: &ObjectTemplate,
    ) -> Result<ContextId, EngineError> {
        let mut state = self.state.borrow_mut();
        if state.entered.last() != Some(&isolate) {
            state.isolate(isolate)?;
            return Err(EngineError::IsolateNotCurrent { isolate });
        }
        let iso = state.isolate_mut(isolate)?;
        if iso.handle_scopes.is_empty() {
            return Err(EngineError::ContextCreation {
                reason: "no open handle scope".to_string(),
            });
        }
        let global = iso.instantiate(global);
        if let Some(object) = iso.objects.get_mut(&global) {
            // The global object always accepts writes.
            object.read_only = false;
        }
        let id = ContextId(iso.next_id());
        iso.contexts.insert(id, ContextRecord { global, refs: 1 });
        if let Some(scope) = iso.handle_scopes.last_mut() {
            scope.contexts.push(id);
        }
        debug!(isolate = %isolate, context = id.0, "context created");
        Ok(id)
    }

    fn enter_context(&self, isolate: IsolateId, context: ContextId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let iso = state.isolate_mut(isolate)?;
        iso.retain_context(context)?;
        iso.entered_contexts.push(context);
        Ok(())
    }

    fn exit_context(&self, isolate: IsolateId, context: ContextId) {
        let mut state = self.state.borrow_mut();
        let iso = match state.isolates.get_mut(&isolate) {
            Some(iso) => iso,
            None => return,
        };
        match iso.entered_contexts.iter().rposition(|c| *c == context) {
            Some(pos) => {
                if pos + 1 != iso.entered_contexts.len() {
                    warn!(isolate = %isolate, context = context.0, "context exited out of order");
                }
                iso.entered_contexts.remove(pos);
                iso.release_context(context);
            }
            None => warn!(isolate = %isolate, context = context.0, "exit of a context that was not entered"),
        }
    }

    fn current_context(&self, isolate: IsolateId) -> Option<ContextId> {
        let state = self.state.borrow();
        state.isolates.get(&isolate)?.entered_contexts.last().copied()
    }

    fn global_object(
        &self,
        isolate: IsolateId,
        context: ContextId,
    ) -> Result<ObjectId, EngineError> {
        let state = self.state.borrow();
        state
            .isolate(isolate)?
            .contexts
            .get(&context)
            .map(|c| c.global)
            .ok_or(EngineError::UnknownContext { context })
    }

    fn persist(&self, isolate: IsolateId, target: Persistable) -> Result<PersistentId, EngineError> {
        let mut state = self.state.borrow_mut();
        let iso = state.isolate_mut(isolate)?;
        if let Persistable::Context(context) = target {
            iso.retain_context(context)?;
        }
        let id = PersistentId(iso.next_id());
        iso.persistents.insert(id, target);
        Ok(id)
    }

    fn resolve_persistent(&self, isolate: IsolateId, id: PersistentId) -> Option<Persistable> {
        let state = self.state.borrow();
        state.isolates.get(&isolate)?.persistents.get(&id).cloned()
    }

    fn reset_persistent(&self, isolate: IsolateId, id: PersistentId) {
        let mut state = self.state.borrow_mut();
        let iso = match state.isolates.get_mut(&isolate) {
            Some(iso) => iso,
            None => return,
        };
        if let Some(Persistable::Context(context)) = iso.persistents.remove(&id) {
            iso.release_context(context);
        }
    }

    fn new_object(&self, isolate: IsolateId) -> Result<ObjectId, EngineError> {
        let mut state = self.state.borrow_mut();
        Ok(state.isolate_mut(isolate)?.alloc_object(HeapObject::ordinary()))
    }

    fn instantiate(
        &self,
        isolate: IsolateId,
        template: &ObjectTemplate,
    ) -> Result<JsValue, EngineError> {
        let mut state = self.state.borrow_mut();
        Ok(JsValue::Object(state.isolate_mut(isolate)?.instantiate(template)))
    }

    fn set_property(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
        value: JsValue,
    ) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let target = state.isolate_mut(isolate)?.object_mut(object)?;
        if target.read_only {
            return Err(EngineError::WriteRejected {
                key: key.to_string(),
            });
        }
        target.properties.insert(key.to_string(), value);
        Ok(())
    }

    fn get_property(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
    ) -> Result<JsValue, EngineError> {
        Ok(self
            .lookup(isolate, object, key)?
            .unwrap_or(JsValue::Undefined))
    }

    fn new_array_buffer(&self, isolate: IsolateId, len: usize) -> Result<ObjectId, EngineError> {
        self.create_array_buffer(isolate, len)
    }

    fn run_script(
        &self,
        isolate: IsolateId,
        context: ContextId,
        source: &str,
        origin: &str,
    ) -> Result<JsValue, ScriptError> {
        if self.current_isolate() != Some(isolate) {
            return Err(EngineError::IsolateNotCurrent { isolate }.into());
        }
        let global = self.global_object(isolate, context)?;
        self.enter_context(isolate, context)?;
        let result = script::run(self, isolate, global, source, origin);
        self.exit_context(isolate, context);
        result
    }
}
