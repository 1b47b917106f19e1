//! The scripting-engine capability the bridge is built on.
//!
//! The bridge never reaches into an engine's heap directly. Everything it needs
//! (isolates, contexts, handle scopes, durable references, property writes and
//! script execution) goes through the [`Engine`] trait, addressed by opaque ids.
//! [`heap::HeapEngine`] is the in-crate implementation.

pub mod allocator;
pub mod heap;
pub mod template;
pub mod value;

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

pub use allocator::{default_allocator, ArrayBufferAllocator, DefaultAllocator};
pub use heap::HeapEngine;
pub use template::{ObjectTemplate, TemplateValue};
pub use value::{JsNumberType, JsValue, NativeFunction, ObjectId};

/// Identity of one engine runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolateId(Uuid);

impl IsolateId {
    pub fn new_v4() -> Self {
        IsolateId(Uuid::new_v4())
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleScopeId(pub u64);

/// Anything a durable reference can keep alive.
#[derive(Debug, Clone, PartialEq)]
pub enum Persistable {
    Value(JsValue),
    Context(ContextId),
}

/// Parameters for creating a new isolate.
#[derive(Clone)]
pub struct CreateParams {
    pub allocator: Arc<dyn ArrayBufferAllocator>,
}

impl Default for CreateParams {
    fn default() -> Self {
        CreateParams {
            allocator: default_allocator(),
        }
    }
}

impl fmt::Debug for CreateParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateParams").finish_non_exhaustive()
    }
}

/// Resource failures reported by an engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to create isolate: {reason}")]
    IsolateCreation { reason: String },

    #[error("unknown or disposed isolate {isolate}")]
    UnknownIsolate { isolate: IsolateId },

    #[error("isolate {isolate} is not the current isolate on this thread")]
    IsolateNotCurrent { isolate: IsolateId },

    #[error("unknown context {context:?}")]
    UnknownContext { context: ContextId },

    #[error("unknown object {object}")]
    UnknownObject { object: ObjectId },

    #[error("failed to create context: {reason}")]
    ContextCreation { reason: String },

    #[error("allocation of {len} bytes failed")]
    Allocation { len: usize },

    #[error("write of property `{key}` rejected")]
    WriteRejected { key: String },
}

/// An exception raised in the scripted domain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("Uncaught syntax error: {0}.")]
    Syntax(String),

    #[error("Uncaught reference error: {0}.")]
    Reference(String),

    #[error("Uncaught type error: {0}.")]
    Type(String),

    #[error("Uncaught range error: {0}.")]
    Range(String),

    #[error("Uncaught error: {0}.")]
    Native(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Operations the bridge consumes from a scripting engine.
///
/// Implementations use interior mutability: native functions called from a
/// running script re-enter the engine through the same shared reference.
/// Teardown operations (`exit_*`, `close_handle_scope`, `reset_persistent`,
/// `dispose_isolate`) do not fail; unknown ids are ignored.
pub trait Engine {
    fn new_isolate(&self, params: CreateParams) -> Result<IsolateId, EngineError>;

    /// Make `isolate` the current isolate of the calling thread. Nests.
    fn enter_isolate(&self, isolate: IsolateId);

    fn exit_isolate(&self, isolate: IsolateId);

    /// Free every engine-internal resource of `isolate`.
    fn dispose_isolate(&self, isolate: IsolateId);

    fn current_isolate(&self) -> Option<IsolateId>;

    fn open_handle_scope(&self, isolate: IsolateId) -> Result<HandleScopeId, EngineError>;

    /// Handle scopes close in reverse order of opening.
    fn close_handle_scope(&self, isolate: IsolateId, scope: HandleScopeId);

    fn new_context(
        &self,
        isolate: IsolateId,
        global: &ObjectTemplate,
    ) -> Result<ContextId, EngineError>;

    fn enter_context(&self, isolate: IsolateId, context: ContextId) -> Result<(), EngineError>;

    fn exit_context(&self, isolate: IsolateId, context: ContextId);

    fn current_context(&self, isolate: IsolateId) -> Option<ContextId>;

    fn global_object(&self, isolate: IsolateId, context: ContextId)
        -> Result<ObjectId, EngineError>;

    fn persist(&self, isolate: IsolateId, target: Persistable) -> Result<PersistentId, EngineError>;

    fn resolve_persistent(&self, isolate: IsolateId, id: PersistentId) -> Option<Persistable>;

    fn reset_persistent(&self, isolate: IsolateId, id: PersistentId);

    fn new_object(&self, isolate: IsolateId) -> Result<ObjectId, EngineError>;

    fn instantiate(&self, isolate: IsolateId, template: &ObjectTemplate)
        -> Result<JsValue, EngineError>;

    fn set_property(
        &self,
        isolate: IsolateId,
        object: ObjectId,
        key: &str,
        value: JsValue,
    ) -> Result<(), EngineError>;

    fn get_property(&self, isolate: IsolateId, object: ObjectId, key: &str)
        -> Result<JsValue, EngineError>;

    /// Allocate an array buffer whose backing store comes from the isolate's allocator.
    fn new_array_buffer(&self, isolate: IsolateId, len: usize) -> Result<ObjectId, EngineError>;

    fn run_script(
        &self,
        isolate: IsolateId,
        context: ContextId,
        source: &str,
        origin: &str,
    ) -> Result<JsValue, ScriptError>;
}
