//! Cross-domain references.
//!
//! [`HandleScope`] bounds short-lived engine references to a stack region.
//! [`Global`] is the only way native code keeps a scripted value alive past
//! such a region; it is reset exactly once, explicitly or on drop.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::engine::{
    ContextId, Engine, EngineError, HandleScopeId, IsolateId, JsValue, Persistable, PersistentId,
};

/// Stack-disciplined temporary-reference region. Closed on drop.
pub struct HandleScope<'a> {
    engine: &'a dyn Engine,
    isolate: IsolateId,
    id: HandleScopeId,
}

impl<'a> HandleScope<'a> {
    pub fn new(engine: &'a dyn Engine, isolate: IsolateId) -> Result<Self, EngineError> {
        let id = engine.open_handle_scope(isolate)?;
        Ok(HandleScope {
            engine,
            isolate,
            id,
        })
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }
}

impl<'a> Drop for HandleScope<'a> {
    fn drop(&mut self) {
        self.engine.close_handle_scope(self.isolate, self.id);
    }
}

/// Types a [`Global`] can hold.
pub trait Persistent: Sized {
    fn into_persistable(self) -> Persistable;
    fn from_persistable(p: Persistable) -> Option<Self>;
}

impl Persistent for JsValue {
    fn into_persistable(self) -> Persistable {
        Persistable::Value(self)
    }

    fn from_persistable(p: Persistable) -> Option<Self> {
        match p {
            Persistable::Value(v) => Some(v),
            Persistable::Context(_) => None,
        }
    }
}

impl Persistent for ContextId {
    fn into_persistable(self) -> Persistable {
        Persistable::Context(self)
    }

    fn from_persistable(p: Persistable) -> Option<Self> {
        match p {
            Persistable::Context(c) => Some(c),
            Persistable::Value(_) => None,
        }
    }
}

/// Durable reference from the native domain into an isolate.
pub struct Global<T: Persistent> {
    engine: Rc<dyn Engine>,
    isolate: IsolateId,
    id: Option<PersistentId>,
    _marker: PhantomData<T>,
}

impl<T: Persistent> Global<T> {
    pub fn new(engine: &Rc<dyn Engine>, isolate: IsolateId, value: T) -> Result<Self, EngineError> {
        let id = engine.persist(isolate, value.into_persistable())?;
        Ok(Global {
            engine: engine.clone(),
            isolate,
            id: Some(id),
            _marker: PhantomData,
        })
    }

    /// The referenced value, or `None` once reset or after its isolate is gone.
    pub fn get(&self) -> Option<T> {
        let id = self.id?;
        self.engine
            .resolve_persistent(self.isolate, id)
            .and_then(T::from_persistable)
    }

    pub fn id(&self) -> Option<PersistentId> {
        self.id
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
    }

    /// Release the reference. Later calls are no-ops.
    pub fn reset(&mut self) {
        if let Some(id) = self.id.take() {
            self.engine.reset_persistent(self.isolate, id);
        }
    }
}

impl<T: Persistent> Drop for Global<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Persistent> fmt::Debug for Global<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("isolate", &self.isolate)
            .field("id", &self.id)
            .finish()
    }
}
