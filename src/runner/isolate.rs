//! Engine instance handle.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::engine::{default_allocator, ArrayBufferAllocator, CreateParams, Engine, EngineError, IsolateId};

/// One engine instance, either created here (owned) or supplied by the host (borrowed).
///
/// Only an owned handle exits and disposes its instance, and it does so at most
/// once: [`Isolate::dispose`] consumes the handle, and `Drop` disposes an owned
/// handle that was never disposed explicitly.
pub struct Isolate {
    engine: Rc<dyn Engine>,
    id: IsolateId,
    owned: bool,
    disposed: bool,
}

impl Isolate {
    /// Borrow `existing`, or create, own and enter a fresh instance.
    ///
    /// The allocator is only consulted when a new instance is created; without
    /// one the process-wide default allocator is used.
    pub fn acquire(
        engine: Rc<dyn Engine>,
        existing: Option<IsolateId>,
        allocator: Option<Arc<dyn ArrayBufferAllocator>>,
    ) -> Result<Self, EngineError> {
        match existing {
            Some(id) => Ok(Isolate::borrowed(engine, id)),
            None => Isolate::new(engine, allocator),
        }
    }

    /// Create an owned instance and make it current on this thread.
    pub fn new(
        engine: Rc<dyn Engine>,
        allocator: Option<Arc<dyn ArrayBufferAllocator>>,
    ) -> Result<Self, EngineError> {
        let params = CreateParams {
            allocator: allocator.unwrap_or_else(default_allocator),
        };
        let id = engine.new_isolate(params)?;
        engine.enter_isolate(id);
        debug!(isolate = %id, "acquired owned isolate");
        Ok(Isolate {
            engine,
            id,
            owned: true,
            disposed: false,
        })
    }

    pub fn borrowed(engine: Rc<dyn Engine>, id: IsolateId) -> Self {
        Isolate {
            engine,
            id,
            owned: false,
            disposed: false,
        }
    }

    pub fn id(&self) -> IsolateId {
        self.id
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn engine(&self) -> &Rc<dyn Engine> {
        &self.engine
    }

    /// Enter this instance for the lifetime of the returned guard.
    pub fn scope(&self) -> IsolateScope<'_> {
        IsolateScope::new(&*self.engine, self.id)
    }

    /// Exit and dispose an owned instance; a borrowed one is left running.
    pub fn dispose(mut self) {
        self.dispose_in_place();
    }

    fn dispose_in_place(&mut self) {
        if !self.owned || self.disposed {
            return;
        }
        self.disposed = true;
        self.engine.exit_isolate(self.id);
        self.engine.dispose_isolate(self.id);
        debug!(isolate = %self.id, "disposed owned isolate");
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        self.dispose_in_place();
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Makes an instance the thread-current one until dropped.
pub struct IsolateScope<'a> {
    engine: &'a dyn Engine,
    id: IsolateId,
}

impl<'a> IsolateScope<'a> {
    pub fn new(engine: &'a dyn Engine, id: IsolateId) -> Self {
        engine.enter_isolate(id);
        IsolateScope { engine, id }
    }
}

impl<'a> Drop for IsolateScope<'a> {
    fn drop(&mut self) {
        self.engine.exit_isolate(self.id);
    }
}
