//! Per-isolate table of native types exposed to scripts.
//!
//! Each registered native type maps to the prototype object scripts see, and
//! every object wrapped for that type is tracked alongside it. Entries hold
//! durable references into the isolate, so [`cleanup`] must run before the
//! isolate's contexts and the isolate itself go away. Hosts and modules can
//! also park arbitrary native data and teardown hooks per isolate.
//!
//! The table is thread local: an isolate is only ever used from the thread
//! that entered it.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::engine::{Engine, EngineError, IsolateId, JsValue};
use crate::runner::handle::Global;

#[derive(Debug, thiserror::Error)]
pub enum ClassError {
    #[error("class `{name}` is already registered for this isolate")]
    AlreadyRegistered { name: String },

    #[error("type `{type_name}` has no registered class")]
    Unregistered { type_name: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct ClassEntry {
    name: String,
    prototype: Global<JsValue>,
    instances: Vec<Global<JsValue>>,
}

#[derive(Default)]
struct InstanceData {
    classes: HashMap<TypeId, ClassEntry>,
    external: HashMap<String, Box<dyn Any>>,
    hooks: Vec<Box<dyn FnOnce(IsolateId)>>,
}

thread_local! {
    static REGISTRY: RefCell<HashMap<IsolateId, InstanceData>> = RefCell::new(HashMap::new());
}

fn with_instance<R>(isolate: IsolateId, f: impl FnOnce(&mut InstanceData) -> R) -> R {
    REGISTRY.with(|r| f(r.borrow_mut().entry(isolate).or_default()))
}

fn with_existing<R>(isolate: IsolateId, f: impl FnOnce(&InstanceData) -> Option<R>) -> Option<R> {
    REGISTRY.with(|r| r.borrow().get(&isolate).and_then(f))
}

/// Expose native type `T` under `name`, with `prototype` as its scripted prototype.
pub fn register_class<T: 'static>(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    name: &str,
    prototype: JsValue,
) -> Result<(), ClassError> {
    register_class_id(engine, isolate, TypeId::of::<T>(), name, prototype)
}

/// [`register_class`] keyed by an already computed type identity.
///
/// Extension modules link their own copy of this crate; they reach the host's
/// table through this entry point instead of their own thread-local.
pub fn register_class_id(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    type_id: TypeId,
    name: &str,
    prototype: JsValue,
) -> Result<(), ClassError> {
    let exists = with_existing(isolate, |d| d.classes.get(&type_id).map(|_| ()));
    if exists.is_some() {
        return Err(ClassError::AlreadyRegistered {
            name: name.to_string(),
        });
    }
    let prototype = Global::new(engine, isolate, prototype)?;
    with_instance(isolate, |d| {
        d.classes.insert(
            type_id,
            ClassEntry {
                name: name.to_string(),
                prototype,
                instances: Vec::new(),
            },
        )
    });
    debug!(isolate = %isolate, class = name, "class registered");
    Ok(())
}

/// The prototype registered for `T`.
pub fn find_class<T: 'static>(isolate: IsolateId) -> Option<JsValue> {
    with_existing(isolate, |d| {
        d.classes
            .get(&TypeId::of::<T>())
            .and_then(|c| c.prototype.get())
    })
}

pub fn class_name<T: 'static>(isolate: IsolateId) -> Option<String> {
    with_existing(isolate, |d| {
        d.classes.get(&TypeId::of::<T>()).map(|c| c.name.clone())
    })
}

/// Track `object` as a scripted wrapper of a native `T`.
pub fn wrap_object<T: 'static>(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    object: JsValue,
) -> Result<(), ClassError> {
    wrap_object_id(engine, isolate, TypeId::of::<T>(), type_name::<T>(), object)
}

/// [`wrap_object`] keyed by an already computed type identity.
pub fn wrap_object_id(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    type_id: TypeId,
    type_name: &str,
    object: JsValue,
) -> Result<(), ClassError> {
    let registered = with_existing(isolate, |d| d.classes.get(&type_id).map(|_| ()));
    if registered.is_none() {
        return Err(ClassError::Unregistered {
            type_name: type_name.to_string(),
        });
    }
    let handle = Global::new(engine, isolate, object)?;
    with_instance(isolate, |d| {
        if let Some(entry) = d.classes.get_mut(&type_id) {
            entry.instances.push(handle);
        }
    });
    Ok(())
}

pub fn wrapped_count<T: 'static>(isolate: IsolateId) -> usize {
    with_existing(isolate, |d| {
        d.classes.get(&TypeId::of::<T>()).map(|c| c.instances.len())
    })
    .unwrap_or(0)
}

pub fn class_count(isolate: IsolateId) -> usize {
    with_existing(isolate, |d| Some(d.classes.len())).unwrap_or(0)
}

/// Attach native data to an isolate, replacing any previous value under `key`.
pub fn set_external_data(isolate: IsolateId, key: &str, data: Box<dyn Any>) {
    with_instance(isolate, |d| {
        d.external.insert(key.to_string(), data);
    });
}

pub fn has_external_data(isolate: IsolateId, key: &str) -> bool {
    with_existing(isolate, |d| d.external.get(key).map(|_| ())).is_some()
}

/// Run `hook` when the isolate's registry is cleaned up.
pub fn on_cleanup(isolate: IsolateId, hook: impl FnOnce(IsolateId) + 'static) {
    with_instance(isolate, |d| d.hooks.push(Box::new(hook)));
}

/// Drop every class, wrapped object, external datum and hook of `isolate`.
///
/// Safe to call repeatedly and on isolates that never registered anything.
/// Returns the number of classes removed.
pub fn cleanup(isolate: IsolateId) -> usize {
    let data = REGISTRY.with(|r| r.borrow_mut().remove(&isolate));
    let data = match data {
        Some(d) => d,
        None => return 0,
    };
    let InstanceData {
        classes,
        external,
        hooks,
    } = data;
    let count = classes.len();
    // Resetting the durable references calls back into the engine.
    drop(classes);
    drop(external);
    for hook in hooks {
        hook(isolate);
    }
    debug!(isolate = %isolate, classes = count, "class registry purged");
    count
}
