//! Helpers installed into a context's global object on request.
//!
//! - `require(name)` loads an extension module through the context's loader
//!   and returns its exports.
//! - `run(path)` executes a script file in the same context.
//!
//! Both hold only weak references to the engine and the context's module
//! state, so they never keep a destroyed context alive.

use std::cell::RefCell;
use std::fs;
use std::rc::{Rc, Weak};

use crate::engine::{
    ContextId, Engine, EngineError, IsolateId, JsValue, NativeFunction, ObjectId, ObjectTemplate,
    ScriptError,
};
use crate::runner::plugin::{self, ModuleHost};

pub const REQUIRE: &str = "require";
pub const RUN: &str = "run";

fn string_arg(args: &[JsValue], helper: &str) -> Result<String, ScriptError> {
    match args.first() {
        Some(JsValue::String(s)) => Ok(s.clone()),
        _ => Err(ScriptError::Type(format!("{} expects a string argument", helper))),
    }
}

fn upgrade<T: ?Sized>(weak: &Weak<T>) -> Result<Rc<T>, ScriptError> {
    weak.upgrade()
        .ok_or_else(|| ScriptError::Native("context has been destroyed".to_string()))
}

fn require_fn(
    engine: Weak<dyn Engine>,
    host: Weak<RefCell<ModuleHost>>,
    isolate: IsolateId,
    context: ContextId,
) -> NativeFunction {
    NativeFunction::new(move |args| {
        let name = string_arg(args, REQUIRE)?;
        let engine = upgrade(&engine)?;
        let host = upgrade(&host)?;
        plugin::load(&engine, isolate, context, &host, &name)
            .map_err(|e| ScriptError::Native(e.to_string()))
    })
}

fn run_fn(engine: Weak<dyn Engine>, isolate: IsolateId, context: ContextId) -> NativeFunction {
    NativeFunction::new(move |args| {
        let path = string_arg(args, RUN)?;
        let engine = upgrade(&engine)?;
        let source = fs::read_to_string(&path)
            .map_err(|e| ScriptError::Native(format!("cannot read {}: {}", path, e)))?;
        engine.run_script(isolate, context, &source, &path)
    })
}

/// Define `require` and `run` on `global`.
pub(crate) fn install(
    engine: &Rc<dyn Engine>,
    isolate: IsolateId,
    context: ContextId,
    global: ObjectId,
    host: &Rc<RefCell<ModuleHost>>,
) -> Result<(), EngineError> {
    let mut helpers = ObjectTemplate::new();
    helpers.set_function(
        REQUIRE,
        require_fn(Rc::downgrade(engine), Rc::downgrade(host), isolate, context),
    );
    helpers.set_function(RUN, run_fn(Rc::downgrade(engine), isolate, context));

    let holder = engine
        .instantiate(isolate, &helpers)?
        .as_object()
        .ok_or_else(|| EngineError::ContextCreation {
            reason: "helper template did not produce an object".to_string(),
        })?;
    for name in [REQUIRE, RUN] {
        let func = engine.get_property(isolate, holder, name)?;
        engine.set_property(isolate, global, name, func)?;
    }
    Ok(())
}
