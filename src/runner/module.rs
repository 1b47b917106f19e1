//! Host-built modules: a named bundle of values and native functions that can
//! be instantiated into any isolate and bound as a global.

use crate::engine::{
    Engine, EngineError, IsolateId, JsValue, NativeFunction, ObjectTemplate, ScriptError,
};

/// Module definition.
///
/// ```
/// use just_embed::runner::module::Module;
/// use just_embed::engine::JsValue;
///
/// let console = Module::new()
///     .value("version", "1.0")
///     .function("echo", |args| Ok(args.first().cloned().unwrap_or(JsValue::Undefined)));
/// assert_eq!(console.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Module {
    template: ObjectTemplate,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    /// Add a native function.
    pub fn function<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[JsValue]) -> Result<JsValue, ScriptError> + 'static,
    {
        self.template.set_function(name, NativeFunction::new(func));
        self
    }

    /// Add a property.
    pub fn value(mut self, name: impl Into<String>, value: impl Into<JsValue>) -> Self {
        self.template.set_value(name, value);
        self
    }

    /// Nest another module under `name`.
    pub fn submodule(mut self, name: impl Into<String>, module: Module) -> Self {
        self.template.set_object(name, module.template);
        self
    }

    /// Instances reject writes from scripts and hosts.
    pub fn read_only(mut self) -> Self {
        self.template.set_read_only(true);
        self
    }

    pub fn template(&self) -> &ObjectTemplate {
        &self.template
    }

    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// Create a fresh object for this module on `isolate`.
    pub fn new_instance(&self, engine: &dyn Engine, isolate: IsolateId) -> Result<JsValue, EngineError> {
        engine.instantiate(isolate, &self.template)
    }
}

impl From<ObjectTemplate> for Module {
    fn from(template: ObjectTemplate) -> Self {
        Module { template }
    }
}
