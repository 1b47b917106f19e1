//! The contract between the loader and extension modules.

use std::any::{type_name, TypeId};
use std::rc::Rc;

use crate::engine::{ContextId, Engine, IsolateId, JsValue};
use crate::runner::class_registry::{self, ClassError};
use crate::runner::module::Module;

/// Signature of [`PLUGIN_INIT_PROC_NAME`](crate::config::PLUGIN_INIT_PROC_NAME).
///
/// Returns the module's exports, or a message describing why the module
/// could not initialize.
pub type PluginInitFn = fn(&mut PluginScope<'_>) -> Result<JsValue, String>;

/// `(engine, isolate, type, name, value)`; the name is the class name for
/// registration and the type name for wrapping.
type ClassHookFn = fn(&Rc<dyn Engine>, IsolateId, TypeId, &str, JsValue) -> Result<(), ClassError>;

/// Registry entry points of the loading host.
///
/// A module built as a shared library carries its own copy of this crate,
/// statics included. Registry calls made from a module go through these
/// pointers, which are taken in the host, so they land in the table the
/// host purges on context teardown.
#[derive(Clone, Copy)]
struct HostRegistry {
    register_class: ClassHookFn,
    wrap_object: ClassHookFn,
}

impl HostRegistry {
    fn current() -> Self {
        HostRegistry {
            register_class: class_registry::register_class_id,
            wrap_object: class_registry::wrap_object_id,
        }
    }
}

/// What an extension module sees while it initializes.
pub struct PluginScope<'a> {
    engine: &'a Rc<dyn Engine>,
    isolate: IsolateId,
    context: ContextId,
    name: &'a str,
    registry: HostRegistry,
}

impl<'a> PluginScope<'a> {
    pub(crate) fn new(
        engine: &'a Rc<dyn Engine>,
        isolate: IsolateId,
        context: ContextId,
        name: &'a str,
    ) -> Self {
        PluginScope {
            engine,
            isolate,
            context,
            name,
            registry: HostRegistry::current(),
        }
    }

    pub fn engine(&self) -> &Rc<dyn Engine> {
        self.engine
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Name the module was requested under.
    pub fn module_name(&self) -> &str {
        self.name
    }

    /// Instantiate `module` on the loading isolate.
    pub fn instantiate(&self, module: &Module) -> Result<JsValue, String> {
        module
            .new_instance(&**self.engine, self.isolate)
            .map_err(|e| e.to_string())
    }

    /// Register a native class in the host's registry for the loading isolate.
    pub fn register_class<T: 'static>(
        &self,
        name: &str,
        prototype: JsValue,
    ) -> Result<(), ClassError> {
        (self.registry.register_class)(
            self.engine,
            self.isolate,
            TypeId::of::<T>(),
            name,
            prototype,
        )
    }

    /// Track `object` in the host's registry as a wrapper of a native `T`.
    pub fn wrap_object<T: 'static>(&self, object: JsValue) -> Result<(), ClassError> {
        (self.registry.wrap_object)(
            self.engine,
            self.isolate,
            TypeId::of::<T>(),
            type_name::<T>(),
            object,
        )
    }
}

/// Export `$init` as the module entry point of the library being built.
///
/// The symbol name is the same on every platform, but the function uses the
/// Rust ABI and passes Rust types by reference. A module therefore has to be
/// built by the same `rustc` release, against the same version of this crate,
/// as the host that loads it. The module crate is built with
/// `crate-type = ["cdylib"]`.
///
/// `$init` must have the [`PluginInitFn`] signature:
///
/// ```ignore
/// use just_embed::runner::plugin::PluginScope;
/// use just_embed::runner::module::Module;
/// use just_embed::engine::JsValue;
///
/// fn init(scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
///     scope.instantiate(&Module::new().value("ready", true))
/// }
///
/// just_embed::plugin_init!(init);
/// ```
#[macro_export]
macro_rules! plugin_init {
    ($init:path) => {
        #[no_mangle]
        pub fn just_plugin_init(
            scope: &mut $crate::runner::plugin::PluginScope<'_>,
        ) -> ::std::result::Result<$crate::engine::JsValue, ::std::string::String> {
            let init: $crate::runner::plugin::PluginInitFn = $init;
            init(scope)
        }
    };
}
