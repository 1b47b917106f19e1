//! Extension module loaded through the platform dynamic linker by the
//! native module tests.

use just_embed::engine::JsValue;
use just_embed::runner::plugin::PluginScope;
use just_embed::runner::Module;

pub struct Gadget;

fn init(scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
    let proto = scope.instantiate(&Module::new().value("kind", "gadget"))?;
    scope
        .register_class::<Gadget>("Gadget", proto.clone())
        .map_err(|e| e.to_string())?;
    let instance = scope.instantiate(&Module::new().value("serial", 7))?;
    scope
        .wrap_object::<Gadget>(instance.clone())
        .map_err(|e| e.to_string())?;

    let name = scope.module_name().to_string();
    scope.instantiate(
        &Module::new()
            .value("name", name)
            .value("ready", true)
            .value("Gadget", proto)
            .value("instance", instance)
            .function("answer", |_| Ok(JsValue::from(42))),
    )
}

just_embed::plugin_init!(init);
