//! Loading extension modules into a context.

extern crate just_embed;

mod common;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use common::{module_path, Event, FakeLoader, RecordingEngine};
use just_embed::config::{ModuleConfig, UnloadPolicy, PLUGIN_SUFFIX};
use just_embed::engine::{HeapEngine, JsValue, ScriptError};
use just_embed::runner::class_registry;
use just_embed::runner::plugin::{ModuleError, PluginScope};
use just_embed::runner::{Context, ContextError, ContextOptions, Module};

const PLUGIN_DIR: &str = "/opt/just/plugins";

mod greeter_plugin {
    use super::*;

    fn init(scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
        let name = scope.module_name().to_string();
        scope.instantiate(&Module::new().value("name", name).value("ready", true))
    }

    just_embed::plugin_init!(init);
}

fn counter_init(scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
    scope.instantiate(&Module::new().value("count", 0))
}

fn failing_init(_scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
    Err("database unavailable".to_string())
}

struct Gadget;

fn gadget_init(scope: &mut PluginScope<'_>) -> Result<JsValue, String> {
    let proto = scope.instantiate(&Module::new().value("kind", "gadget"))?;
    scope
        .register_class::<Gadget>("Gadget", proto.clone())
        .map_err(|e| e.to_string())?;
    scope.instantiate(&Module::new().value("Gadget", proto))
}

fn standard_loader() -> FakeLoader {
    FakeLoader::new()
        .with_module(PLUGIN_DIR, "greeter", greeter_plugin::just_plugin_init)
        .with_module(PLUGIN_DIR, "counter", counter_init)
        .with_module(PLUGIN_DIR, "failing", failing_init)
        .with_module(PLUGIN_DIR, "gadget", gadget_init)
        .with_library(PLUGIN_DIR, "hollow")
}

fn context_with(loader: &Rc<FakeLoader>, policy: UnloadPolicy) -> Context {
    common::init_tracing();
    Context::new(
        Rc::new(HeapEngine::new()),
        ContextOptions::new()
            .search_path(PLUGIN_DIR)
            .with_loader(loader.clone())
            .unload_policy(policy),
    )
    .unwrap()
}

#[test]
fn test_missing_module_with_empty_search_path() {
    let mut ctx = Context::with_defaults(Rc::new(HeapEngine::new())).unwrap();
    assert!(ctx.search_paths().is_empty());
    assert_eq!(ctx.module_count(), 0);
    match ctx.load_module("missing") {
        Err(ModuleError::NotFound { name, searched }) => {
            assert_eq!(name, "missing");
            assert_eq!(
                searched,
                vec![Path::new(".").join(format!("missing{}", PLUGIN_SUFFIX))]
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.module_count(), 0);
}

#[test]
fn test_load_records_exports() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Retain);

    let exports = ctx.load_module("greeter").unwrap();
    assert!(exports.as_object().is_some());
    assert_eq!(ctx.module_count(), 1);
    assert_eq!(ctx.loaded_modules(), vec!["greeter".to_string()]);
    assert_eq!(ctx.module_exports("greeter"), Some(exports.clone()));

    ctx.set("greeter", exports);
    assert_eq!(ctx.run_script("greeter.name").unwrap(), JsValue::from("greeter"));
    assert_eq!(ctx.run_script("greeter.ready").unwrap(), JsValue::Boolean(true));
}

#[test]
fn test_reload_returns_existing_record() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Retain);

    let first = ctx.load_module("counter").unwrap();
    let second = ctx.load_module("counter").unwrap();
    assert_eq!(first, second);
    assert_eq!(loader.opened(), 1);
    assert_eq!(ctx.module_count(), 1);
}

#[test]
fn test_init_failure_is_distinguishable() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Retain);

    let err = ctx.load_module("failing").unwrap_err();
    assert!(err.is_init_failure());
    match err {
        ModuleError::Init { name, message } => {
            assert_eq!(name, "failing");
            assert_eq!(message, "database unavailable");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.module_count(), 0);
    // Retained: the library may already have handed out code.
    assert_eq!(loader.closed(), 0);

    let missing = ctx.load_module("absent").unwrap_err();
    assert!(!missing.is_init_failure());
}

#[test]
fn test_init_failure_closes_library_when_unloading() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Unload);
    assert!(ctx.load_module("failing").unwrap_err().is_init_failure());
    assert_eq!(loader.closed(), 1);
}

#[test]
fn test_missing_entry_point() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Unload);
    match ctx.load_module("hollow") {
        Err(ModuleError::MissingEntryPoint { path, symbol }) => {
            assert_eq!(path, module_path(PLUGIN_DIR, "hollow"));
            assert_eq!(symbol, just_embed::config::PLUGIN_INIT_PROC_NAME);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.module_count(), 0);
    assert_eq!(loader.closed(), 1);
}

#[test]
fn test_destroy_with_loaded_modules_retains_libraries() {
    let engine = RecordingEngine::new();
    let loader = Rc::new(standard_loader());
    let mut ctx = Context::new(
        engine.clone(),
        ContextOptions::new()
            .search_path(PLUGIN_DIR)
            .with_loader(loader.clone()),
    )
    .unwrap();
    let context = ctx.id().unwrap();
    engine.watch_purge(ctx.isolate().unwrap());
    ctx.load_module("greeter").unwrap();
    ctx.load_module("counter").unwrap();
    assert_eq!(ctx.module_count(), 2);

    engine.clear();
    ctx.destroy();
    let events = engine.events();
    assert_eq!(events[0], Event::Purge);
    assert_eq!(events[1], Event::ExitContext(context));
    // Scope reference, then both module exports.
    assert_eq!(
        &events[2..5],
        &[
            Event::ResetPersistent,
            Event::ResetPersistent,
            Event::ResetPersistent
        ]
    );
    assert_eq!(&events[5..], &[Event::ExitIsolate, Event::DisposeIsolate]);
    assert_eq!(loader.opened(), 2);
    assert_eq!(loader.closed(), 0);
    assert_eq!(engine.heap.disposed_isolates(), 1);
}

#[test]
fn test_unload_policy_closes_libraries_after_dispose() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Unload);
    ctx.load_module("greeter").unwrap();
    ctx.load_module("counter").unwrap();
    assert_eq!(loader.closed(), 0);
    ctx.destroy();
    assert_eq!(loader.closed(), 2);
}

#[test]
fn test_unload_module() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Retain);
    ctx.load_module("counter").unwrap();

    assert!(ctx.unload_module("counter"));
    assert_eq!(ctx.module_count(), 0);
    assert_eq!(ctx.module_exports("counter"), None);
    assert_eq!(loader.closed(), 1);
    assert!(!ctx.unload_module("counter"));

    ctx.load_module("counter").unwrap();
    assert_eq!(loader.opened(), 2);
}

#[test]
fn test_require_from_script() {
    let loader = Rc::new(standard_loader());
    let ctx = context_with(&loader, UnloadPolicy::Retain);

    assert_eq!(
        ctx.run_script("var g = require('greeter'); g.name").unwrap(),
        JsValue::from("greeter")
    );
    assert_eq!(ctx.module_count(), 1);
    ctx.run_script("var again = require('greeter')").unwrap();
    assert_eq!(ctx.get("again").unwrap(), ctx.get("g").unwrap());
    assert_eq!(loader.opened(), 1);

    match ctx.run_script("require('nowhere')") {
        Err(ContextError::Script(ScriptError::Native(msg))) => {
            assert!(msg.contains("nowhere"), "{}", msg)
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_search_paths_probe_in_order() {
    let loader = Rc::new(FakeLoader::new().with_module("/second", "counter", counter_init));
    let mut ctx = Context::new(
        Rc::new(HeapEngine::new()),
        ContextOptions::new()
            .search_path("/first")
            .with_loader(loader.clone()),
    )
    .unwrap();
    assert!(matches!(
        ctx.load_module("counter"),
        Err(ModuleError::NotFound { .. })
    ));
    ctx.add_search_path("/second");
    assert_eq!(
        ctx.search_paths(),
        vec![PathBuf::from("/first"), PathBuf::from("/second")]
    );
    ctx.load_module("counter").unwrap();

    ctx.set_search_paths(Vec::new());
    assert!(ctx.search_paths().is_empty());
    // Already loaded modules stay available.
    assert!(ctx.load_module("counter").is_ok());
}

#[test]
fn test_module_classes_purged_with_context() {
    let loader = Rc::new(standard_loader());
    let mut ctx = context_with(&loader, UnloadPolicy::Retain);
    let isolate = ctx.isolate().unwrap();
    ctx.load_module("gadget").unwrap();
    assert_eq!(class_registry::class_name::<Gadget>(isolate).as_deref(), Some("Gadget"));

    ctx.destroy();
    assert_eq!(class_registry::class_count(isolate), 0);
}

#[test]
fn test_load_on_inert_context() {
    let mut ctx = Context::default();
    assert!(matches!(ctx.load_module("greeter"), Err(ModuleError::Inert)));
    assert!(!ctx.unload_module("greeter"));
    assert_eq!(ctx.module_count(), 0);
}

#[test]
fn test_load_configured_modules() {
    let config = ModuleConfig::parse(&format!(
        r#"
[context]
default_globals = false

[modules]
search_path = ["{dir}"]
unload = "unload"
preload = [
    {{ name = "greeter", bind = "hello" }},
    {{ name = "counter" }},
    {{ name = "failing", enabled = false }},
]
"#,
        dir = PLUGIN_DIR
    ))
    .unwrap();

    let loader = Rc::new(standard_loader());
    let mut ctx = Context::new(
        Rc::new(HeapEngine::new()),
        ContextOptions::from_config(&config).with_loader(loader.clone()),
    )
    .unwrap();
    assert_eq!(ctx.get("require").unwrap(), JsValue::Undefined);

    ctx.load_configured_modules(&config).unwrap();
    assert_eq!(ctx.loaded_modules(), vec!["counter".to_string(), "greeter".to_string()]);
    assert_eq!(ctx.run_script("hello.name").unwrap(), JsValue::from("greeter"));
    assert_eq!(ctx.run_script("counter.count").unwrap(), JsValue::from(0));

    drop(ctx);
    assert_eq!(loader.closed(), 2);
}
