//! Loading a real extension module through the platform dynamic linker.
//!
//! The module under `tests/fixtures/gadget` is built once per test run into
//! the test target directory.

extern crate just_embed;
#[macro_use]
extern crate lazy_static;

mod common;

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use tempfile::TempDir;

use just_embed::config::UnloadPolicy;
use just_embed::engine::{Engine, HeapEngine, JsValue};
use just_embed::runner::class_registry;
use just_embed::runner::plugin::loader::module_file_name;
use just_embed::runner::plugin::DylibLoader;
use just_embed::{Context, ContextOptions};

lazy_static! {
    static ref GADGET_LIBRARY: PathBuf = build_gadget();
}

fn build_gadget() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/gadget/Cargo.toml");
    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("fixtures");
    let output = Command::new(option_env!("CARGO").unwrap_or("cargo"))
        .arg("build")
        .arg("--offline")
        .arg("--manifest-path")
        .arg(&manifest)
        .arg("--target-dir")
        .arg(&target_dir)
        .output()
        .expect("failed to run cargo");
    assert!(
        output.status.success(),
        "building the gadget module failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let library = target_dir
        .join("debug")
        .join(format!("{}gadget{}", DLL_PREFIX, DLL_SUFFIX));
    assert!(library.is_file(), "{:?} was not produced", library);
    library
}

/// A fresh directory holding the gadget module under its module file name.
fn module_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(&*GADGET_LIBRARY, dir.path().join(module_file_name("gadget"))).unwrap();
    dir
}

fn context_in(heap: &Rc<HeapEngine>, dir: &Path, policy: UnloadPolicy) -> Context {
    common::init_tracing();
    Context::new(
        heap.clone(),
        ContextOptions::new()
            .search_path(dir)
            .with_loader(Rc::new(DylibLoader))
            .unload_policy(policy),
    )
    .unwrap()
}

#[test]
fn test_native_module_loads_and_runs() {
    let dir = module_dir();
    let heap = Rc::new(HeapEngine::new());
    let mut ctx = context_in(&heap, dir.path(), UnloadPolicy::Unload);

    let exports = ctx.load_module("gadget").unwrap();
    assert_eq!(ctx.loaded_modules(), vec!["gadget".to_string()]);
    ctx.set("gadget", exports);
    assert_eq!(ctx.run_script("gadget.name").unwrap(), JsValue::from("gadget"));
    assert_eq!(ctx.run_script("gadget.ready").unwrap(), JsValue::Boolean(true));
    assert_eq!(ctx.run_script("gadget.answer()").unwrap(), JsValue::from(42));
    assert_eq!(ctx.run_script("gadget.Gadget.kind").unwrap(), JsValue::from("gadget"));
}

#[test]
fn test_native_module_reload_returns_same_exports() {
    let dir = module_dir();
    let heap = Rc::new(HeapEngine::new());
    let mut ctx = context_in(&heap, dir.path(), UnloadPolicy::Retain);

    let first = ctx.load_module("gadget").unwrap();
    let second = ctx.load_module("gadget").unwrap();
    assert_eq!(first, second);
    assert_eq!(ctx.module_count(), 1);
}

#[test]
fn test_native_module_classes_land_in_host_registry() {
    let dir = module_dir();
    let heap = Rc::new(HeapEngine::new());
    let mut ctx = context_in(&heap, dir.path(), UnloadPolicy::Unload);
    let isolate = ctx.isolate().unwrap();

    let before = heap.persistent_count(isolate);
    ctx.load_module("gadget").unwrap();
    assert_eq!(class_registry::class_count(isolate), 1);
    // Exports, class prototype and wrapped instance.
    assert_eq!(heap.persistent_count(isolate), before + 3);

    ctx.destroy();
    assert_eq!(class_registry::class_count(isolate), 0);
    assert!(!heap.is_alive(isolate));
    assert_eq!(heap.disposed_isolates(), 1);
}

#[test]
fn test_native_module_context_releases_engine() {
    let dir = module_dir();
    let heap = Rc::new(HeapEngine::new());
    {
        let mut ctx = context_in(&heap, dir.path(), UnloadPolicy::Unload);
        ctx.load_module("gadget").unwrap();
        assert!(Rc::strong_count(&heap) > 1);
        ctx.destroy();
    }
    assert_eq!(Rc::strong_count(&heap), 1);
    assert_eq!(heap.live_isolates(), 0);
}

#[test]
fn test_native_module_found_in_working_directory() {
    let dir = module_dir();
    std::env::set_current_dir(dir.path()).unwrap();

    let heap = Rc::new(HeapEngine::new());
    let mut ctx = Context::new(heap.clone(), ContextOptions::new()).unwrap();
    assert!(ctx.search_paths().is_empty());
    let exports = ctx.load_module("gadget").unwrap();
    ctx.set("gadget", exports);
    assert_eq!(ctx.run_script("gadget.answer()").unwrap(), JsValue::from(42));
    ctx.destroy();
    assert_eq!(heap.current_isolate(), None);
}
