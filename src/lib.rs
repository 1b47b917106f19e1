//! # just-embed - embedding layer for a scripting engine
//!
//! Native hosts use this crate to run scripts and expose native code to them:
//! - Execution contexts over owned or borrowed engine instances (isolates)
//! - Host-built modules bound as globals
//! - Native extension modules loaded from shared libraries at runtime
//! - A per-isolate registry of native classes, purged on context teardown
//! - A byte allocator for array buffer backing stores
//!
//! ## Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use just_embed::engine::{HeapEngine, JsValue};
//! use just_embed::runner::{Context, ContextOptions, Module};
//!
//! let engine = Rc::new(HeapEngine::new());
//! let mut ctx = Context::new(engine, ContextOptions::default()).unwrap();
//!
//! ctx.set("answer", 42);
//! ctx.bind_module("greeter", &Module::new().value("greeting", "hello"));
//!
//! let v = ctx.run_script("greeter.greeting + ' ' + answer").unwrap();
//! assert_eq!(v, JsValue::from("hello 42"));
//! ```
//!
//! ## Extension Modules
//!
//! A context installs `require(name)` in its global object unless told
//! otherwise. `require("fs")` probes every search path for
//! `fs` + [`PLUGIN_SUFFIX`](config::PLUGIN_SUFFIX), opens the library, calls
//! its `just_plugin_init` entry point and caches the exports per context:
//!
//! ```text
//! script: require("fs")
//!     ↓
//! Context module table ── hit ──→ cached exports
//!     ↓ miss
//! search paths → shared library → just_plugin_init(scope) → exports
//! ```
//!
//! Modules declare their entry point with [`plugin_init!`].
//!
//! ## Architecture
//!
//! - **[`engine`]** - The engine capability ([`engine::Engine`]), values,
//!   templates, the allocator and the in-process [`engine::HeapEngine`]
//! - **[`runner`]** - Contexts, isolates, handles and module loading
//!   - **[`runner::plugin`]** - Dynamic extension modules
//!   - **[`runner::class_registry`]** - Per-isolate native class table
//! - **[`config`]** - Module loader configuration

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod engine;
pub mod runner;

pub use runner::{Context, ContextError, ContextOptions, Module};
