pub mod class_registry;
pub mod context;
mod globals;
pub mod handle;
pub mod isolate;
pub mod module;
pub mod plugin;

pub use context::{Context, ContextError, ContextOptions};
pub use globals::{REQUIRE, RUN};
pub use handle::{Global, HandleScope};
pub use isolate::{Isolate, IsolateScope};
pub use module::Module;
