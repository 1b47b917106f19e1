//! Dynamic module table.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::loader::NativeLibrary;
use crate::config::UnloadPolicy;
use crate::engine::JsValue;
use crate::runner::handle::Global;

/// A loaded module: its native library and the value it exported.
///
/// Dropping a record releases the exports and then closes the library.
pub struct DynamicModule {
    exports: Global<JsValue>,
    path: PathBuf,
    library: Option<Box<dyn NativeLibrary>>,
}

impl DynamicModule {
    pub fn new(exports: Global<JsValue>, path: PathBuf, library: Box<dyn NativeLibrary>) -> Self {
        DynamicModule {
            exports,
            path,
            library: Some(library),
        }
    }

    pub fn exports(&self) -> Option<JsValue> {
        self.exports.get()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn release_exports(&mut self) {
        self.exports.reset();
    }

    /// Release the exports and hand the library to `policy`.
    pub(crate) fn finish(mut self, policy: UnloadPolicy) {
        self.exports.reset();
        if let Some(library) = self.library.take() {
            release_library(library, policy);
        }
    }
}

impl fmt::Debug for DynamicModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicModule")
            .field("path", &self.path)
            .field("exports", &self.exports)
            .finish()
    }
}

/// Close `library` or keep it mapped for the rest of the process.
pub(crate) fn release_library(library: Box<dyn NativeLibrary>, policy: UnloadPolicy) {
    match policy {
        UnloadPolicy::Retain => {
            debug!(path = ?library.path(), "retaining module library");
            std::mem::forget(library);
        }
        UnloadPolicy::Unload => {
            debug!(path = ?library.path(), "unloading module library");
            drop(library);
        }
    }
}

/// Loaded modules of one context, keyed by module name.
#[derive(Debug, Default)]
pub struct ModuleTable {
    records: HashMap<String, DynamicModule>,
}

impl ModuleTable {
    pub fn new() -> Self {
        ModuleTable::default()
    }

    pub fn get(&self, name: &str) -> Option<&DynamicModule> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Insert a record. Names are unique; an existing record is returned untouched.
    pub fn insert(&mut self, name: &str, module: DynamicModule) -> Result<(), DynamicModule> {
        if self.records.contains_key(name) {
            return Err(module);
        }
        self.records.insert(name.to_string(), module);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<DynamicModule> {
        self.records.remove(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Module names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn release_all_exports(&mut self) {
        for module in self.records.values_mut() {
            module.release_exports();
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<(String, DynamicModule)> {
        self.records.drain().collect()
    }
}
