//! Opening native libraries and locating their entry points.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::trace;

use super::entry::PluginInitFn;
use super::ModuleError;
use crate::config::PLUGIN_SUFFIX;

/// An opened native library. Closing happens on drop.
pub trait NativeLibrary {
    /// Resolve the module entry point exported as `symbol`.
    ///
    /// The returned pointer is only valid while this library stays open.
    fn init_fn(&self, symbol: &str) -> Result<PluginInitFn, ModuleError>;

    fn path(&self) -> &Path;
}

/// The dynamic-linker capability the module loader consumes.
pub trait LibraryLoader {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, ModuleError>;
}

/// Loader backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

struct Dylib {
    library: Library,
    path: PathBuf,
}

impl LibraryLoader for DylibLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, ModuleError> {
        // SAFETY: opening runs the library's static initializers; modules are
        // trusted extensions chosen by the host.
        let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(Dylib {
            library,
            path: path.to_path_buf(),
        }))
    }
}

impl NativeLibrary for Dylib {
    fn init_fn(&self, symbol: &str) -> Result<PluginInitFn, ModuleError> {
        // SAFETY: the entry-point contract fixes the type of this symbol.
        let init: Symbol<PluginInitFn> =
            unsafe { self.library.get(symbol.as_bytes()) }.map_err(|_| {
                ModuleError::MissingEntryPoint {
                    path: self.path.clone(),
                    symbol: symbol.to_string(),
                }
            })?;
        Ok(*init)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// File name a module is expected under.
pub fn module_file_name(name: &str) -> String {
    format!("{}{}", name, PLUGIN_SUFFIX)
}

/// Candidate paths for `name`, in search order.
///
/// An empty search path means the working directory. That candidate keeps a
/// `./` prefix: the dynamic linker treats a bare file name as a request to
/// search the system library path, not the file that passed [`LibraryLoader::exists`].
pub fn candidate_paths(search_paths: &[PathBuf], name: &str) -> Vec<PathBuf> {
    let file = module_file_name(name);
    if search_paths.is_empty() {
        return vec![Path::new(".").join(file)];
    }
    search_paths.iter().map(|dir| dir.join(&file)).collect()
}

/// First existing candidate for `name`.
pub fn resolve_module_path(
    loader: &dyn LibraryLoader,
    search_paths: &[PathBuf],
    name: &str,
) -> Result<PathBuf, ModuleError> {
    let candidates = candidate_paths(search_paths, name);
    for candidate in &candidates {
        trace!(module = name, path = ?candidate, "probing module path");
        if loader.exists(candidate) {
            return Ok(candidate.clone());
        }
    }
    Err(ModuleError::NotFound {
        name: name.to_string(),
        searched: candidates,
    })
}
