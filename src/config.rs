//! Plugin constants fixed at build time and the TOML module configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Symbol every loadable module exports as its initialization entry point.
///
/// [`plugin_init!`](crate::plugin_init) emits a function with exactly this name.
pub const PLUGIN_INIT_PROC_NAME: &str = "just_plugin_init";

#[cfg(target_os = "windows")]
const DEFAULT_PLUGIN_SUFFIX: &str = ".dll";
#[cfg(target_os = "macos")]
const DEFAULT_PLUGIN_SUFFIX: &str = ".dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_PLUGIN_SUFFIX: &str = ".so";

/// Filename suffix appended to a module name when resolving its library.
///
/// Set `JUST_PLUGIN_SUFFIX` while building to override the platform default.
pub const PLUGIN_SUFFIX: &str = match option_env!("JUST_PLUGIN_SUFFIX") {
    Some(suffix) => suffix,
    None => DEFAULT_PLUGIN_SUFFIX,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid module config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What happens to a module's native library when its context is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnloadPolicy {
    /// Keep the library mapped for the rest of the process.
    #[default]
    Retain,
    /// Close the library once the context's isolate is gone.
    Unload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Install `require` and `run` in new contexts.
    pub default_globals: bool,
    /// Enter each new context on creation.
    pub enter: bool,
}

impl Default for ContextSection {
    fn default() -> Self {
        ContextSection {
            default_globals: true,
            enter: true,
        }
    }
}

/// A module to load right after context creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreloadEntry {
    pub name: String,
    /// Global name to bind the exports to; defaults to `name`.
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl PreloadEntry {
    pub fn binding(&self) -> &str {
        self.bind.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModulesSection {
    pub search_path: Vec<PathBuf>,
    pub unload: UnloadPolicy,
    pub preload: Vec<PreloadEntry>,
}

/// Complete module configuration.
///
/// Expected format:
/// ```toml
/// [context]
/// default_globals = true
/// enter = true
///
/// [modules]
/// search_path = ["./plugins"]
/// unload = "retain"
/// preload = [
///     { name = "fs", bind = "fs", enabled = true }
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub context: ContextSection,
    pub modules: ModulesSection,
}

impl ModuleConfig {
    pub fn new() -> Self {
        ModuleConfig::default()
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Enabled preload entries, in file order.
    pub fn enabled_preloads(&self) -> impl Iterator<Item = &PreloadEntry> {
        self.modules.preload.iter().filter(|p| p.enabled)
    }
}
