//! Plugin module loading.
//!
//! The registry never touches dynamic linking directly: it asks a
//! [`ModuleLoader`] to locate a module on the search paths and to load it,
//! and gets back a [`PluginModule`] that creates and destroys instances.
//! Dropping a module unloads it.

use std::collections::HashMap;
use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};

use beliefstate_plugin::{
    ApiVersionFn, CreateFn, DestroyFn, PluginBox, API_VERSION, API_VERSION_SYMBOL, CREATE_SYMBOL,
    DESTROY_SYMBOL,
};
use libloading::Library;

use crate::error::CoreError;

// ─── Traits ─────────────────────────────────────────────────────────────

/// A loaded module able to produce plugin instances.
pub trait PluginModule: Send {
    /// Where the module was loaded from.
    fn path(&self) -> &Path;

    /// Call the module's factory.
    fn create(&self) -> Result<PluginBox, CoreError>;

    /// Release an instance through the module that created it.
    fn destroy(&self, instance: PluginBox);
}

/// Resolves plugin names to modules and loads them.
pub trait ModuleLoader: Send {
    /// Module file name for a bare plugin name.
    fn file_name(&self, name: &str) -> String {
        module_file_name(name)
    }

    /// First search path holding the module file; later paths are never
    /// consulted once one matches.
    fn locate(&self, name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
        let file_name = self.file_name(name);
        search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    fn load(&self, name: &str, path: &Path) -> Result<Box<dyn PluginModule>, CoreError>;
}

/// `{DLL_PREFIX}bs_plugin_{name}{DLL_SUFFIX}`, e.g. `libbs_plugin_ros.so`.
pub fn module_file_name(name: &str) -> String {
    format!(
        "{}bs_plugin_{}{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_SUFFIX
    )
}

/// Whether a module built against `found` can be driven by this host.
pub fn api_compatible(found: &str) -> bool {
    let (Ok(host), Ok(found)) = (
        semver::Version::parse(API_VERSION),
        semver::Version::parse(found),
    ) else {
        return false;
    };
    let requirement = if host.major == 0 {
        format!("^{}.{}", host.major, host.minor)
    } else {
        format!("^{}", host.major)
    };
    semver::VersionReq::parse(&requirement).is_ok_and(|req| req.matches(&found))
}

// ─── Dynamic libraries ──────────────────────────────────────────────────

/// Loads `cdylib` plugin modules with `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, name: &str, path: &Path) -> Result<Box<dyn PluginModule>, CoreError> {
        // SAFETY: loading a plugin runs its initialisers; modules are trusted
        // by configuration.
        let library = unsafe { Library::new(path) }.map_err(|source| CoreError::Library {
            path: path.to_path_buf(),
            source,
        })?;

        let api_version: ApiVersionFn = symbol(&library, path, API_VERSION_SYMBOL)?;
        // SAFETY: the exported function returns a static NUL-terminated string.
        let found = unsafe { CStr::from_ptr(api_version()) }
            .to_string_lossy()
            .into_owned();
        if !api_compatible(&found) {
            return Err(CoreError::ApiMismatch {
                plugin: name.to_string(),
                found,
                expected: API_VERSION.to_string(),
            });
        }

        let create: CreateFn = symbol(&library, path, CREATE_SYMBOL)?;
        let destroy: DestroyFn = symbol(&library, path, DESTROY_SYMBOL)?;

        tracing::debug!(plugin = %name, path = %path.display(), api = %found, "module loaded");

        Ok(Box::new(DylibModule {
            name: name.to_string(),
            path: path.to_path_buf(),
            create,
            destroy,
            _library: library,
        }))
    }
}

fn symbol<T: Copy>(library: &Library, path: &Path, symbol: &'static str) -> Result<T, CoreError> {
    // SAFETY: symbol types are fixed by the plugin entry-point contract.
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|_| CoreError::MissingSymbol {
            path: path.to_path_buf(),
            symbol,
        })
}

/// A loaded shared library. The function pointers stay valid for as long
/// as `_library` is alive, which is the lifetime of this value.
struct DylibModule {
    name: String,
    path: PathBuf,
    create: CreateFn,
    destroy: DestroyFn,
    _library: Library,
}

impl fmt::Debug for DylibModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PluginModule for DylibModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self) -> Result<PluginBox, CoreError> {
        // SAFETY: factory from the module's entry-point contract.
        let raw = unsafe { (self.create)() };
        if raw.is_null() {
            return Err(CoreError::NullInstance(self.name.clone()));
        }
        // SAFETY: non-null pointer produced by `Box::into_raw` in the module;
        // the outer box is reclaimed here, the instance is handed back to
        // the module's destructor in `destroy`.
        Ok(*unsafe { Box::from_raw(raw) })
    }

    fn destroy(&self, instance: PluginBox) {
        let raw = Box::into_raw(Box::new(instance));
        // SAFETY: ownership moves to the module that allocated the instance.
        unsafe { (self.destroy)(raw) };
    }
}

impl Drop for DylibModule {
    fn drop(&mut self) {
        tracing::debug!(plugin = %self.name, path = %self.path.display(), "module unloaded");
    }
}

// ─── In-process modules ─────────────────────────────────────────────────

type Factory = Box<dyn Fn() -> PluginBox + Send + Sync>;

/// Serves plugins compiled into the host, registered by name.
///
/// Module resolution ignores the search paths: a registered name always
/// resolves, an unknown one never does.
#[derive(Default)]
pub struct StaticLoader {
    factories: HashMap<String, std::sync::Arc<Factory>>,
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("StaticLoader").field("plugins", &names).finish()
    }
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> PluginBox + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into(), std::sync::Arc::new(Box::new(factory)));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> PluginBox + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl ModuleLoader for StaticLoader {
    fn locate(&self, name: &str, _search_paths: &[PathBuf]) -> Option<PathBuf> {
        self.contains(name)
            .then(|| PathBuf::from(format!("builtin:{name}")))
    }

    fn load(&self, name: &str, path: &Path) -> Result<Box<dyn PluginModule>, CoreError> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;
        Ok(Box::new(StaticModule {
            path: path.to_path_buf(),
            factory,
        }))
    }
}

struct StaticModule {
    path: PathBuf,
    factory: std::sync::Arc<Factory>,
}

impl PluginModule for StaticModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self) -> Result<PluginBox, CoreError> {
        Ok((self.factory)())
    }

    fn destroy(&self, instance: PluginBox) {
        drop(instance);
    }
}
