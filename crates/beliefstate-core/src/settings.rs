//! Host settings parsed from a TOML configuration document.
//!
//! Only the host-level sections are interpreted here. The `plugin-config`
//! section is kept raw and handed to the configuration tree builder one
//! plugin at a time.

use std::path::{Path, PathBuf};

use beliefstate_plugin::MongoDbSettings;
use serde::Deserialize;

use crate::error::CoreError;

// ─── Constants ──────────────────────────────────────────────────────────

/// File name looked for in every default location.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the installation directory.
pub const INSTALL_DIR_ENV: &str = "BELIEFSTATE_INSTALL_DIR";

const DEFAULT_INSTALL_DIR: &str = "/etc/beliefstate";

const DEFAULT_TICK_INTERVAL_MS: u64 = 10;

// ─── Sections ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub workspace_directory: Option<String>,
    pub persistent_data_storage: PersistentDataStorage,
    pub plugins: PluginsSection,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Raw per-plugin configuration, see `config_tree::plugin_config_tree`.
    #[serde(default)]
    pub plugin_config: Option<toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PersistentDataStorage {
    pub base_data_directory: String,
    #[serde(default)]
    pub use_mongodb: bool,
    #[serde(default)]
    pub mongodb: Option<MongoDbSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginsSection {
    pub load: Vec<PluginEntry>,
    pub search_paths: Vec<String>,
}

/// One entry of `plugins.load`: a bare name (required) or a table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PluginEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default = "default_required")]
        required: bool,
    },
}

fn default_required() -> bool {
    true
}

impl PluginEntry {
    pub fn name(&self) -> &str {
        match self {
            PluginEntry::Name(name) | PluginEntry::Detailed { name, .. } => name,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            PluginEntry::Name(_) => true,
            PluginEntry::Detailed { required, .. } => *required,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

// ─── Directory tokens ───────────────────────────────────────────────────

/// Values substituted for `~`, `${HOME}`, `${WORKSPACE}` and `${BASEDATADIR}`.
#[derive(Debug, Clone, Default)]
pub struct DirectoryTokens {
    pub home: Option<PathBuf>,
    pub workspace: PathBuf,
    pub base_data: Option<PathBuf>,
}

impl DirectoryTokens {
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = path.to_string();

        if let Some(home) = &self.home {
            let home = home.display().to_string();
            if resolved == "~" || resolved.starts_with("~/") {
                resolved.replace_range(..1, &home);
            }
            resolved = resolved.replace("${HOME}", &home);
        }
        resolved = resolved.replace("${WORKSPACE}", &self.workspace.display().to_string());
        if let Some(base) = &self.base_data {
            resolved = resolved.replace("${BASEDATADIR}", &base.display().to_string());
        }

        PathBuf::from(resolved)
    }
}

/// The invoking user's home directory, from `$HOME`.
pub fn home_directory() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

// ─── Loading ────────────────────────────────────────────────────────────

impl Settings {
    /// Parse and validate a configuration document.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Load the first configuration that parses: `explicit` if given, then
    /// the default locations in order.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf), CoreError> {
        let candidates = explicit
            .map(Path::to_path_buf)
            .into_iter()
            .chain(default_config_locations());
        Self::load_first(candidates)
    }

    /// Load the first of `candidates` that parses.
    pub fn load_first(
        candidates: impl IntoIterator<Item = PathBuf>,
    ) -> Result<(Self, PathBuf), CoreError> {
        let mut tried = Vec::new();
        for path in candidates {
            match Self::from_file(&path) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "configuration loaded");
                    return Ok((settings, path));
                }
                Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "no configuration file here");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "error while parsing config file: {e}");
                }
            }
            tried.push(path);
        }
        Err(CoreError::ConfigNotFound(tried))
    }

    fn validate(&self) -> Result<(), CoreError> {
        let storage = &self.persistent_data_storage;
        if storage.base_data_directory.trim().is_empty() {
            return Err(CoreError::ConfigInvalid(
                "persistent-data-storage.base-data-directory must not be empty".into(),
            ));
        }
        if storage.use_mongodb && storage.mongodb.is_none() {
            return Err(CoreError::ConfigInvalid(
                "use-mongodb is set but persistent-data-storage.mongodb is missing".into(),
            ));
        }
        if let Some(entry) = self.plugins.load.iter().find(|e| e.name().trim().is_empty()) {
            return Err(CoreError::ConfigInvalid(format!(
                "plugins.load contains an empty plugin name: {entry:?}"
            )));
        }
        Ok(())
    }

    // ── Resolved values ───────────────────────────────────────────────

    /// Configured workspace directory, or the current directory.
    pub fn workspace_directory(&self) -> PathBuf {
        match &self.workspace_directory {
            Some(dir) => {
                let tokens = DirectoryTokens {
                    home: home_directory(),
                    ..DirectoryTokens::default()
                };
                tokens.resolve(dir)
            }
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    fn tokens(&self) -> DirectoryTokens {
        DirectoryTokens {
            home: home_directory(),
            workspace: self.workspace_directory(),
            base_data: None,
        }
    }

    pub fn base_data_directory(&self) -> PathBuf {
        self.tokens()
            .resolve(&self.persistent_data_storage.base_data_directory)
    }

    /// Plugin search paths in configured order, tokens resolved.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let tokens = DirectoryTokens {
            base_data: Some(self.base_data_directory()),
            ..self.tokens()
        };
        self.plugins
            .search_paths
            .iter()
            .map(|p| tokens.resolve(p))
            .collect()
    }

    /// Remote database settings, only when enabled.
    pub fn mongodb(&self) -> Option<MongoDbSettings> {
        let storage = &self.persistent_data_storage;
        storage
            .use_mongodb
            .then(|| storage.mongodb.clone())
            .flatten()
    }
}

/// Default configuration locations, most specific first.
pub fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
    if let Some(home) = home_directory() {
        locations.push(home.join(".beliefstate").join(CONFIG_FILE_NAME));
    }
    let install_dir = std::env::var_os(INSTALL_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_DIR));
    locations.push(install_dir.join(CONFIG_FILE_NAME));
    locations
}
