//! Loader configuration and the instance-config facade.
//!
//! User-level config: `~/.codemesh/host.yaml` (bundle root, loader flags)
//! Project-level config: `.codemesh/host.yaml` (overrides, safe to commit)
//!
//! Resolution: project config → user config → `CODEMESH_BUNDLE_ROOT` →
//! recommended defaults for the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::environment::Environment;

/// Env var naming the bundle root when no config file sets one.
pub const BUNDLE_ROOT_ENV: &str = "CODEMESH_BUNDLE_ROOT";

const DEFAULT_BUNDLE_ROOT: &str = "bundle";
const PROJECT_CONFIG_PATH: &str = ".codemesh/host.yaml";

/// Immutable loader configuration snapshot, fixed at runner construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub enable_performance_monitoring: bool,
    pub max_memory_mb: u32,
    pub use_workers: bool,
    pub enable_offline: bool,
    pub debug: bool,
    pub bundle_root: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enable_performance_monitoring: true,
            max_memory_mb: 512,
            use_workers: true,
            enable_offline: false,
            debug: false,
            bundle_root: PathBuf::from(DEFAULT_BUNDLE_ROOT),
        }
    }
}

impl LoaderConfig {
    /// Recommended configuration for an environment.
    ///
    /// Pure function of the environment — repeated calls return identical
    /// values and trigger nothing.
    pub fn recommended(environment: Environment) -> Self {
        let base = Self::default();
        match environment {
            Environment::Interactive => Self {
                enable_performance_monitoring: true,
                max_memory_mb: 256,
                use_workers: true,
                enable_offline: true,
                debug: false,
                ..base
            },
            Environment::Service => Self {
                enable_performance_monitoring: false,
                max_memory_mb: 1024,
                use_workers: false,
                enable_offline: false,
                debug: false,
                ..base
            },
            Environment::Worker | Environment::Unsupported => Self {
                enable_performance_monitoring: false,
                max_memory_mb: 512,
                use_workers: false,
                enable_offline: false,
                debug: true,
                ..base
            },
        }
    }

    /// Effective config for an environment: recommended defaults overlaid
    /// with the env var bundle root, the user file, then the project file.
    pub fn load(environment: Environment) -> Self {
        let mut config = Self::recommended(environment);
        if let Some(root) = std::env::var_os(BUNDLE_ROOT_ENV) {
            config.bundle_root = PathBuf::from(root);
        }
        if let Some(path) = user_config_path() {
            config.apply(&HostFileConfig::read(&path));
        }
        config.apply(&HostFileConfig::read(Path::new(PROJECT_CONFIG_PATH)));
        config
    }

    /// Overlay a config file's set fields onto this snapshot.
    fn apply(&mut self, file: &HostFileConfig) {
        if let Some(root) = &file.bundle_root {
            self.bundle_root = root.clone();
        }
        if let Some(mb) = file.max_memory_mb {
            self.max_memory_mb = mb;
        }
        if let Some(perf) = file.enable_performance_monitoring {
            self.enable_performance_monitoring = perf;
        }
        if let Some(workers) = file.use_workers {
            self.use_workers = workers;
        }
        if let Some(offline) = file.enable_offline {
            self.enable_offline = offline;
        }
        if let Some(debug) = file.debug {
            self.debug = debug;
        }
    }
}

/// On-disk host config. No secrets — safe to commit at project level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_performance_monitoring: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_workers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_offline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl HostFileConfig {
    fn read(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

/// Path to `~/.codemesh/host.yaml`.
fn user_config_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|p| PathBuf::from(p).join(".codemesh").join("host.yaml"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME")
            .ok()
            .map(|p| PathBuf::from(p).join(".codemesh").join("host.yaml"))
    }
}

/// Recognized instance options: embedder-facing field → engine config field.
/// Unlisted fields are never forwarded.
pub const INSTANCE_CONFIG_FIELDS: &[(&str, &str)] = &[
    ("useBrowserStorage", "use_browser_storage"),
    ("enableOffline", "enable_offline"),
    ("useWebWorkers", "use_web_workers"),
    ("maxMemoryMB", "max_memory_mb"),
    ("enablePerformanceMonitoring", "enable_performance_monitoring"),
    ("apiEndpoint", "api_endpoint"),
    ("authProvider", "auth_provider"),
];

/// Translate embedder-facing instance options into engine config fields.
///
/// Only allow-listed fields are copied; absent fields keep the engine's
/// defaults. Anything that isn't a JSON object translates to nothing.
pub fn translate_instance_config(
    options: &serde_json::Value,
) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    let Some(obj) = options.as_object() else {
        return out;
    };
    for (external, internal) in INSTANCE_CONFIG_FIELDS {
        if let Some(value) = obj.get(*external) {
            out.insert((*internal).to_string(), value.clone());
        }
    }
    out
}
