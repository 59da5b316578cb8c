use crate::{Dao, Result, StorageError};
use std::collections::HashMap;
use vigil_common::config::NodeConfig;

/// Factory for a storage engine, registered in the [`BackendRegistry`] under
/// its `name()`.
pub trait BackendPlugin: Send + Sync {
    /// Value of the `database` config key that selects this engine.
    fn name(&self) -> &str;

    /// Opens the engine described by `config`.
    fn create(&self, config: &NodeConfig) -> Result<Box<dyn Dao>>;

    /// Best-effort fix after a failed `create`, typically creating the
    /// database. The registry retries `create` once when this succeeds.
    fn remediate(&self, _config: &NodeConfig) -> Result<()> {
        Ok(())
    }
}

/// Registry of available storage engines.
///
/// # Examples
///
/// ```
/// use vigil_storage::BackendRegistry;
///
/// let registry = BackendRegistry::default();
/// assert!(registry.has_plugin("null"));
/// assert!(registry.has_plugin("sqlite"));
/// assert!(registry.has_plugin("influx"));
/// assert!(!registry.has_plugin("mongo"));
/// ```
pub struct BackendRegistry {
    plugins: HashMap<String, Box<dyn BackendPlugin>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn BackendPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Opens the engine selected by the `database` config key.
    ///
    /// An unset or unknown engine is an error. If opening fails, the
    /// plugin's remediation runs and opening is retried once.
    pub fn open(&self, config: &NodeConfig) -> Result<Box<dyn Dao>> {
        let name = config.get("database").unwrap_or_default();
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| StorageError::UnknownBackend(name.to_string()))?;

        match plugin.create(config) {
            Ok(dao) => {
                tracing::info!(backend = name, "Storage backend ready");
                Ok(dao)
            }
            Err(e) => {
                tracing::error!(backend = name, error = %e, "Failed to open storage backend, attempting remediation");
                plugin.remediate(config)?;
                plugin.create(config)
            }
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::null::NullPlugin));
        registry.register(Box::new(crate::sqlite::SqlitePlugin));
        registry.register(Box::new(crate::influx::InfluxPlugin));
        registry
    }
}
