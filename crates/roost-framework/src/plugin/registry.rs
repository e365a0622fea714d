//! Name → descriptor table populated at process start.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{PluginDescriptor, PluginType};
use super::builtin::CONFIG_PLUGIN;

/// Plugins that rooms can load, keyed by name.
///
/// Filled by explicit [`register`](Self::register) calls; there is no
/// discovery of any kind.  The built-in `config` plugin is always present.
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<&'static str, PluginDescriptor>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Creates a registry holding only the built-in plugins.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(CONFIG_PLUGIN);
        registry
    }

    /// Creates a registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds a plugin.  A later registration under the same name wins.
    pub fn register(&self, descriptor: PluginDescriptor) {
        let previous = self.plugins.write().insert(descriptor.name, descriptor);
        if previous.is_some() {
            warn!(
                plugin = descriptor.name,
                "Duplicate plugin registration, last registration wins"
            );
        } else {
            debug!(plugin = descriptor.name, kind = ?descriptor.plugin_type, "Plugin registered");
        }
    }

    /// Looks up a plugin by name.
    pub fn get(&self, name: &str) -> Option<PluginDescriptor> {
        self.plugins.read().get(name).copied()
    }

    /// Looks up a plugin by name, restricted to one role.
    pub fn get_typed(&self, name: &str, plugin_type: PluginType) -> Option<PluginDescriptor> {
        self.get(name).filter(|d| d.plugin_type == plugin_type)
    }

    /// Every registered plugin of the given role, sorted by name.
    pub fn of_type(&self, plugin_type: PluginType) -> Vec<PluginDescriptor> {
        self.plugins
            .read()
            .values()
            .filter(|d| d.plugin_type == plugin_type)
            .copied()
            .collect()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}
