//! Plugin descriptor, the static `Copy` handle to a plugin.

use std::sync::Arc;

use super::{Plugin, PluginApi};

// ─── PluginType ───────────────────────────────────────────────────────────────

/// Describes what functional role a plugin plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    /// End-user facing; activated per room through the config room.
    Interaction,
    /// Administrative; loaded automatically in every config room.
    Config,
}

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

/// A static, `Copy` descriptor that identifies and instantiates a plugin.
///
/// ```rust,ignore
/// pub static ECHO: PluginDescriptor =
///     PluginDescriptor::interaction("echo", "Repeats what you say", Echo::create);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Unique plugin name, used as the activation key.
    pub name: &'static str,

    /// One-line description shown by `config plugins`.
    pub desc: &'static str,

    /// Functional role.
    pub plugin_type: PluginType,

    /// Factory that creates one live instance bound to a room facade.
    pub create: fn(PluginApi) -> Arc<dyn Plugin>,
}

impl PluginDescriptor {
    /// Descriptor for an end-user plugin.
    pub const fn interaction(
        name: &'static str,
        desc: &'static str,
        create: fn(PluginApi) -> Arc<dyn Plugin>,
    ) -> Self {
        Self {
            name,
            desc,
            plugin_type: PluginType::Interaction,
            create,
        }
    }

    /// Descriptor for an administrative plugin.
    pub const fn config(
        name: &'static str,
        desc: &'static str,
        create: fn(PluginApi) -> Arc<dyn Plugin>,
    ) -> Self {
        Self {
            name,
            desc,
            plugin_type: PluginType::Config,
            create,
        }
    }

    /// Creates the live plugin from the factory function.
    #[inline]
    pub fn instantiate(&self, api: PluginApi) -> Arc<dyn Plugin> {
        (self.create)(api)
    }
}
