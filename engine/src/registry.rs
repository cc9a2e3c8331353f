//! Explicit registry of auth plugins and security classes.
//!
//! Built once at startup and passed by reference into every component; there
//! is deliberately no global/static registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::directory::AuthPlugin;
use crate::error::{Result, VaultError};
use crate::types::{ClassId, PluginId, SecurityClass};

#[derive(Default)]
pub struct Registry {
    plugins: HashMap<PluginId, Arc<dyn AuthPlugin>>,
    classes: HashMap<ClassId, SecurityClass>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn AuthPlugin>) -> Result<()> {
        let id = plugin.id().clone();
        if self.plugins.insert(id.clone(), plugin).is_some() {
            return Err(VaultError::Validation(format!(
                "auth plugin {id} registered twice"
            )));
        }
        Ok(())
    }

    /// Register a security class after validating its invariant
    /// 1 <= t <= n and that every named plugin is known.
    pub fn register_class(&mut self, class: SecurityClass) -> Result<()> {
        let n = class.factor_plugins.len();
        let t = class.required_factors as usize;
        if n == 0 || t == 0 || t > n {
            return Err(VaultError::Validation(format!(
                "security class {}: invalid threshold t={t} over n={n} factors",
                class.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for plugin in &class.factor_plugins {
            if !seen.insert(plugin) {
                return Err(VaultError::Validation(format!(
                    "security class {}: duplicate factor plugin {plugin}",
                    class.id
                )));
            }
            if !self.plugins.contains_key(plugin) {
                return Err(VaultError::Validation(format!(
                    "security class {}: unknown factor plugin {plugin}",
                    class.id
                )));
            }
        }
        self.classes.insert(class.id, class);
        Ok(())
    }

    pub fn plugin(&self, id: &PluginId) -> Result<&Arc<dyn AuthPlugin>> {
        self.plugins
            .get(id)
            .ok_or_else(|| VaultError::NotFound(format!("auth plugin {id}")))
    }

    pub fn class(&self, id: &ClassId) -> Result<&SecurityClass> {
        self.classes
            .get(id)
            .ok_or_else(|| VaultError::NotFound(format!("security class {id}")))
    }
}
