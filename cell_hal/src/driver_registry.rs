//! Driver registry for device drivers.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving driver
//! factories. Constructor-injected, no global state.

use crate::device::{DeviceDriver, DeviceError, DriverFactory, DriverOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of available device drivers.
///
/// Constructed at startup, populated via `register()`, and queried by name
/// when a session is created. Testable in isolation.
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in driver.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_drivers(&mut registry);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a driver factory by name.
    pub fn get_factory(&self, name: &str) -> Option<DriverFactory> {
        self.factories.get(name).copied()
    }

    /// Create a driver instance by name.
    ///
    /// # Errors
    /// Returns `DeviceError::DriverNotFound` if no driver with the given name is registered.
    pub fn create_driver(
        &self,
        name: &str,
        options: &DriverOptions,
    ) -> Result<Arc<dyn DeviceDriver>, DeviceError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DeviceError::DriverNotFound(name.to_string()))?;
        let driver = factory(options);
        info!(
            "Created driver: {} v{} (tick={:?})",
            driver.name(),
            driver.version(),
            options.tick
        );
        Ok(driver)
    }

    /// List all registered driver names.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
