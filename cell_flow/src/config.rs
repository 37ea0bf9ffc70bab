//! Engine configuration (`engine.toml`).
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "cell-sim-01"
//! log_level = "info"
//!
//! [telemetry]
//! interval_ms = 50
//! epsilon = 0.001
//!
//! [simulation]
//! tick_ms = 10
//!
//! [execution]
//! driver = "simulation"
//! wait_timeout_s = 30.0
//! seed = 0
//! ```
//!
//! Every section is optional; a missing `engine.toml` yields the defaults.

use crate::telemetry::SamplerConfig;
use cell_common::config::{ConfigError, ConfigLoader, ENGINE_FILE, SharedConfig};
use cell_common::consts::{DEFAULT_SIM_TICK_MS, DEFAULT_WAIT_TIMEOUT_S};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Simulation driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Motion task tick in milliseconds.
    pub tick_ms: u64,
}

impl SimulationConfig {
    /// Motion task tick.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_SIM_TICK_MS,
        }
    }
}

/// Run execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Device driver name from the driver registry.
    pub driver: String,
    /// Default safety bound of wait operations, in seconds.
    pub wait_timeout_s: f64,
    /// Seed of the material-id generator.
    pub seed: u64,
}

impl ExecutionConfig {
    /// Default safety bound of wait operations. Out-of-range values fall back
    /// to the built-in default.
    pub fn wait_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_timeout_s)
            .unwrap_or(cell_common::prelude::DEFAULT_WAIT_TIMEOUT)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            driver: cell_hal::drivers::simulation::DRIVER_NAME.to_string(),
            wait_timeout_s: DEFAULT_WAIT_TIMEOUT_S,
            seed: 0,
        }
    }
}

/// Root of `engine.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Service identity and log level.
    pub shared: SharedConfig,
    /// Telemetry sampler.
    pub telemetry: SamplerConfig,
    /// Simulation driver.
    pub simulation: SimulationConfig,
    /// Run execution.
    pub execution: ExecutionConfig,
}

impl EngineConfig {
    /// Load `engine.toml` from `config_dir`, falling back to defaults when
    /// the file is absent.
    ///
    /// # Errors
    /// `ParseError` for malformed TOML, `ValidationError` for out-of-range values.
    pub fn load_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(ENGINE_FILE);
        let config = match Self::load(&path) {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => {
                info!("No {} in {}, using defaults", ENGINE_FILE, config_dir.display());
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.telemetry.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.interval_ms must be > 0".to_string(),
            ));
        }
        if !(self.telemetry.epsilon >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "telemetry.epsilon must be >= 0, got {}",
                self.telemetry.epsilon
            )));
        }
        if self.simulation.tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.tick_ms must be > 0".to_string(),
            ));
        }
        let wait_timeout_s = self.execution.wait_timeout_s;
        if !(wait_timeout_s > 0.0 && Duration::try_from_secs_f64(wait_timeout_s).is_ok()) {
            return Err(ConfigError::ValidationError(format!(
                "execution.wait_timeout_s must be a positive number, got {}",
                self.execution.wait_timeout_s
            )));
        }
        if self.execution.driver.is_empty() {
            return Err(ConfigError::ValidationError(
                "execution.driver cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
