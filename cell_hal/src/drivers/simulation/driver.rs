//! Simulation driver implementation.
//!
//! The `SimulationDriver` implements the `DeviceDriver` trait and hands out
//! software-emulated axes and actuators that share one motion tick.

use super::actuator::SimActuator;
use super::axis::SimAxis;
use super::process::ContactModel;
use crate::device::{ActuatorDevice, AxisDevice, DeviceDriver, DeviceError};
use cell_common::topology::{ActuatorConfig, AxisConfig, DeviceKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Simulation driver implementing the DeviceDriver trait.
pub struct SimulationDriver {
    /// Motion task tick shared by all devices
    tick: Duration,
}

impl SimulationDriver {
    /// Create a new simulation driver with the given motion tick.
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// Motion task tick.
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl DeviceDriver for SimulationDriver {
    fn name(&self) -> &'static str {
        super::DRIVER_NAME
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn create_axis(&self, config: &AxisConfig) -> Result<Arc<dyn AxisDevice>, DeviceError> {
        let mut axis = SimAxis::new(config.clone(), self.tick);
        if let Some(contact) = config.contact {
            axis = axis.with_process_model(ContactModel::from(contact));
        }
        debug!(
            "Simulated axis {} [{:.3}, {:.3}] @ {:.1}/s",
            config.id, config.min, config.max, config.max_speed
        );
        Ok(Arc::new(axis))
    }

    fn create_actuator(
        &self,
        config: &ActuatorConfig,
    ) -> Result<Arc<dyn ActuatorDevice>, DeviceError> {
        debug!(
            "Simulated {} {} ({} ms)",
            DeviceKind::from(config.kind),
            config.id,
            config.action_time_ms
        );
        Ok(Arc::new(SimActuator::new(config.clone(), self.tick)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cell_common::topology::ActuatorKind;

    #[test]
    fn test_driver_identity() {
        let driver = SimulationDriver::new(Duration::from_millis(10));
        assert_eq!(driver.name(), "simulation");
        assert!(!driver.version().is_empty());
    }

    #[test]
    fn test_create_devices_without_runtime() {
        let driver = SimulationDriver::new(Duration::from_millis(10));

        let mut config = AxisConfig::new("Z", 0.0, 100.0);
        config.contact = Some(cell_common::topology::ContactConfig {
            surface: 50.0,
            stiffness: 1.0,
        });
        let axis = driver.create_axis(&config).expect("axis");
        assert_eq!(axis.id(), "Z");
        assert_eq!(axis.process_value(), Some(0.0));

        let vac = driver
            .create_actuator(&ActuatorConfig::new("Suction", ActuatorKind::Vacuum, 100))
            .expect("actuator");
        assert_eq!(vac.kind(), ActuatorKind::Vacuum);
        assert!(!vac.state().is_on);
    }
}
