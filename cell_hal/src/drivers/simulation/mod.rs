//! Simulation driver module.
//!
//! Software-emulated axes, cylinders and vacuum effectors with time-based
//! motion, for development and testing without physical hardware.

mod actuator;
mod axis;
mod driver;
mod process;

pub use actuator::SimActuator;
pub use axis::SimAxis;
pub use driver::SimulationDriver;
pub use process::{ContactModel, ProcessModel};

use crate::device::{DeviceDriver, DriverOptions};
use std::sync::Arc;

/// Registry name of the simulation driver.
pub const DRIVER_NAME: &str = "simulation";

/// Factory function to create a simulation driver instance.
pub fn create_driver(options: &DriverOptions) -> Arc<dyn DeviceDriver> {
    Arc::new(SimulationDriver::new(options.tick))
}
