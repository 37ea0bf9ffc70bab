//! # Cell HAL Library
//!
//! Hardware abstraction for assembly-cell devices with a pluggable driver
//! architecture. The flow engine drives axes, cylinders and vacuum effectors
//! exclusively through the traits in [`device`]; a driver materializes one
//! device handle per topology record.
//!
//! # Module Structure
//!
//! - [`device`] - Device and driver traits, device state snapshots, errors
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Driver implementations (simulation)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        cell_hal                              │
//! │  ┌────────────────┐    ┌──────────────────────────────────┐  │
//! │  │ DriverRegistry │───►│ DeviceDriver (trait object)      │  │
//! │  └────────────────┘    │   create_axis / create_actuator  │  │
//! │                        └───────────────┬──────────────────┘  │
//! │                                        ▼                     │
//! │              ┌────────────────┐  ┌──────────────────┐        │
//! │              │ AxisDevice     │  │ ActuatorDevice   │        │
//! │              │ (SimAxis)      │  │ (SimActuator)    │        │
//! │              └────────────────┘  └──────────────────┘        │
//! │         state: watch channel (latest value + subscribers)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod device;
pub mod driver_registry;
pub mod drivers;

// Re-export key types for convenience
pub use crate::device::{
    ActuatorDevice, ActuatorState, AxisDevice, AxisState, DeviceDriver, DeviceError,
    DriverFactory, DriverOptions,
};
pub use crate::driver_registry::DriverRegistry;
