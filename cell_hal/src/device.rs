//! Device and driver traits.
//!
//! This module defines:
//! - `AxisDevice` / `ActuatorDevice` traits - Command API of a single device
//! - `AxisState` / `ActuatorState` - Latest-value snapshots published by devices
//! - `DeviceDriver` trait - Materializes device handles from topology records
//! - `DeviceError` enum - Error types for device operations
//! - `DriverFactory` type alias - Factory function type
//!
//! # Command Contract
//!
//! Commands (`move_to`, `fire`, ...) return as soon as the device has
//! registered them; motion runs asynchronously in a device-owned task.
//! A new command cancels the in-flight motion, there is no queue.
//! Progress is observed through `state()` or a `subscribe()` receiver, which
//! always yields the current value first.

use cell_common::topology::{ActuatorConfig, ActuatorKind, AxisConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Error types for device operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// No device with this id is declared.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The device exists but has a different kind.
    #[error("Device {id} is not {expected}")]
    WrongKind {
        /// Device id
        id: String,
        /// What the caller required, e.g. "an axis"
        expected: &'static str,
    },

    /// The device refused the command.
    #[error("Device {id} rejected command: {reason}")]
    CommandRejected {
        /// Device id
        id: String,
        /// Rejection reason
        reason: String,
    },

    /// Commands were issued outside of an async runtime.
    #[error("Device {0}: no async runtime available for motion task")]
    NoRuntime(String),

    /// Driver not found in the registry.
    #[error("Driver not found: {0}")]
    DriverNotFound(String),
}

/// Latest state of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisState {
    /// Actual position in user units
    pub position: f64,
    /// Last commanded (clamped) target position
    pub command_pos: f64,
    /// Motion task in progress
    pub is_moving: bool,
    /// Axis completed a homing move
    pub is_homed: bool,
    /// Speed limit in user units per second
    pub max_speed: f64,
    /// Lower travel limit
    pub min: f64,
    /// Upper travel limit
    pub max: f64,
}

impl AxisState {
    /// True when the axis is idle at its commanded position.
    pub fn in_position(&self, tolerance: f64) -> bool {
        !self.is_moving && (self.position - self.command_pos).abs() <= tolerance
    }
}

/// Latest state of a cylinder or vacuum effector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActuatorState {
    /// Extended (cylinder) or on (vacuum); flips when a stroke completes
    pub is_on: bool,
    /// Last commanded state
    pub commanded: bool,
    /// Stroke in progress
    pub is_changing: bool,
    /// Stroke position, 0.0 = retracted/off, 1.0 = extended/on
    pub position: f64,
}

impl ActuatorState {
    /// True when the actuator stopped transitioning at the requested state
    /// and that state is the last one commanded.
    ///
    /// An interrupted stroke is settled at neither state.
    pub fn is_settled_at(&self, on: bool) -> bool {
        !self.is_changing && self.is_on == on && self.commanded == on
    }
}

/// Command API of a positioning axis.
///
/// Implemented by the simulation driver and by vendor adapters alike.
pub trait AxisDevice: Send + Sync {
    /// Device id from the topology.
    fn id(&self) -> &str;

    /// Topology record this device was created from.
    fn config(&self) -> &AxisConfig;

    /// Command a move toward `target`, clamped to the travel limits.
    ///
    /// `speed` overrides the configured speed (capped at `max_speed`).
    /// Returns the effective target once the command is registered.
    fn move_to(&self, target: f64, speed: Option<f64>) -> Result<f64, DeviceError>;

    /// Command a homing move. `is_homed` becomes true when it completes.
    fn home(&self) -> Result<f64, DeviceError>;

    /// Cancel the in-flight motion and freeze the position.
    fn stop(&self);

    /// Latest state snapshot.
    fn state(&self) -> AxisState;

    /// Subscribe to state transitions. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<AxisState>;

    /// Sample the axis' process variable (e.g. contact pressure), if modeled.
    fn process_value(&self) -> Option<f64> {
        None
    }
}

/// Command API of a binary actuator (cylinder or vacuum).
pub trait ActuatorDevice: Send + Sync {
    /// Device id from the topology.
    fn id(&self) -> &str;

    /// Cylinder or vacuum.
    fn kind(&self) -> ActuatorKind;

    /// Command the actuator toward `on` (extend / suck) or off.
    fn fire(&self, on: bool) -> Result<(), DeviceError>;

    /// Cancel the in-flight stroke and freeze the position.
    fn stop(&self);

    /// Latest state snapshot.
    fn state(&self) -> ActuatorState;

    /// Subscribe to state transitions. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<ActuatorState>;
}

/// Options passed to driver factories.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverOptions {
    /// Motion task tick (simulation) or polling period (hardware)
    pub tick: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            tick: cell_common::prelude::DEFAULT_SIM_TICK,
        }
    }
}

/// Factory function type for creating driver instances.
pub type DriverFactory = fn(&DriverOptions) -> Arc<dyn DeviceDriver>;

/// Trait defining the interface for device drivers.
///
/// The execution context calls the driver lazily, the first time a flow
/// addresses a declared device.
pub trait DeviceDriver: Send + Sync {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Returns the driver's semantic version.
    fn version(&self) -> &'static str;

    /// Create the axis handle for a topology record.
    fn create_axis(&self, config: &AxisConfig) -> Result<Arc<dyn AxisDevice>, DeviceError>;

    /// Create the actuator handle for a topology record.
    fn create_actuator(
        &self,
        config: &ActuatorConfig,
    ) -> Result<Arc<dyn ActuatorDevice>, DeviceError>;
}
