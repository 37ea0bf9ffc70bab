//! Machine topology types.
//!
//! The topology is the read-only description of which devices exist on a
//! machine and how they are wired:
//! - `MachineTopology` - Root record loaded from `machine.toml`
//! - `AxisConfig` - Linear/rotary axis with travel limits and speed limit
//! - `ActuatorConfig` - Pneumatic cylinder or vacuum effector
//! - `ContactConfig` - Optional process-variable model for probing axes
//!
//! # TOML Example
//!
//! ```toml
//! name = "Cell A"
//!
//! [[axes]]
//! id = "X"
//! board = 0
//! channel = 1
//! min = 0.0
//! max = 100.0
//! max_speed = 200.0
//!
//! [[actuators]]
//! id = "Clamp"
//! kind = "cylinder"
//! action_time_ms = 150
//! ```

use crate::consts::{DEFAULT_ACTION_TIME_MS, DEFAULT_AXIS_SPEED, MAX_DEVICES, SYSTEM_DEVICE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

fn default_max_speed() -> f64 {
    DEFAULT_AXIS_SPEED
}

fn default_action_time_ms() -> u64 {
    DEFAULT_ACTION_TIME_MS
}

/// Topology validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    /// Two devices share the same id.
    #[error("Duplicate device id: {0}")]
    DuplicateId(String),

    /// A device uses the reserved pseudo-device name.
    #[error("Device id '{0}' is reserved")]
    ReservedId(String),

    /// Device id is empty.
    #[error("Device id cannot be empty")]
    EmptyId,

    /// Travel range is empty or inverted.
    #[error("Axis {id}: invalid travel range [{min}, {max}]")]
    InvalidRange { id: String, min: f64, max: f64 },

    /// Speed limit is not positive.
    #[error("Axis {id}: max_speed must be > 0 (got {speed})")]
    InvalidSpeed { id: String, speed: f64 },

    /// Contact model is not usable.
    #[error("Axis {id}: contact stiffness must be > 0 (got {stiffness})")]
    InvalidContact { id: String, stiffness: f64 },

    /// Too many devices declared.
    #[error("Too many devices: {count} (max {max})")]
    TooManyDevices { count: usize, max: usize },
}

/// Kind of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Positioning axis with continuous position.
    Axis,
    /// Pneumatic cylinder (extended / retracted).
    Cylinder,
    /// Vacuum effector (on / off).
    Vacuum,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Axis => "axis",
            DeviceKind::Cylinder => "cylinder",
            DeviceKind::Vacuum => "vacuum",
        };
        f.write_str(name)
    }
}

/// Kind of a binary actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Pneumatic cylinder.
    #[default]
    Cylinder,
    /// Vacuum effector.
    Vacuum,
}

impl From<ActuatorKind> for DeviceKind {
    fn from(kind: ActuatorKind) -> Self {
        match kind {
            ActuatorKind::Cylinder => DeviceKind::Cylinder,
            ActuatorKind::Vacuum => DeviceKind::Vacuum,
        }
    }
}

/// Synthetic contact model for axes that probe a surface.
///
/// Pressure rises linearly once the axis passes `surface`:
/// `pressure = max(0, position - surface) * stiffness`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactConfig {
    /// Position at which the tool touches the part.
    pub surface: f64,
    /// Pressure increase per user unit of travel past the surface.
    pub stiffness: f64,
}

/// Per-axis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Unique device id.
    pub id: String,

    /// Controller board number.
    #[serde(default)]
    pub board: u16,

    /// Channel on the controller board.
    #[serde(default)]
    pub channel: u16,

    /// Lower travel limit in user units.
    pub min: f64,

    /// Upper travel limit in user units.
    pub max: f64,

    /// Maximum speed in user units per second.
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,

    /// Home position. Defaults to zero, clamped into the travel range.
    #[serde(default)]
    pub home: Option<f64>,

    /// Optional process-variable model used by `MoveUntil`.
    #[serde(default)]
    pub contact: Option<ContactConfig>,
}

impl AxisConfig {
    /// Create an axis with the given travel range and default speed.
    pub fn new(id: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            id: id.into(),
            board: 0,
            channel: 0,
            min,
            max,
            max_speed: DEFAULT_AXIS_SPEED,
            home: None,
            contact: None,
        }
    }

    /// Clamp a position into the travel range.
    pub fn clamp(&self, position: f64) -> f64 {
        position.clamp(self.min, self.max)
    }

    /// Home position, always inside the travel range.
    pub fn home_position(&self) -> f64 {
        self.clamp(self.home.unwrap_or(0.0))
    }

    /// Validate the axis configuration.
    pub fn validate(&self) -> Result<(), TopologyError> {
        validate_id(&self.id)?;

        if !(self.min < self.max) {
            return Err(TopologyError::InvalidRange {
                id: self.id.clone(),
                min: self.min,
                max: self.max,
            });
        }

        if !(self.max_speed > 0.0) {
            return Err(TopologyError::InvalidSpeed {
                id: self.id.clone(),
                speed: self.max_speed,
            });
        }

        if let Some(contact) = &self.contact {
            if !(contact.stiffness > 0.0) {
                return Err(TopologyError::InvalidContact {
                    id: self.id.clone(),
                    stiffness: contact.stiffness,
                });
            }
        }

        Ok(())
    }
}

/// Per-actuator configuration (cylinders and vacuum effectors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Unique device id.
    pub id: String,

    /// Cylinder or vacuum.
    #[serde(default)]
    pub kind: ActuatorKind,

    /// Controller board number.
    #[serde(default)]
    pub board: u16,

    /// Output channel on the controller board.
    #[serde(default)]
    pub channel: u16,

    /// Time for a full stroke in milliseconds. Zero switches instantly.
    #[serde(default = "default_action_time_ms")]
    pub action_time_ms: u64,
}

impl ActuatorConfig {
    /// Create an actuator with the given kind and stroke time.
    pub fn new(id: impl Into<String>, kind: ActuatorKind, action_time_ms: u64) -> Self {
        Self {
            id: id.into(),
            kind,
            board: 0,
            channel: 0,
            action_time_ms,
        }
    }

    /// Full-stroke action time.
    pub fn action_time(&self) -> Duration {
        Duration::from_millis(self.action_time_ms)
    }
}

/// Root topology record loaded from `machine.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MachineTopology {
    /// Human-readable machine name.
    #[serde(default)]
    pub name: String,

    /// Declared axes.
    #[serde(default)]
    pub axes: Vec<AxisConfig>,

    /// Declared cylinders and vacuum effectors.
    #[serde(default)]
    pub actuators: Vec<ActuatorConfig>,
}

impl MachineTopology {
    /// Create an empty topology.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            axes: Vec::new(),
            actuators: Vec::new(),
        }
    }

    /// Add an axis (builder style).
    pub fn with_axis(mut self, axis: AxisConfig) -> Self {
        self.axes.push(axis);
        self
    }

    /// Add an actuator (builder style).
    pub fn with_actuator(mut self, actuator: ActuatorConfig) -> Self {
        self.actuators.push(actuator);
        self
    }

    /// Validate the topology.
    ///
    /// # Validation Rules
    /// 1. Total device count <= MAX_DEVICES
    /// 2. Every axis and actuator validates individually
    /// 3. Device ids are unique across all kinds and never `System`
    pub fn validate(&self) -> Result<(), TopologyError> {
        let count = self.axes.len() + self.actuators.len();
        if count > MAX_DEVICES {
            return Err(TopologyError::TooManyDevices {
                count,
                max: MAX_DEVICES,
            });
        }

        let mut ids = HashSet::new();
        for axis in &self.axes {
            axis.validate()?;
            if !ids.insert(axis.id.as_str()) {
                return Err(TopologyError::DuplicateId(axis.id.clone()));
            }
        }
        for actuator in &self.actuators {
            validate_id(&actuator.id)?;
            if !ids.insert(actuator.id.as_str()) {
                return Err(TopologyError::DuplicateId(actuator.id.clone()));
            }
        }

        Ok(())
    }

    /// Look up an axis record.
    pub fn axis(&self, id: &str) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.id == id)
    }

    /// Look up an actuator record.
    pub fn actuator(&self, id: &str) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| a.id == id)
    }

    /// Kind of the device with the given id, if declared.
    pub fn kind_of(&self, id: &str) -> Option<DeviceKind> {
        if self.axis(id).is_some() {
            return Some(DeviceKind::Axis);
        }
        self.actuator(id).map(|a| a.kind.into())
    }

    /// Soft-limit range of an axis.
    pub fn soft_limits(&self, id: &str) -> Option<(f64, f64)> {
        self.axis(id).map(|a| (a.min, a.max))
    }

    /// All declared device ids, axes first, in declaration order.
    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.axes
            .iter()
            .map(|a| a.id.as_str())
            .chain(self.actuators.iter().map(|a| a.id.as_str()))
    }
}

fn validate_id(id: &str) -> Result<(), TopologyError> {
    if id.is_empty() {
        return Err(TopologyError::EmptyId);
    }
    if id == SYSTEM_DEVICE {
        return Err(TopologyError::ReservedId(id.to_string()));
    }
    Ok(())
}
