//! Prelude module for common re-exports.
//!
//! ```rust
//! use cell_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig, load_topology};

// ─── Topology ───────────────────────────────────────────────────────
pub use crate::topology::{
    ActuatorConfig, ActuatorKind, AxisConfig, ContactConfig, DeviceKind, MachineTopology,
    TopologyError,
};

// ─── Telemetry ──────────────────────────────────────────────────────
pub use crate::telemetry::{EventKind, FlowEvent, MaterialInfo, StopReason, TelemetryFrame};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{SYSTEM_DEVICE, TELEMETRY_SCHEMA_VERSION};

/// Default simulation tick as Duration.
pub const DEFAULT_SIM_TICK: Duration =
    Duration::from_millis(crate::consts::DEFAULT_SIM_TICK_MS);

/// Default wait-operation safety bound as Duration.
pub const DEFAULT_WAIT_TIMEOUT: Duration =
    Duration::from_secs(crate::consts::DEFAULT_WAIT_TIMEOUT_S as u64);
