//! System-wide constants for the assembly-cell workspace.
//!
//! Single source of truth for default timings and bounds.
//! Imported by all crates.

/// Name of the pseudo-device that addresses built-in control operations.
pub const SYSTEM_DEVICE: &str = "System";

/// Default simulation tick in milliseconds (axis and actuator motion tasks).
pub const DEFAULT_SIM_TICK_MS: u64 = 10;

/// Default telemetry sampling interval in milliseconds.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 50;

/// Default delta threshold below which a sampled value counts as unchanged.
pub const DEFAULT_TELEMETRY_EPSILON: f64 = 0.001;

/// Default safety bound for wait operations, in seconds.
pub const DEFAULT_WAIT_TIMEOUT_S: f64 = 30.0;

/// Default axis speed (user units per second) when none is configured.
pub const DEFAULT_AXIS_SPEED: f64 = 100.0;

/// Default cylinder / vacuum action time in milliseconds.
pub const DEFAULT_ACTION_TIME_MS: u64 = 200;

/// Telemetry schema version announced in `FlowStarted`.
pub const TELEMETRY_SCHEMA_VERSION: u32 = 1;

/// Capacity of the interpreter's step-trace broadcast channel.
pub const TRACE_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the outbound telemetry frame channel.
pub const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Maximum number of devices accepted in one topology.
pub const MAX_DEVICES: usize = 256;

/// Default configuration directory path.
pub const DEFAULT_CONFIG_DIR: &str = "config";
