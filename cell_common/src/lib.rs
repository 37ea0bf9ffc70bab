//! Cell Common Library
//!
//! This crate provides the shared vocabulary of the assembly-cell workspace:
//! constants, configuration loading, the read-only machine topology and the
//! telemetry wire types consumed by transports.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide defaults (tick rates, bounds, schema version)
//! - [`config`] - Configuration loading traits and types
//! - [`topology`] - Machine topology: axes, cylinders and vacuum actuators
//! - [`telemetry`] - Telemetry frames and domain events (JSON wire contract)
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust,no_run
//! use cell_common::config::ConfigLoader;
//! use cell_common::topology::MachineTopology;
//! use std::path::Path;
//!
//! let topology = MachineTopology::load(Path::new("config/machine.toml")).unwrap();
//! topology.validate().unwrap();
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod telemetry;
pub mod topology;
