//! # Cell Flow
//!
//! Flow execution engine for assembly cells. Machine behavior is written as
//! a tree of [`Step`] values: device actions composed with sequencing, data
//! mapping, named scopes, parallel branches and loops. The [`Interpreter`]
//! walks the tree against an [`ExecutionContext`] that materializes devices
//! from the machine topology through a `cell_hal` driver.
//!
//! # Module Structure
//!
//! - [`value`] - Values produced by steps
//! - [`step`] - Step tree, execution policy and flow combinators
//! - [`error`] - Faults raised while executing a flow
//! - [`context`] - Per-run devices, variables, materials, events, cancellation
//! - [`handlers`] - Operation handlers keyed by (operation, device kind)
//! - [`interpreter`] - Retry, escalation, cancellation and step traces
//! - [`telemetry`] - Differential telemetry sampler
//! - [`scenario`] - Named built-in flows
//! - [`session`] - Run lifecycle and control commands
//! - [`config`] - `engine.toml`
//!
//! # Architecture
//!
//! ```text
//!   Step tree ──► Interpreter ──► HandlerTable ──► AxisDevice / ActuatorDevice
//!                     │                                   │ watch
//!                     │ StepTrace (broadcast)             ▼
//!                     └──────────────────────► TelemetrySampler ──► frames
//!                                                  ▲
//!                            ExecutionContext ─────┘ materials, events
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use cell_flow::prelude::*;
//! use cell_flow::step;
//! use cell_hal::DriverRegistry;
//! use std::sync::Arc;
//!
//! # async fn demo(topology: MachineTopology) -> Result<(), Fault> {
//! let driver = DriverRegistry::with_builtin_drivers()
//!     .create_driver("simulation", &Default::default())?;
//! let ctx = Arc::new(ExecutionContext::new(Arc::new(topology), driver));
//!
//! let flow = step::sequence(step::move_to_and_wait("X", 100.0), |_| {
//!     step::move_to_and_wait("Z", 20.0)
//! });
//! Interpreter::new().run(&flow, &ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod interpreter;
pub mod scenario;
pub mod session;
pub mod step;
pub mod telemetry;
pub mod value;

pub use crate::context::ExecutionContext;
pub use crate::error::{Fault, FlowResult};
pub use crate::interpreter::{
    EscalationHandler, Interpreter, LogEscalation, Resolution, SkipEscalation, StepTrace,
    TraceStatus,
};
pub use crate::session::{ControlCommand, FlowSession, SessionSettings};
pub use crate::step::{ErrorHandling, Operation, Policy, Step, StepKind};
pub use crate::value::StepValue;

/// Common re-exports for flow authors.
pub mod prelude {
    pub use crate::context::ExecutionContext;
    pub use crate::error::Fault;
    pub use crate::interpreter::Interpreter;
    pub use crate::step::{ErrorHandling, Step};
    pub use crate::value::StepValue;
    pub use cell_common::topology::MachineTopology;
}
