//! Flow faults.

use crate::step::Operation;
use cell_hal::DeviceError;
use std::any::Any;
use thiserror::Error;

/// Reason a step (and, once propagated, a run) failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    /// The run was cancelled. Never retried.
    #[error("flow cancelled")]
    Cancelled,

    /// Action addressed to a device absent from the topology.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// No handler for this operation on this kind of target.
    #[error("{operation} is not supported on {target}")]
    UnsupportedOperation {
        /// Requested operation.
        operation: Operation,
        /// Device id or `System`.
        target: String,
    },

    /// Missing or malformed action argument.
    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument {
        /// Operation being invoked.
        operation: Operation,
        /// What was wrong.
        reason: String,
    },

    /// Raised by a `Throw` action.
    #[error("{0}")]
    Thrown(String),

    /// Material operation on a station that holds no material.
    #[error("station {0} holds no material")]
    EmptyStation(String),

    /// Unknown scenario name.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// Scenario exists but cannot be built for this topology.
    #[error("scenario {scenario} unavailable: {reason}")]
    ScenarioUnavailable {
        /// Scenario name.
        scenario: String,
        /// Missing devices or similar.
        reason: String,
    },

    /// Device layer failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A handler panicked; the run was torn down.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl Fault {
    /// True for [`Fault::Cancelled`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Fault::Cancelled)
    }

    /// Stable code carried by telemetry `Error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Fault::Cancelled => "CANCELLED",
            Fault::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Fault::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Fault::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Fault::Thrown(_) => "THROWN",
            Fault::EmptyStation(_) => "EMPTY_STATION",
            Fault::UnknownScenario(_) => "UNKNOWN_SCENARIO",
            Fault::ScenarioUnavailable { .. } => "SCENARIO_UNAVAILABLE",
            Fault::Panicked(_) => "PANICKED",
            Fault::Device(DeviceError::NoRuntime(_)) => "NO_RUNTIME",
            Fault::Device(DeviceError::DriverNotFound(_)) => "DRIVER_NOT_FOUND",
            Fault::Device(_) => "DEVICE_ERROR",
        }
    }

    /// Device or station the fault originated from, when known.
    pub fn source(&self) -> Option<&str> {
        match self {
            Fault::DeviceNotFound(id) | Fault::EmptyStation(id) => Some(id),
            Fault::UnsupportedOperation { target, .. } => Some(target),
            Fault::Device(err) => match err {
                DeviceError::NotFound(id) | DeviceError::NoRuntime(id) => Some(id),
                DeviceError::WrongKind { id, .. } | DeviceError::CommandRejected { id, .. } => {
                    Some(id)
                }
                DeviceError::DriverNotFound(_) => None,
            },
            _ => None,
        }
    }

    /// Fault for a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Fault::Panicked(message)
    }

    pub(crate) fn invalid(operation: Operation, reason: impl Into<String>) -> Self {
        Fault::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }
}

/// Result alias for flow execution.
pub type FlowResult<T> = Result<T, Fault>;
