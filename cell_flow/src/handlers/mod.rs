//! Action handler table.
//!
//! Actions are dispatched on `(Operation, target)`, where the target is the
//! kind of the addressed device or `None` for the `System` pseudo-device.
//! Handlers are plain function pointers returning boxed futures, so hosts can
//! override or extend the table without trait objects.
//!
//! | Module       | Target                | Operations                                          |
//! |--------------|-----------------------|-----------------------------------------------------|
//! | [`axis`]     | axis                  | MoveTo, MoveToAndWait, MoveUntil, Home, Stop, ReadAnalog |
//! | [`actuator`] | cylinder, vacuum      | Fire, FireAndWait, CylinderWaitFor, Stop, ReadAnalog |
//! | [`system`]   | `System`              | Delay, Throw, NoOp, variables, materials            |

pub mod actuator;
pub mod axis;
pub mod system;

use crate::context::ExecutionContext;
use crate::error::Fault;
use crate::step::{Arg, Operation};
use crate::value::StepValue;
use cell_common::consts::SYSTEM_DEVICE;
use cell_common::topology::DeviceKind;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<StepValue, Fault>>;

/// Action handler.
pub type Handler = fn(ActionCall) -> HandlerFuture;

/// Everything a handler needs to run one action.
#[derive(Clone)]
pub struct ActionCall {
    /// Run context.
    pub ctx: Arc<ExecutionContext>,
    /// Addressed device id or `System`.
    pub device: String,
    /// Operation.
    pub operation: Operation,
    /// Positional arguments.
    pub args: Vec<Arg>,
    /// Step timeout, if any.
    pub timeout: Option<Duration>,
}

impl ActionCall {
    /// Safety bound for waits: the step timeout or the context default.
    pub fn wait_bound(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.ctx.wait_timeout())
    }

    /// Literal argument `index`.
    pub fn value(&self, index: usize, what: &str) -> Result<&StepValue, Fault> {
        match self.args.get(index) {
            Some(Arg::Value(value)) => Ok(value),
            Some(Arg::Position(_)) => Err(self.invalid(format!("{what} must be a literal"))),
            None => Err(self.invalid(format!("missing {what}"))),
        }
    }

    /// Finite numeric argument `index`.
    pub fn number(&self, index: usize, what: &str) -> Result<f64, Fault> {
        self.value(index, what)?
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| self.invalid(format!("{what} must be a finite number")))
    }

    /// Optional numeric argument `index`. `Unit` counts as absent.
    pub fn opt_number(&self, index: usize, what: &str) -> Result<Option<f64>, Fault> {
        match self.args.get(index) {
            None | Some(Arg::Value(StepValue::Unit)) => Ok(None),
            Some(_) => self.number(index, what).map(Some),
        }
    }

    /// Boolean argument `index`.
    pub fn flag(&self, index: usize, what: &str) -> Result<bool, Fault> {
        self.value(index, what)?
            .as_bool()
            .ok_or_else(|| self.invalid(format!("{what} must be a boolean")))
    }

    /// Text argument `index`.
    pub fn text(&self, index: usize, what: &str) -> Result<&str, Fault> {
        self.value(index, what)?
            .as_str()
            .ok_or_else(|| self.invalid(format!("{what} must be text")))
    }

    /// Target position: a literal or a function of `current`.
    pub fn target(&self, index: usize, current: f64) -> Result<f64, Fault> {
        let target = match self.args.get(index) {
            Some(Arg::Position(f)) => f(current),
            Some(Arg::Value(_)) => return self.number(index, "target"),
            None => return Err(self.invalid("missing target")),
        };
        if target.is_finite() {
            Ok(target)
        } else {
            Err(self.invalid(format!("computed target {target} is not finite")))
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> Fault {
        Fault::invalid(self.operation, reason)
    }
}

/// Dispatch table keyed by operation and target kind.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(Operation, Option<DeviceKind>), Handler>,
}

impl HandlerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in handler.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        axis::register(&mut table);
        actuator::register(&mut table);
        system::register(&mut table);
        table
    }

    /// Register (or replace) the handler for `operation` on `target`.
    pub fn register(&mut self, operation: Operation, target: Option<DeviceKind>, handler: Handler) {
        self.handlers.insert((operation, target), handler);
    }

    /// Handler for `operation` on `target`.
    pub fn get(&self, operation: Operation, target: Option<DeviceKind>) -> Option<Handler> {
        self.handlers.get(&(operation, target)).copied()
    }

    /// Resolve the handler for a call.
    ///
    /// # Errors
    /// `DeviceNotFound` for undeclared devices, `UnsupportedOperation` when
    /// the table has no entry.
    pub fn resolve(&self, call: &ActionCall) -> Result<Handler, Fault> {
        let target = if call.device == SYSTEM_DEVICE {
            None
        } else {
            Some(
                call.ctx
                    .kind_of(&call.device)
                    .ok_or_else(|| Fault::DeviceNotFound(call.device.clone()))?,
            )
        };

        self.get(call.operation, target)
            .ok_or_else(|| Fault::UnsupportedOperation {
                operation: call.operation,
                target: call.device.clone(),
            })
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ─── Wait helpers ───────────────────────────────────────────────────

/// Stops a device if dropped while armed.
///
/// Wait handlers arm one before suspending, so a cancelled run or a faulted
/// `Parallel` sibling leaves no device in motion.
pub(crate) struct MotionGuard<F: FnOnce()> {
    stop: Option<F>,
}

impl<F: FnOnce()> MotionGuard<F> {
    pub(crate) fn new(stop: F) -> Self {
        Self { stop: Some(stop) }
    }

    pub(crate) fn disarm(mut self) {
        self.stop = None;
    }
}

impl<F: FnOnce()> Drop for MotionGuard<F> {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Settled,
    TimedOut,
}

/// Wait until `done` holds for the device state, at most `bound`.
pub(crate) async fn settle<T>(
    device: &str,
    rx: &mut watch::Receiver<T>,
    bound: Duration,
    done: impl FnMut(&T) -> bool,
) -> Result<Settle, Fault> {
    match tokio::time::timeout(bound, rx.wait_for(done)).await {
        Ok(Ok(_)) => Ok(Settle::Settled),
        Ok(Err(_)) => Err(Fault::DeviceNotFound(device.to_string())),
        Err(_) => Ok(Settle::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_default_table_covers_operations() {
        let table = HandlerTable::with_defaults();
        assert!(table.get(Operation::MoveTo, Some(DeviceKind::Axis)).is_some());
        assert!(table.get(Operation::Fire, Some(DeviceKind::Vacuum)).is_some());
        assert!(table.get(Operation::Delay, None).is_some());
        assert!(table.get(Operation::Fire, Some(DeviceKind::Axis)).is_none());
        assert!(table.get(Operation::MoveTo, None).is_none());
    }

    #[test]
    fn test_guard_stops_unless_disarmed() {
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopped);
        let guard = MotionGuard::new(move || flag.store(true, Ordering::SeqCst));
        guard.disarm();
        assert!(!stopped.load(Ordering::SeqCst));

        let flag = Arc::clone(&stopped);
        drop(MotionGuard::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(stopped.load(Ordering::SeqCst));
    }
}
