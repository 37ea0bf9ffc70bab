//! Axis handlers.

use super::{ActionCall, HandlerFuture, HandlerTable, MotionGuard, Settle, settle};
use crate::error::Fault;
use crate::step::Operation;
use crate::value::StepValue;
use cell_common::topology::DeviceKind;
use cell_hal::AxisDevice;
use futures::FutureExt;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub(super) fn register(table: &mut HandlerTable) {
    let axis = Some(DeviceKind::Axis);
    table.register(Operation::MoveTo, axis, move_to);
    table.register(Operation::MoveToAndWait, axis, move_to_and_wait);
    table.register(Operation::MoveUntil, axis, move_until);
    table.register(Operation::Home, axis, home);
    table.register(Operation::Stop, axis, stop);
    table.register(Operation::ReadAnalog, axis, read_analog);
}

/// Issue the move described by args `[target, speed?]` and return the
/// effective target.
fn command(call: &ActionCall, axis: &Arc<dyn AxisDevice>) -> Result<f64, Fault> {
    let target = call.target(0, axis.state().position)?;
    let speed = call.opt_number(1, "speed")?;
    Ok(axis.move_to(target, speed)?)
}

/// Wait for the axis to stop, force-stopping it once the bound expires.
async fn wait_idle(call: &ActionCall, axis: &Arc<dyn AxisDevice>) -> Result<(), Fault> {
    let stopper = Arc::clone(axis);
    let guard = MotionGuard::new(move || stopper.stop());

    let bound = call.wait_bound();
    let mut rx = axis.subscribe();
    if settle(axis.id(), &mut rx, bound, |s| !s.is_moving).await? == Settle::TimedOut {
        warn!(
            "Axis {} still moving after {:?}, forcing stop",
            axis.id(),
            bound
        );
        axis.stop();
    }

    guard.disarm();
    Ok(())
}

fn move_to(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        let target = command(&call, &axis)?;
        Ok(StepValue::Number(target))
    }
    .boxed()
}

fn move_to_and_wait(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        command(&call, &axis)?;
        wait_idle(&call, &axis).await?;
        Ok(StepValue::Number(axis.state().position))
    }
    .boxed()
}

/// Args `[target, threshold, speed?]`. Stops at the first sample where the
/// process value reaches `threshold`.
fn move_until(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        let target = call.target(0, axis.state().position)?;
        let threshold = call.number(1, "threshold")?;
        let speed = call.opt_number(2, "speed")?;

        if axis.process_value().is_none() {
            return Err(Fault::invalid(
                call.operation,
                format!("axis {} has no process-variable model", axis.id()),
            ));
        }

        axis.move_to(target, speed)?;

        let stopper = Arc::clone(&axis);
        let guard = MotionGuard::new(move || stopper.stop());

        let bound = call.wait_bound();
        let deadline = Instant::now() + bound;
        let mut ticker = tokio::time::interval(call.ctx.sample_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let value = axis.process_value().unwrap_or_default();
            if value >= threshold {
                axis.stop();
                debug!(
                    "Axis {} reached threshold {:.3} at {:.3}",
                    axis.id(),
                    threshold,
                    axis.state().position
                );
                break;
            }
            if !axis.state().is_moving {
                debug!("Axis {} completed without reaching {:.3}", axis.id(), threshold);
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Axis {} did not reach {:.3} within {:?}, forcing stop",
                    axis.id(),
                    threshold,
                    bound
                );
                axis.stop();
                break;
            }
        }

        guard.disarm();
        Ok(StepValue::Number(axis.state().position))
    }
    .boxed()
}

fn home(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        axis.home()?;
        wait_idle(&call, &axis).await?;
        Ok(StepValue::Number(axis.state().position))
    }
    .boxed()
}

fn stop(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        axis.stop();
        Ok(StepValue::Number(axis.state().position))
    }
    .boxed()
}

/// Process value when modeled, otherwise the position.
fn read_analog(call: ActionCall) -> HandlerFuture {
    async move {
        let axis = call.ctx.axis(&call.device)?;
        let value = axis
            .process_value()
            .unwrap_or_else(|| axis.state().position);
        Ok(StepValue::Number(value))
    }
    .boxed()
}
