//! Cylinder and vacuum handlers.

use super::{ActionCall, HandlerFuture, HandlerTable, MotionGuard, Settle, settle};
use crate::error::Fault;
use crate::step::Operation;
use crate::value::StepValue;
use cell_common::topology::DeviceKind;
use cell_hal::ActuatorDevice;
use futures::FutureExt;
use std::sync::Arc;
use tracing::warn;

pub(super) fn register(table: &mut HandlerTable) {
    for kind in [DeviceKind::Cylinder, DeviceKind::Vacuum] {
        let target = Some(kind);
        table.register(Operation::Fire, target, fire);
        table.register(Operation::FireAndWait, target, fire_and_wait);
        table.register(Operation::CylinderWaitFor, target, wait_for);
        table.register(Operation::Stop, target, stop);
        table.register(Operation::ReadAnalog, target, read_analog);
    }
}

/// Wait until settled at `on`, force-stopping once the bound expires.
async fn wait_settled(
    call: &ActionCall,
    actuator: &Arc<dyn ActuatorDevice>,
    on: bool,
) -> Result<(), Fault> {
    let stopper = Arc::clone(actuator);
    let guard = MotionGuard::new(move || stopper.stop());

    let bound = call.wait_bound();
    let mut rx = actuator.subscribe();
    if settle(actuator.id(), &mut rx, bound, |s| s.is_settled_at(on)).await? == Settle::TimedOut {
        warn!(
            "Actuator {} not settled at {} after {:?}, forcing stop",
            actuator.id(),
            on,
            bound
        );
        actuator.stop();
    }

    guard.disarm();
    Ok(())
}

/// `true` only when settled extended/on. Interrupted strokes report `false`.
fn settled_on(actuator: &dyn ActuatorDevice) -> StepValue {
    StepValue::Bool(actuator.state().is_settled_at(true))
}

fn fire(call: ActionCall) -> HandlerFuture {
    async move {
        let actuator = call.ctx.actuator(&call.device)?;
        let on = call.flag(0, "state")?;
        actuator.fire(on)?;
        Ok(StepValue::Bool(on))
    }
    .boxed()
}

fn fire_and_wait(call: ActionCall) -> HandlerFuture {
    async move {
        let actuator = call.ctx.actuator(&call.device)?;
        let on = call.flag(0, "state")?;
        actuator.fire(on)?;
        wait_settled(&call, &actuator, on).await?;
        Ok(settled_on(actuator.as_ref()))
    }
    .boxed()
}

fn wait_for(call: ActionCall) -> HandlerFuture {
    async move {
        let actuator = call.ctx.actuator(&call.device)?;
        let on = call.flag(0, "state")?;
        if !actuator.state().is_settled_at(on) {
            wait_settled(&call, &actuator, on).await?;
        }
        Ok(settled_on(actuator.as_ref()))
    }
    .boxed()
}

fn stop(call: ActionCall) -> HandlerFuture {
    async move {
        let actuator = call.ctx.actuator(&call.device)?;
        actuator.stop();
        Ok(settled_on(actuator.as_ref()))
    }
    .boxed()
}

/// Stroke position in `[0, 1]`.
fn read_analog(call: ActionCall) -> HandlerFuture {
    async move {
        let actuator = call.ctx.actuator(&call.device)?;
        Ok(StepValue::Number(actuator.state().position))
    }
    .boxed()
}
