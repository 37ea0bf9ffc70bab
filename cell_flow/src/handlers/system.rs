//! `System` pseudo-device handlers: timing, control, variables and materials.
//!
//! Material operations keep the context's material table in sync and queue
//! the matching lifecycle event for telemetry. `Bind` and `Unbind` correct
//! the table silently.

use super::{ActionCall, HandlerFuture, HandlerTable};
use crate::error::Fault;
use crate::step::Operation;
use crate::value::StepValue;
use cell_common::telemetry::{FlowEvent, MaterialInfo};
use futures::FutureExt;
use std::time::Duration;
use tracing::{debug, info};

pub(super) fn register(table: &mut HandlerTable) {
    let handlers: [(Operation, super::Handler); 13] = [
        (Operation::Delay, delay),
        (Operation::Throw, throw),
        (Operation::NoOp, no_op),
        (Operation::ReadAnalog, read_analog),
        (Operation::CheckLevel, check_level),
        (Operation::SetVariable, set_variable),
        (Operation::Spawn, spawn),
        (Operation::Transform, transform),
        (Operation::Consume, consume),
        (Operation::Bind, bind),
        (Operation::Unbind, unbind),
        (Operation::Attach, attach),
        (Operation::Detach, detach),
    ];
    for (operation, handler) in handlers {
        table.register(operation, None, handler);
    }
}

// ─── Control ────────────────────────────────────────────────────────

/// Args `[ms]`.
fn delay(call: ActionCall) -> HandlerFuture {
    async move {
        let ms = call.number(0, "milliseconds")?;
        if ms < 0.0 {
            return Err(Fault::invalid(call.operation, "delay cannot be negative"));
        }
        let duration = Duration::try_from_secs_f64(ms / 1000.0)
            .map_err(|_| Fault::invalid(call.operation, format!("delay of {ms} ms is too long")))?;
        tokio::time::sleep(duration).await;
        Ok(StepValue::Unit)
    }
    .boxed()
}

/// Args `[message?]`.
fn throw(call: ActionCall) -> HandlerFuture {
    async move {
        let message = match call.args.first() {
            Some(_) => call.text(0, "message")?.to_string(),
            None => "flow raised a fault".to_string(),
        };
        Err(Fault::Thrown(message))
    }
    .boxed()
}

fn no_op(_call: ActionCall) -> HandlerFuture {
    futures::future::ready(Ok(StepValue::Unit)).boxed()
}

// ─── Variables ──────────────────────────────────────────────────────

/// Args `[variable, default?]`.
fn read_analog(call: ActionCall) -> HandlerFuture {
    async move {
        let name = call.text(0, "variable")?;
        match call.ctx.variable(name) {
            Some(value) => Ok(value),
            None if call.args.len() > 1 => Ok(call.value(1, "default")?.clone()),
            None => Err(Fault::invalid(
                call.operation,
                format!("variable {name} is not set"),
            )),
        }
    }
    .boxed()
}

/// Args `[expected]`. Echoes the expected level.
fn check_level(call: ActionCall) -> HandlerFuture {
    async move { Ok(call.value(0, "expected level")?.clone()) }.boxed()
}

/// Args `[name, value]`.
fn set_variable(call: ActionCall) -> HandlerFuture {
    async move {
        let name = call.text(0, "name")?;
        let value = call.value(1, "value")?.clone();
        debug!("Variable {} = {}", name, value);
        call.ctx.set_variable(name, value.clone());
        Ok(value)
    }
    .boxed()
}

// ─── Materials ──────────────────────────────────────────────────────

/// Args `[station, class]`. Yields the new material id.
fn spawn(call: ActionCall) -> HandlerFuture {
    async move {
        let station = call.text(0, "station")?;
        let class = call.text(1, "class")?;
        let material = MaterialInfo::new(call.ctx.next_material_id(class), class);
        if let Some(replaced) = call.ctx.put_material(station, material.clone()) {
            debug!("Station {} discarded {}", station, replaced.id);
        }
        info!("Spawned {} ({}) at {}", material.id, material.class, station);
        call.ctx
            .push_event(FlowEvent::material_spawn(station, &material));
        Ok(StepValue::Text(material.id))
    }
    .boxed()
}

/// Args `[station, class]`. Keeps the material id.
fn transform(call: ActionCall) -> HandlerFuture {
    async move {
        let station = call.text(0, "station")?;
        let class = call.text(1, "class")?;
        let previous = call
            .ctx
            .material(station)
            .ok_or_else(|| Fault::EmptyStation(station.to_string()))?;
        let material = MaterialInfo::new(previous.id.clone(), class);
        call.ctx.put_material(station, material.clone());
        debug!("Material {} {} -> {}", material.id, previous.class, class);
        call.ctx.push_event(FlowEvent::material_transform(
            station,
            &previous.class,
            &material,
        ));
        Ok(StepValue::Text(material.id))
    }
    .boxed()
}

/// Args `[station]`.
fn consume(call: ActionCall) -> HandlerFuture {
    async move {
        let station = call.text(0, "station")?;
        let material = call
            .ctx
            .take_material(station)
            .ok_or_else(|| Fault::EmptyStation(station.to_string()))?;
        info!("Consumed {} from {}", material.id, station);
        call.ctx
            .push_event(FlowEvent::material_consume(station, &material));
        Ok(StepValue::Text(material.id))
    }
    .boxed()
}

/// Args `[station, id, class]`.
fn bind(call: ActionCall) -> HandlerFuture {
    async move {
        let station = call.text(0, "station")?;
        let id = call.text(1, "id")?;
        let class = call.text(2, "class")?;
        call.ctx.put_material(station, MaterialInfo::new(id, class));
        Ok(StepValue::Text(id.to_string()))
    }
    .boxed()
}

/// Args `[station]`. Unbinding an empty station yields `Unit`.
fn unbind(call: ActionCall) -> HandlerFuture {
    async move {
        let station = call.text(0, "station")?;
        Ok(call
            .ctx
            .take_material(station)
            .map_or(StepValue::Unit, |m| StepValue::Text(m.id)))
    }
    .boxed()
}

/// Args `[holder, source]`.
fn attach(call: ActionCall) -> HandlerFuture {
    async move {
        let holder = call.text(0, "holder")?;
        let source = call.text(1, "source")?;
        let material = call
            .ctx
            .take_material(source)
            .ok_or_else(|| Fault::EmptyStation(source.to_string()))?;
        call.ctx.put_material(holder, material.clone());
        debug!("Attached {} from {} to {}", material.id, source, holder);
        call.ctx
            .push_event(FlowEvent::attach(holder, source, &material));
        Ok(StepValue::Text(material.id))
    }
    .boxed()
}

/// Args `[holder, target]`.
fn detach(call: ActionCall) -> HandlerFuture {
    async move {
        let holder = call.text(0, "holder")?;
        let target = call.text(1, "target")?;
        let material = call
            .ctx
            .take_material(holder)
            .ok_or_else(|| Fault::EmptyStation(holder.to_string()))?;
        call.ctx.put_material(target, material.clone());
        debug!("Detached {} from {} to {}", material.id, holder, target);
        call.ctx
            .push_event(FlowEvent::detach(holder, target, &material));
        Ok(StepValue::Text(material.id))
    }
    .boxed()
}
