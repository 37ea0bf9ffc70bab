//! Integration tests for the flow interpreter on the simulation driver.
//!
//! All tests run on paused tokio time so motion timing is deterministic.

use cell_common::consts::SYSTEM_DEVICE;
use cell_common::telemetry::EventKind;
use cell_common::topology::{
    ActuatorConfig, ActuatorKind, AxisConfig, ContactConfig, MachineTopology,
};
use cell_flow::error::Fault;
use cell_flow::handlers::{ActionCall, HandlerFuture, HandlerTable};
use cell_flow::interpreter::{Interpreter, SkipEscalation, StepTrace, TraceStatus};
use cell_flow::step::{self, Arg, ErrorHandling, Operation};
use cell_flow::{ExecutionContext, StepValue};
use cell_hal::{DriverOptions, DriverRegistry};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const TOLERANCE: f64 = 0.001;

fn topology() -> MachineTopology {
    let mut z = AxisConfig::new("Z", 0.0, 100.0);
    z.contact = Some(ContactConfig {
        surface: 75.0,
        stiffness: 2.0,
    });
    MachineTopology::new("test-cell")
        .with_axis(AxisConfig::new("A", 0.0, 100.0))
        .with_axis(AxisConfig::new("B", -90.0, 180.0))
        .with_axis(z)
        .with_actuator(ActuatorConfig::new("Clamp", ActuatorKind::Cylinder, 200))
        .with_actuator(ActuatorConfig::new("Cup", ActuatorKind::Vacuum, 50))
}

fn context() -> Arc<ExecutionContext> {
    let driver = DriverRegistry::with_builtin_drivers()
        .create_driver("simulation", &DriverOptions::default())
        .expect("simulation driver");
    Arc::new(ExecutionContext::new(Arc::new(topology()), driver))
}

fn drain(rx: &mut broadcast::Receiver<StepTrace>) -> Vec<StepTrace> {
    let mut traces = Vec::new();
    while let Ok(trace) = rx.try_recv() {
        traces.push(trace);
    }
    traces
}

fn position(ctx: &ExecutionContext, id: &str) -> f64 {
    ctx.axis(id).expect("axis").state().position
}

/// Counts its invocations in the `calls` variable and fails until the third.
fn flaky(call: ActionCall) -> HandlerFuture {
    async move {
        let calls = call
            .ctx
            .variable("calls")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            + 1.0;
        call.ctx.set_variable("calls", StepValue::Number(calls));
        if calls < 3.0 {
            Err(Fault::Thrown(format!("attempt {calls} failed")))
        } else {
            Ok(StepValue::Number(calls))
        }
    }
    .boxed()
}

/// Counts its invocations in the `count` variable.
fn counter(call: ActionCall) -> HandlerFuture {
    async move {
        let count = call.ctx.variable("count").and_then(|v| v.as_f64()).unwrap_or(0.0) + 1.0;
        call.ctx.set_variable("count", StepValue::Number(count));
        Ok(StepValue::Number(count))
    }
    .boxed()
}

fn flaky_interpreter() -> Interpreter {
    let mut table = HandlerTable::with_defaults();
    table.register(Operation::NoOp, None, flaky);
    Interpreter::new().with_handlers(table)
}

// ─── Composition ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_two_axis_sequence_completes_in_order() {
    let ctx = context();
    let interpreter = Interpreter::new();
    let mut rx = interpreter.subscribe();

    let flow = step::sequence(step::move_to_and_wait("A", 50.0), |_| {
        step::move_to_and_wait("B", 90.0)
    });
    let started = Instant::now();
    let result = interpreter.run(&flow, &ctx).await.expect("flow");

    assert_eq!(result.as_f64().map(|p| (p - 90.0).abs() < TOLERANCE), Some(true));
    assert!((position(&ctx, "A") - 50.0).abs() < TOLERANCE);
    assert!((position(&ctx, "B") - 90.0).abs() < TOLERANCE);
    // 50 units then 90 units at the default 100 units/s
    assert!(started.elapsed() >= Duration::from_millis(1300));

    let completed: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter(|t| t.status == TraceStatus::Completed && t.device != SYSTEM_DEVICE)
        .map(|t| t.device)
        .collect();
    assert_eq!(completed, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_passes_first_result_to_next() {
    let ctx = context();
    let flow = step::sequence(step::set_variable("n", 4.0), |first| {
        let doubled = first.as_f64().unwrap_or(0.0) * 2.0;
        step::set_variable("m", doubled)
    });

    let result = Interpreter::new().run(&flow, &ctx).await.expect("flow");
    assert_eq!(result, StepValue::Number(8.0));
    assert_eq!(ctx.variable("m"), Some(StepValue::Number(8.0)));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_with_selects_combined_result() {
    let ctx = context();
    let flow = step::sequence_with(
        step::check_level(true),
        |_| step::set_variable("label", "ok"),
        |first, second| StepValue::List(vec![first, second]),
    );

    let result = Interpreter::new().run(&flow, &ctx).await.expect("flow");
    assert_eq!(
        result,
        StepValue::List(vec![StepValue::Bool(true), StepValue::from("ok")])
    );
}

#[tokio::test(start_paused = true)]
async fn test_map_transforms_source_result() {
    let ctx = context();
    let flow = step::map(step::read_analog("missing", 2.5), |v| {
        StepValue::Number(v.as_f64().unwrap_or(0.0) * 10.0)
    });
    let result = Interpreter::new().run(&flow, &ctx).await.expect("flow");
    assert_eq!(result, StepValue::Number(25.0));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_runs_branches_concurrently() {
    let ctx = context();
    let flow = step::parallel([
        step::move_to_and_wait("A", 100.0),
        step::move_to_and_wait("B", 100.0),
    ]);

    let started = Instant::now();
    let result = Interpreter::new().run(&flow, &ctx).await.expect("flow");

    let positions: Vec<f64> = result
        .as_list()
        .expect("list")
        .iter()
        .filter_map(StepValue::as_f64)
        .collect();
    assert_eq!(positions.len(), 2);
    // Both moves take one second; run back to back they would take two
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_fault_stops_sibling_motion() {
    let ctx = context();
    let flow = step::parallel([
        step::move_to_and_wait("A", 100.0),
        step::chain([step::delay(100), step::throw("jammed")]),
    ]);

    let result = Interpreter::new().run(&flow, &ctx).await;
    assert_eq!(result, Err(Fault::Thrown("jammed".to_string())));

    let axis = ctx.axis("A").expect("axis");
    assert!(!axis.state().is_moving);
    assert!(axis.state().position < 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_loop_repeats_and_yields_last_result() {
    let ctx = context();
    let mut table = HandlerTable::with_defaults();
    table.register(Operation::NoOp, None, counter);
    let interpreter = Interpreter::new().with_handlers(table);

    let result = interpreter.run(&step::repeat(step::no_op(), 4), &ctx).await;
    assert_eq!(result, Ok(StepValue::Number(4.0)));

    let result = interpreter.run(&step::repeat(step::no_op(), 0), &ctx).await;
    assert_eq!(result, Ok(StepValue::Unit));
    assert_eq!(ctx.variable("count"), Some(StepValue::Number(4.0)));
}

// ─── Retry, escalation, cancellation ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_retry_reruns_failed_step() {
    let ctx = context();
    let interpreter = flaky_interpreter();
    let mut rx = interpreter.subscribe();

    let flow = step::no_op().with_retry(2);
    let result = interpreter.run(&flow, &ctx).await;
    assert_eq!(result, Ok(StepValue::Number(3.0)));

    let attempts: Vec<(TraceStatus, u32)> = drain(&mut rx)
        .into_iter()
        .map(|t| (t.status, t.attempt))
        .collect();
    assert_eq!(
        attempts,
        vec![
            (TraceStatus::Running, 1),
            (TraceStatus::Error, 1),
            (TraceStatus::Running, 2),
            (TraceStatus::Error, 2),
            (TraceStatus::Running, 3),
            (TraceStatus::Completed, 3),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted_propagates_last_fault() {
    let ctx = context();
    let interpreter = flaky_interpreter();

    let result = interpreter.run(&step::no_op().with_retry(1), &ctx).await;
    assert_eq!(result, Err(Fault::Thrown("attempt 2 failed".to_string())));
    assert_eq!(ctx.variable("calls"), Some(StepValue::Number(2.0)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_reruns_whole_composite() {
    let ctx = context();
    let interpreter = flaky_interpreter();

    // The marker is set once per attempt of the enclosing scope
    let flow = step::scope(
        "Probe",
        step::chain([
            step::sequence(step::read_analog("marks", 0.0), |v| {
                step::set_variable("marks", v.as_f64().unwrap_or(0.0) + 1.0)
            }),
            step::no_op(),
        ]),
    )
    .with_retry(5);

    interpreter.run(&flow, &ctx).await.expect("flow");
    assert_eq!(ctx.variable("marks"), Some(StepValue::Number(3.0)));
}

#[tokio::test(start_paused = true)]
async fn test_skip_escalation_substitutes_value() {
    let ctx = context();
    let interpreter =
        Interpreter::new().with_escalation(Arc::new(SkipEscalation(StepValue::from("skipped"))));

    let skipped = step::throw("no part").on_error(ErrorHandling::Skip);
    assert_eq!(
        interpreter.run(&skipped, &ctx).await,
        Ok(StepValue::from("skipped"))
    );

    let terminated = step::throw("no part");
    assert_eq!(
        interpreter.run(&terminated, &ctx).await,
        Err(Fault::Thrown("no part".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_default_escalation_propagates() {
    let ctx = context();
    let flow = step::throw("no part").on_error(ErrorHandling::AskUser);
    assert_eq!(
        Interpreter::new().run(&flow, &ctx).await,
        Err(Fault::Thrown("no part".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_never_retried() {
    let ctx = context();
    let interpreter = Interpreter::new();
    let mut rx = interpreter.subscribe();

    let canceller = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let flow = step::delay(10_000).with_retry(3);
    let started = Instant::now();
    assert_eq!(interpreter.run(&flow, &ctx).await, Err(Fault::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(200));

    let running = drain(&mut rx)
        .into_iter()
        .filter(|t| t.status == TraceStatus::Running)
        .count();
    assert_eq!(running, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_context_runs_nothing() {
    let ctx = context();
    ctx.cancel();
    let result = Interpreter::new()
        .run(&step::set_variable("x", 1.0), &ctx)
        .await;
    assert_eq!(result, Err(Fault::Cancelled));
    assert_eq!(ctx.variable("x"), None);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_moving_axis() {
    let ctx = context();
    let canceller = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let result = Interpreter::new()
        .run(&step::move_to_and_wait("A", 100.0), &ctx)
        .await;
    assert_eq!(result, Err(Fault::Cancelled));

    let state = ctx.axis("A").expect("axis").state();
    assert!(!state.is_moving);
    assert!(state.position > 0.0 && state.position < 50.0);
}

// ─── Device operations ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fire_and_wait_takes_action_time() {
    let ctx = context();
    let started = Instant::now();
    let result = Interpreter::new()
        .run(&step::fire_and_wait("Clamp", true), &ctx)
        .await;

    assert_eq!(result, Ok(StepValue::Bool(true)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(230), "{elapsed:?}");

    // Already settled: returns without waiting
    let started = Instant::now();
    let result = Interpreter::new()
        .run(&step::wait_for("Clamp", true), &ctx)
        .await;
    assert_eq!(result, Ok(StepValue::Bool(true)));
    assert!(started.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_retract_is_not_settled_extended() {
    let ctx = context();
    let interpreter = Interpreter::new();
    interpreter
        .run(&step::fire_and_wait("Clamp", true), &ctx)
        .await
        .expect("extend");

    let retract = step::fire_and_wait("Clamp", false).with_timeout(Duration::from_millis(100));
    assert_eq!(interpreter.run(&retract, &ctx).await, Ok(StepValue::Bool(false)));
    let state = ctx.actuator("Clamp").expect("actuator").state();
    assert!(!state.is_changing);
    assert!(state.position > 0.0 && state.position < 1.0);

    // Extended is not the last commanded state, so the wait runs to its bound
    let started = Instant::now();
    let wait = step::wait_for("Clamp", true).with_timeout(Duration::from_millis(300));
    assert_eq!(interpreter.run(&wait, &ctx).await, Ok(StepValue::Bool(false)));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_delay_is_invalid_argument() {
    let ctx = context();
    let flow = step::action(SYSTEM_DEVICE, Operation::Delay, [Arg::from(1e30)]);
    let result = Interpreter::new().run(&flow, &ctx).await;
    assert!(matches!(
        result,
        Err(Fault::InvalidArgument {
            operation: Operation::Delay,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_soft_timeout_stops_device_and_continues() {
    let ctx = context();
    let flow = step::move_to_and_wait("A", 100.0)
        .with_timeout(Duration::from_millis(200))
        .then(step::set_variable("after", true));

    Interpreter::new().run(&flow, &ctx).await.expect("flow");

    let state = ctx.axis("A").expect("axis").state();
    assert!(!state.is_moving);
    assert!(state.position < 50.0);
    assert_eq!(ctx.variable("after"), Some(StepValue::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn test_move_by_is_relative_to_current_position() {
    let ctx = context();
    let flow = step::move_to_and_wait("A", 30.0).then(step::action(
        "A",
        Operation::MoveToAndWait,
        [Arg::position(|p| p + 15.0)],
    ));

    Interpreter::new().run(&flow, &ctx).await.expect("flow");
    assert!((position(&ctx, "A") - 45.0).abs() < TOLERANCE);

    // MoveTo returns the clamped target without waiting
    let result = Interpreter::new()
        .run(&step::move_by("A", |p| p + 500.0), &ctx)
        .await;
    assert_eq!(result, Ok(StepValue::Number(100.0)));
}

#[tokio::test(start_paused = true)]
async fn test_move_until_stops_at_threshold() {
    let ctx = context();
    let result = Interpreter::new()
        .run(&step::move_until("Z", 100.0, 10.0), &ctx)
        .await
        .expect("flow");

    // Pressure reaches 10 at 80 units (surface 75, stiffness 2)
    let stopped_at = result.as_f64().expect("position");
    assert!((79.9..=82.5).contains(&stopped_at), "{stopped_at}");
    assert!(!ctx.axis("Z").expect("axis").state().is_moving);
}

#[tokio::test(start_paused = true)]
async fn test_move_until_requires_process_model() {
    let ctx = context();
    let result = Interpreter::new()
        .run(&step::move_until("A", 100.0, 10.0), &ctx)
        .await;
    assert!(matches!(result, Err(Fault::InvalidArgument { operation: Operation::MoveUntil, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_and_unsupported_operation() {
    let ctx = context();
    let interpreter = Interpreter::new();

    assert_eq!(
        interpreter.run(&step::home("Nope"), &ctx).await,
        Err(Fault::DeviceNotFound("Nope".to_string()))
    );
    assert_eq!(
        interpreter.run(&step::fire("A", true), &ctx).await,
        Err(Fault::UnsupportedOperation {
            operation: Operation::Fire,
            target: "A".to_string(),
        })
    );
}

// ─── Materials ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_material_lifecycle_emits_events_in_order() {
    let ctx = context();
    let flow = step::chain([
        step::spawn("In", "Blank"),
        step::attach("Cup", "In"),
        step::detach("Cup", "Out"),
        step::transform("Out", "Assembled"),
        step::consume("Out"),
    ]);

    let consumed = Interpreter::new().run(&flow, &ctx).await.expect("flow");
    let id = consumed.as_str().expect("material id").to_string();
    assert!(id.starts_with("Blank-"));

    let events = ctx.drain_events();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::MaterialSpawn,
            EventKind::Attach,
            EventKind::Detach,
            EventKind::MaterialTransform,
            EventKind::MaterialConsume,
        ]
    );
    for event in &events {
        let payload = event.payload.as_ref().expect("payload");
        assert_eq!(payload["id"], id.as_str());
    }
    assert!(ctx.materials_snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_material_operations_on_empty_station_fault() {
    let ctx = context();
    let interpreter = Interpreter::new();

    assert_eq!(
        interpreter.run(&step::consume("Out"), &ctx).await,
        Err(Fault::EmptyStation("Out".to_string()))
    );
    assert_eq!(
        interpreter.run(&step::unbind("Out"), &ctx).await,
        Ok(StepValue::Unit)
    );

    interpreter
        .run(&step::bind("Nest", "P-1", "Housing"), &ctx)
        .await
        .expect("bind");
    assert_eq!(ctx.material("Nest").map(|m| m.id), Some("P-1".to_string()));
    // Bind and Unbind correct the table without events
    assert!(ctx.drain_events().is_empty());
}
