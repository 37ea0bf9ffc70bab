//! Integration tests for the simulation driver devices.
//!
//! All tests run on paused tokio time so motion timing is deterministic.

use cell_common::topology::{ActuatorConfig, ActuatorKind, AxisConfig, ContactConfig};
use cell_hal::{ActuatorDevice, AxisDevice, DriverOptions, DriverRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TOLERANCE: f64 = 0.001;

fn driver() -> Arc<dyn cell_hal::DeviceDriver> {
    DriverRegistry::with_builtin_drivers()
        .create_driver("simulation", &DriverOptions::default())
        .expect("simulation driver")
}

fn axis(min: f64, max: f64) -> Arc<dyn AxisDevice> {
    driver()
        .create_axis(&AxisConfig::new("A", min, max))
        .expect("axis")
}

fn cylinder(ms: u64) -> Arc<dyn ActuatorDevice> {
    driver()
        .create_actuator(&ActuatorConfig::new("Clamp", ActuatorKind::Cylinder, ms))
        .expect("cylinder")
}

#[tokio::test(start_paused = true)]
async fn test_axis_converges_to_target() {
    let axis = axis(0.0, 100.0);
    let mut rx = axis.subscribe();

    axis.move_to(50.0, None).expect("move");
    let state = *rx.wait_for(|s| !s.is_moving).await.expect("axis alive");

    assert!((state.position - 50.0).abs() < TOLERANCE);
    assert!((axis.state().position - 50.0).abs() < TOLERANCE);
}

#[tokio::test(start_paused = true)]
async fn test_axis_clamps_to_travel_limit() {
    let axis = axis(-10.0, 20.0);
    let mut rx = axis.subscribe();

    assert_eq!(axis.move_to(500.0, None).expect("move"), 20.0);
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    assert!((axis.state().position - 20.0).abs() < TOLERANCE);

    assert_eq!(axis.move_to(-500.0, None).expect("move"), -10.0);
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    assert!((axis.state().position + 10.0).abs() < TOLERANCE);
}

#[tokio::test(start_paused = true)]
async fn test_axis_motion_takes_distance_over_speed() {
    let axis = axis(0.0, 100.0);
    let mut rx = axis.subscribe();
    let started = Instant::now();

    // 100 units/s default speed: 50 units take 500 ms
    axis.move_to(50.0, None).expect("move");
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(490), "too fast: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(530), "too slow: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_new_command_cancels_in_flight_motion() {
    let axis = axis(0.0, 100.0);
    let mut rx = axis.subscribe();

    axis.move_to(100.0, None).expect("move");
    tokio::time::sleep(Duration::from_millis(200)).await;
    axis.move_to(10.0, None).expect("move back");

    let state = *rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    assert!((state.position - 10.0).abs() < TOLERANCE);

    // The superseded task never writes again
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!((axis.state().position - 10.0).abs() < TOLERANCE);
}

#[tokio::test(start_paused = true)]
async fn test_stop_freezes_position() {
    let axis = axis(0.0, 100.0);

    axis.move_to(100.0, None).expect("move");
    tokio::time::sleep(Duration::from_millis(305)).await;
    axis.stop();

    let frozen = axis.state();
    assert!(!frozen.is_moving);
    assert!(frozen.position > 20.0 && frozen.position < 40.0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(axis.state().position, frozen.position);
}

#[tokio::test(start_paused = true)]
async fn test_home_marks_axis_homed() {
    let axis = axis(0.0, 100.0);
    let mut rx = axis.subscribe();

    axis.move_to(30.0, None).expect("move");
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    assert!(!axis.state().is_homed);

    axis.home().expect("home");
    let state = *rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    assert!(state.is_homed);
    assert!(state.position.abs() < TOLERANCE);
}

#[tokio::test(start_paused = true)]
async fn test_contact_model_reports_pressure() {
    let mut config = AxisConfig::new("Press", 0.0, 100.0);
    config.contact = Some(ContactConfig {
        surface: 40.0,
        stiffness: 2.0,
    });
    let axis = driver().create_axis(&config).expect("axis");
    let mut rx = axis.subscribe();

    axis.move_to(45.0, None).expect("move");
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");
    let pressure = axis.process_value().expect("modeled");
    assert!((pressure - 10.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_cylinder_settles_after_action_time() {
    let cyl = cylinder(200);
    let mut rx = cyl.subscribe();
    let started = Instant::now();

    cyl.fire(true).expect("fire");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!cyl.state().is_on, "extended too early");

    let state = *rx.wait_for(|s| s.is_settled_at(true)).await.expect("alive");
    let elapsed = started.elapsed();
    assert!(state.is_on);
    assert!(!state.is_changing);
    assert_eq!(state.position, 1.0);
    assert!(elapsed >= Duration::from_millis(200), "settled at {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(230), "settled at {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_cylinder_stop_leaves_partial_stroke() {
    let cyl = cylinder(200);
    cyl.fire(true).expect("fire");
    tokio::time::sleep(Duration::from_millis(105)).await;
    cyl.stop();

    let state = cyl.state();
    assert!(!state.is_changing);
    assert!(!state.is_on);
    assert!(state.position > 0.0 && state.position < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_vacuum_reverse_is_scaled_by_distance() {
    let vac = driver()
        .create_actuator(&ActuatorConfig::new("Suction", ActuatorKind::Vacuum, 200))
        .expect("vacuum");
    let mut rx = vac.subscribe();

    vac.fire(true).expect("on");
    tokio::time::sleep(Duration::from_millis(105)).await;

    // Half-way back takes roughly half the action time
    let started = Instant::now();
    vac.fire(false).expect("off");
    rx.wait_for(|s| s.is_settled_at(false)).await.expect("alive");
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(150), "reverse took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_sees_current_value_immediately() {
    let axis = axis(0.0, 100.0);
    axis.move_to(20.0, None).expect("move");
    let mut rx = axis.subscribe();
    rx.wait_for(|s| !s.is_moving).await.expect("axis alive");

    let late = axis.subscribe();
    let state = *late.borrow();
    assert!((state.position - 20.0).abs() < TOLERANCE);
    assert!(!state.is_moving);
}
