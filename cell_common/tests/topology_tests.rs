//! Config directory loading tests.
//!
//! Tests for `load_topology()`: missing file, malformed TOML, validation
//! failures surfaced as `ConfigError::ValidationError`, and a full
//! round-trip of the demo layout.

use cell_common::config::{ConfigError, load_topology};
use cell_common::topology::{ActuatorKind, DeviceKind};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_machine_toml(dir: &Path, content: &str) {
    fs::write(dir.join("machine.toml"), content).unwrap();
}

#[test]
fn test_missing_machine_file() {
    let dir = TempDir::new().unwrap();
    let result = load_topology(dir.path());
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn test_malformed_machine_file() {
    let dir = TempDir::new().unwrap();
    write_machine_toml(dir.path(), "[[axes]\nid = ");
    let result = load_topology(dir.path());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_duplicate_ids_fail_validation() {
    let dir = TempDir::new().unwrap();
    write_machine_toml(
        dir.path(),
        r#"
name = "dup"

[[axes]]
id = "X"
min = 0.0
max = 10.0

[[actuators]]
id = "X"
kind = "cylinder"
"#,
    );

    match load_topology(dir.path()) {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("X"), "got: {msg}"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_full_layout_loads() {
    let dir = TempDir::new().unwrap();
    write_machine_toml(
        dir.path(),
        r#"
name = "Cell A"

[[axes]]
id = "A"
board = 0
channel = 0
min = 0.0
max = 100.0
max_speed = 250.0

[[axes]]
id = "B"
board = 0
channel = 1
min = -90.0
max = 180.0

[[actuators]]
id = "Clamp"
kind = "cylinder"
channel = 4
action_time_ms = 120

[[actuators]]
id = "Suction"
kind = "vacuum"
channel = 5
action_time_ms = 40
"#,
    );

    let topo = load_topology(dir.path()).expect("valid topology");
    assert_eq!(topo.name, "Cell A");
    assert_eq!(topo.axes.len(), 2);
    assert_eq!(topo.axis("A").map(|a| a.max_speed), Some(250.0));
    assert_eq!(topo.soft_limits("B"), Some((-90.0, 180.0)));
    assert_eq!(topo.kind_of("Suction"), Some(DeviceKind::Vacuum));
    assert_eq!(
        topo.actuator("Clamp").map(|a| (a.kind, a.channel)),
        Some((ActuatorKind::Cylinder, 4))
    );
}
