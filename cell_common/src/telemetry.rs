//! Telemetry wire types.
//!
//! One JSON object per frame, consumed by transports as-is:
//!
//! ```json
//! {"t":120,"step":"Pick","m":{"X":42.5,"Clamp":1.0},"e":[{"type":"MaterialSpawn","payload":{"station":"In","id":"MAT-0001-3fa2","class":"Blank"}}]}
//! ```
//!
//! | Field  | Type                 | Presence                        |
//! |--------|----------------------|---------------------------------|
//! | `t`    | integer ms           | always, strictly increasing     |
//! | `step` | string               | always                          |
//! | `m`    | map id → number      | when some device value changed  |
//! | `mat`  | map station → {id,class} | when the material table changed |
//! | `e`    | ordered event list   | when domain events were queued  |

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Material held at a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialInfo {
    /// Unique material id.
    pub id: String,
    /// Material class (part type / processing stage).
    pub class: String,
}

impl MaterialInfo {
    /// Create a material record.
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
        }
    }
}

/// Domain event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run started.
    FlowStarted,
    /// A run ended.
    FlowStopped,
    /// A fault was raised.
    Error,
    /// Material appeared at a station.
    MaterialSpawn,
    /// Material changed class.
    MaterialTransform,
    /// Material left the cell.
    MaterialConsume,
    /// Material moved onto a holder (gripper, nest).
    Attach,
    /// Material moved off a holder.
    Detach,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// The flow ran to completion.
    Complete,
    /// The flow terminated with a fault.
    Error,
    /// The operator stopped the flow.
    UserStop,
}

/// A discrete event pushed outside the motion-sampling path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl FlowEvent {
    /// Create a bare event.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            msg: None,
            payload: None,
        }
    }

    /// Attach a message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// `FlowStarted{scenario, tickBase, schemaVersion}`.
    pub fn flow_started(scenario: &str, tick_base: u64, schema_version: u32) -> Self {
        Self::new(EventKind::FlowStarted).with_payload(json!({
            "scenario": scenario,
            "tickBase": tick_base,
            "schemaVersion": schema_version,
        }))
    }

    /// `FlowStopped{reason}`.
    pub fn flow_stopped(reason: StopReason) -> Self {
        Self::new(EventKind::FlowStopped).with_payload(json!({ "reason": reason }))
    }

    /// `Error{code?, source?}` with a message.
    pub fn error(code: Option<&str>, source: Option<&str>, msg: impl Into<String>) -> Self {
        let mut payload = serde_json::Map::new();
        if let Some(code) = code {
            payload.insert("code".to_string(), Value::from(code));
        }
        if let Some(source) = source {
            payload.insert("source".to_string(), Value::from(source));
        }
        Self::new(EventKind::Error)
            .with_msg(msg)
            .with_payload(Value::Object(payload))
    }

    /// Material appeared at `station`.
    pub fn material_spawn(station: &str, material: &MaterialInfo) -> Self {
        Self::new(EventKind::MaterialSpawn).with_payload(json!({
            "station": station,
            "id": material.id,
            "class": material.class,
        }))
    }

    /// Material at `station` changed from `from_class` to its current class.
    pub fn material_transform(station: &str, from_class: &str, material: &MaterialInfo) -> Self {
        Self::new(EventKind::MaterialTransform).with_payload(json!({
            "station": station,
            "id": material.id,
            "from": from_class,
            "class": material.class,
        }))
    }

    /// Material at `station` was consumed.
    pub fn material_consume(station: &str, material: &MaterialInfo) -> Self {
        Self::new(EventKind::MaterialConsume).with_payload(json!({
            "station": station,
            "id": material.id,
            "class": material.class,
        }))
    }

    /// Material moved from `source` onto `holder`.
    pub fn attach(holder: &str, source: &str, material: &MaterialInfo) -> Self {
        Self::new(EventKind::Attach).with_payload(json!({
            "holder": holder,
            "from": source,
            "id": material.id,
            "class": material.class,
        }))
    }

    /// Material moved from `holder` to `target`.
    pub fn detach(holder: &str, target: &str, material: &MaterialInfo) -> Self {
        Self::new(EventKind::Detach).with_payload(json!({
            "holder": holder,
            "to": target,
            "id": material.id,
            "class": material.class,
        }))
    }
}

/// One sampled telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TelemetryFrame {
    /// Monotonic tick in milliseconds since the sampler started.
    pub t: u64,
    /// Current business step name.
    pub step: String,
    /// Device values (delta or full snapshot).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<BTreeMap<String, f64>>,
    /// Full material table snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mat: Option<BTreeMap<String, MaterialInfo>>,
    /// Queued domain events in enqueue order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<Vec<FlowEvent>>,
}

impl TelemetryFrame {
    /// Events carried by this frame (empty slice if none).
    pub fn events(&self) -> &[FlowEvent] {
        self.e.as_deref().unwrap_or(&[])
    }

    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
