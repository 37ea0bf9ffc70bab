//! Per-run execution context.
//!
//! Holds everything a flow touches while it runs:
//! - the read-only machine topology
//! - typed device registries (axes, actuators), materialized lazily
//! - scratch variables and the material table
//! - the outbound domain-event queue drained by the telemetry sampler
//! - the run's cancellation token and seeded random source
//!
//! A context is created per run and dropped when the run ends.

use crate::error::Fault;
use crate::value::StepValue;
use cell_common::prelude::{
    DEFAULT_SIM_TICK, DEFAULT_WAIT_TIMEOUT, DeviceKind, FlowEvent, MachineTopology, MaterialInfo,
};
use cell_hal::{ActuatorDevice, AxisDevice, DeviceDriver, DeviceError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Shared state of one flow run.
pub struct ExecutionContext {
    topology: Arc<MachineTopology>,
    driver: Arc<dyn DeviceDriver>,
    axes: RwLock<BTreeMap<String, Arc<dyn AxisDevice>>>,
    actuators: RwLock<BTreeMap<String, Arc<dyn ActuatorDevice>>>,
    variables: DashMap<String, StepValue>,
    materials: DashMap<String, MaterialInfo>,
    material_revision: AtomicU64,
    events: Mutex<Vec<FlowEvent>>,
    cancel: CancellationToken,
    rng: Mutex<StdRng>,
    wait_timeout: Duration,
    sample_tick: Duration,
}

impl ExecutionContext {
    /// Create a context over `topology`, materializing devices through `driver`.
    pub fn new(topology: Arc<MachineTopology>, driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            topology,
            driver,
            axes: RwLock::new(BTreeMap::new()),
            actuators: RwLock::new(BTreeMap::new()),
            variables: DashMap::new(),
            materials: DashMap::new(),
            material_revision: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            sample_tick: DEFAULT_SIM_TICK,
        }
    }

    /// Seed the material-id generator.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Default safety bound for wait operations without their own timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Polling period of `MoveUntil`.
    pub fn with_sample_tick(mut self, tick: Duration) -> Self {
        self.sample_tick = tick;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    // ─── Topology & devices ─────────────────────────────────────────

    /// Machine topology.
    pub fn topology(&self) -> &MachineTopology {
        &self.topology
    }

    /// Kind of a declared or pre-registered device.
    pub fn kind_of(&self, id: &str) -> Option<DeviceKind> {
        if let Some(kind) = self.topology.kind_of(id) {
            return Some(kind);
        }
        if self.axes.read().contains_key(id) {
            return Some(DeviceKind::Axis);
        }
        self.actuators.read().get(id).map(|a| a.kind().into())
    }

    /// Register an axis handle ahead of use. Replaces a handle with the same id.
    pub fn register_axis(&self, axis: Arc<dyn AxisDevice>) {
        self.axes.write().insert(axis.id().to_string(), axis);
    }

    /// Register an actuator handle ahead of use. Replaces a handle with the same id.
    pub fn register_actuator(&self, actuator: Arc<dyn ActuatorDevice>) {
        self.actuators
            .write()
            .insert(actuator.id().to_string(), actuator);
    }

    /// Axis handle, materialized from the topology on first use.
    pub fn axis(&self, id: &str) -> Result<Arc<dyn AxisDevice>, Fault> {
        if let Some(axis) = self.axes.read().get(id) {
            return Ok(Arc::clone(axis));
        }

        let Some(config) = self.topology.axis(id) else {
            return Err(self.missing(id, "an axis"));
        };

        let mut axes = self.axes.write();
        if let Some(axis) = axes.get(id) {
            return Ok(Arc::clone(axis));
        }
        let axis = self.driver.create_axis(config)?;
        debug!("Materialized axis {} via {}", id, self.driver.name());
        axes.insert(id.to_string(), Arc::clone(&axis));
        Ok(axis)
    }

    /// Actuator handle, materialized from the topology on first use.
    pub fn actuator(&self, id: &str) -> Result<Arc<dyn ActuatorDevice>, Fault> {
        if let Some(actuator) = self.actuators.read().get(id) {
            return Ok(Arc::clone(actuator));
        }

        let Some(config) = self.topology.actuator(id) else {
            return Err(self.missing(id, "an actuator"));
        };

        let mut actuators = self.actuators.write();
        if let Some(actuator) = actuators.get(id) {
            return Ok(Arc::clone(actuator));
        }
        let actuator = self.driver.create_actuator(config)?;
        debug!(
            "Materialized {} {} via {}",
            DeviceKind::from(config.kind),
            id,
            self.driver.name()
        );
        actuators.insert(id.to_string(), Arc::clone(&actuator));
        Ok(actuator)
    }

    fn missing(&self, id: &str, expected: &'static str) -> Fault {
        match self.kind_of(id) {
            Some(_) => Fault::Device(DeviceError::WrongKind {
                id: id.to_string(),
                expected,
            }),
            None => Fault::DeviceNotFound(id.to_string()),
        }
    }

    /// Materialize every declared device up front.
    pub fn materialize_all(&self) -> Result<(), Fault> {
        for axis in &self.topology.axes {
            self.axis(&axis.id)?;
        }
        for actuator in &self.topology.actuators {
            self.actuator(&actuator.id)?;
        }
        Ok(())
    }

    /// Snapshot of the registered axes, ordered by id.
    pub fn axis_handles(&self) -> Vec<Arc<dyn AxisDevice>> {
        self.axes.read().values().cloned().collect()
    }

    /// Snapshot of the registered actuators, ordered by id.
    pub fn actuator_handles(&self) -> Vec<Arc<dyn ActuatorDevice>> {
        self.actuators.read().values().cloned().collect()
    }

    /// Stop every registered device.
    pub fn stop_all(&self) {
        for axis in self.axis_handles() {
            axis.stop();
        }
        for actuator in self.actuator_handles() {
            actuator.stop();
        }
    }

    // ─── Variables ──────────────────────────────────────────────────

    /// Store a scratch variable.
    pub fn set_variable(&self, name: &str, value: StepValue) {
        self.variables.insert(name.to_string(), value);
    }

    /// Read a scratch variable.
    pub fn variable(&self, name: &str) -> Option<StepValue> {
        self.variables.get(name).map(|v| v.value().clone())
    }

    // ─── Materials ──────────────────────────────────────────────────

    /// Synthesize a material id from the seeded random source.
    pub fn next_material_id(&self, class: &str) -> String {
        let suffix: u32 = self.rng.lock().gen_range(0..0x100_0000);
        format!("{class}-{suffix:06x}")
    }

    /// Material at `station`.
    pub fn material(&self, station: &str) -> Option<MaterialInfo> {
        self.materials.get(station).map(|m| m.value().clone())
    }

    /// Place `material` at `station`, returning what was there.
    pub fn put_material(&self, station: &str, material: MaterialInfo) -> Option<MaterialInfo> {
        let previous = self.materials.insert(station.to_string(), material);
        self.material_revision.fetch_add(1, Ordering::AcqRel);
        previous
    }

    /// Remove and return the material at `station`.
    pub fn take_material(&self, station: &str) -> Option<MaterialInfo> {
        let removed = self.materials.remove(station).map(|(_, m)| m);
        if removed.is_some() {
            self.material_revision.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Full material table, ordered by station.
    pub fn materials_snapshot(&self) -> BTreeMap<String, MaterialInfo> {
        self.materials
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Counter bumped on every material table change.
    pub fn materials_revision(&self) -> u64 {
        self.material_revision.load(Ordering::Acquire)
    }

    // ─── Events ─────────────────────────────────────────────────────

    /// Queue a domain event for the next telemetry frame.
    pub fn push_event(&self, event: FlowEvent) {
        self.events.lock().push(event);
    }

    /// Take every queued event in enqueue order.
    pub fn drain_events(&self) -> Vec<FlowEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    // ─── Cancellation & timing ──────────────────────────────────────

    /// Cancel the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Clone of the run's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Safety bound for wait operations without their own timeout.
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Polling period of `MoveUntil`.
    pub fn sample_tick(&self) -> Duration {
        self.sample_tick
    }
}
