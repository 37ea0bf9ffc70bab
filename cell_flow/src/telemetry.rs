//! Telemetry sampler.
//!
//! Turns live device state, the step-trace stream and queued domain events
//! into a differential [`TelemetryFrame`] stream:
//!
//! - axes report their position, actuators their settled state as 0/1
//! - a device value is sent only when it moved more than `epsilon` from the
//!   last value sent for that id
//! - the material table is sent whole whenever it changed
//! - queued events are flushed in enqueue order
//! - frames with nothing new are suppressed, except for a forced snapshot
//!   which carries every device value once

use crate::context::ExecutionContext;
use crate::interpreter::{StepTrace, TraceStatus};
use cell_common::consts::{DEFAULT_SAMPLE_INTERVAL_MS, DEFAULT_TELEMETRY_EPSILON, SYSTEM_DEVICE};
use cell_common::telemetry::TelemetryFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Step names that never surface as the current business step.
const INTERNAL_STEP_NAMES: [&str; 6] = [
    SYSTEM_DEVICE,
    "Sequence",
    "Map",
    "Scope",
    "Parallel",
    "Loop",
];

/// True for bookkeeping step names hidden from telemetry.
pub fn is_internal_step(name: &str) -> bool {
    name.is_empty() || name.starts_with('_') || INTERNAL_STEP_NAMES.contains(&name)
}

/// Sampler settings.
///
/// # TOML Example
///
/// ```toml
/// [telemetry]
/// interval_ms = 50
/// epsilon = 0.001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling period in milliseconds.
    pub interval_ms: u64,
    /// Smallest change reported as a delta.
    pub epsilon: f64,
}

impl SamplerConfig {
    /// Sampling period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            epsilon: DEFAULT_TELEMETRY_EPSILON,
        }
    }
}

/// Millisecond clock issuing strictly increasing frame ticks.
///
/// Shared by every sampler of a session so ticks keep increasing across runs.
#[derive(Debug)]
pub struct FrameClock {
    origin: Instant,
    last: AtomicU64,
}

impl FrameClock {
    /// Clock starting now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Milliseconds since the clock started.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Next tick: the elapsed milliseconds, bumped past the previous tick.
    pub fn next_tick(&self) -> u64 {
        let now = self.now_ms();
        let mut previous = self.last.load(Ordering::Acquire);
        loop {
            let tick = if now > previous { now } else { previous + 1 };
            match self
                .last
                .compare_exchange(previous, tick, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return tick,
                Err(actual) => previous = actual,
            }
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples one execution context into telemetry frames.
pub struct TelemetrySampler {
    ctx: Arc<ExecutionContext>,
    traces: broadcast::Receiver<StepTrace>,
    config: SamplerConfig,
    clock: Arc<FrameClock>,
    last_sent: HashMap<String, f64>,
    current_step: String,
    sent_step: Option<String>,
    material_revision: Option<u64>,
    force_snapshot: bool,
}

impl TelemetrySampler {
    /// Sampler over `ctx`, following the current step on `traces`.
    pub fn new(
        ctx: Arc<ExecutionContext>,
        traces: broadcast::Receiver<StepTrace>,
        config: SamplerConfig,
    ) -> Self {
        Self::with_clock(ctx, traces, config, Arc::new(FrameClock::new()))
    }

    /// Sampler sharing an existing frame clock.
    pub fn with_clock(
        ctx: Arc<ExecutionContext>,
        traces: broadcast::Receiver<StepTrace>,
        config: SamplerConfig,
        clock: Arc<FrameClock>,
    ) -> Self {
        Self {
            ctx,
            traces,
            config,
            clock,
            last_sent: HashMap::new(),
            current_step: String::new(),
            sent_step: None,
            material_revision: None,
            force_snapshot: false,
        }
    }

    /// Emit every device value with the next frame.
    pub fn force_snapshot(&mut self) {
        self.force_snapshot = true;
    }

    /// Current business step name.
    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    fn follow_traces(&mut self) {
        loop {
            match self.traces.try_recv() {
                Ok(entry) => {
                    if entry.status == TraceStatus::Running && !is_internal_step(&entry.name) {
                        self.current_step = entry.name;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Telemetry skipped {} step traces", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn device_values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        for axis in self.ctx.axis_handles() {
            values.insert(axis.id().to_string(), axis.state().position);
        }
        for actuator in self.ctx.actuator_handles() {
            let settled = if actuator.state().is_settled_at(true) { 1.0 } else { 0.0 };
            values.insert(actuator.id().to_string(), settled);
        }
        values
    }

    /// Build the next frame, or `None` when nothing changed.
    pub fn sample(&mut self) -> Option<TelemetryFrame> {
        self.follow_traces();
        let forced = std::mem::take(&mut self.force_snapshot);

        let mut motions = BTreeMap::new();
        for (id, value) in self.device_values() {
            let changed = match self.last_sent.get(&id) {
                Some(last) => (value - last).abs() > self.config.epsilon,
                None => true,
            };
            if forced || changed {
                self.last_sent.insert(id.clone(), value);
                motions.insert(id, value);
            }
        }

        let revision = self.ctx.materials_revision();
        let materials = if forced || self.material_revision != Some(revision) {
            self.material_revision = Some(revision);
            Some(self.ctx.materials_snapshot())
        } else {
            None
        };

        let events = self.ctx.drain_events();
        let step_changed = self.sent_step.as_deref() != Some(self.current_step.as_str());

        let has_content =
            !motions.is_empty() || materials.is_some() || !events.is_empty() || step_changed;
        if !forced && !has_content {
            return None;
        }

        self.sent_step = Some(self.current_step.clone());
        let frame = TelemetryFrame {
            t: self.clock.next_tick(),
            step: self.current_step.clone(),
            m: (!motions.is_empty()).then_some(motions),
            mat: materials,
            e: (!events.is_empty()).then_some(events),
        };
        trace!("Frame t={} step='{}'", frame.t, frame.step);
        Some(frame)
    }

    /// Sample on every interval until `shutdown`, then flush once more.
    pub async fn run(mut self, tx: broadcast::Sender<TelemetryFrame>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.publish(&tx),
            }
        }

        // Final flush picks up FlowStopped and late events
        self.publish(&tx);
        debug!("Telemetry sampler stopped");
    }

    fn publish(&mut self, tx: &broadcast::Sender<TelemetryFrame>) {
        if let Some(frame) = self.sample() {
            if tx.send(frame).is_err() {
                trace!("Telemetry frame dropped: no subscribers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_step_names() {
        for name in ["", "System", "Sequence", "Map", "Scope", "Parallel", "Loop", "_hidden"] {
            assert!(is_internal_step(name), "{name}");
        }
        assert!(!is_internal_step("Pick part"));
        assert!(!is_internal_step("X.MoveToAndWait"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_is_strictly_increasing() {
        let clock = FrameClock::new();
        let a = clock.next_tick();
        let b = clock.next_tick();
        assert!(b > a);

        tokio::time::advance(Duration::from_millis(40)).await;
        let c = clock.next_tick();
        assert!(c >= 40 && c > b);
    }
}
