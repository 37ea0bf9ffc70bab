//! Run session and control channel.
//!
//! A [`FlowSession`] owns the topology, the device driver and the outbound
//! frame stream. Each `Start` builds a fresh [`ExecutionContext`] and flow,
//! runs it on its own task next to a [`TelemetrySampler`], and reports the
//! run's lifecycle as `FlowStarted` / `Error` / `FlowStopped` events.
//!
//! ```text
//!  ControlCommand ──► FlowSession ──spawn──► run task ──► Interpreter
//!                         │                     │            │ traces
//!                         │                     ▼            ▼
//!                         └──── frames ◄── TelemetrySampler ◄┘
//! ```

use crate::context::ExecutionContext;
use crate::error::Fault;
use crate::handlers::HandlerTable;
use crate::interpreter::{EscalationHandler, Interpreter, LogEscalation};
use crate::scenario::ScenarioCatalog;
use crate::telemetry::{FrameClock, SamplerConfig, TelemetrySampler};
use cell_common::consts::{FRAME_CHANNEL_CAPACITY, TELEMETRY_SCHEMA_VERSION};
use cell_common::telemetry::{FlowEvent, StopReason, TelemetryFrame};
use cell_common::topology::MachineTopology;
use cell_hal::DeviceDriver;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command accepted on the control channel.
///
/// JSON form: `{"cmd":"Start","scenario":"pick_and_place"}`, `{"cmd":"Stop"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ControlCommand {
    /// Start a scenario, cancelling any run in progress.
    Start {
        /// Scenario name.
        scenario: String,
    },
    /// Cancel the run in progress.
    Stop,
}

/// Per-run settings applied to every context the session creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Telemetry sampler settings.
    pub sampler: SamplerConfig,
    /// Default safety bound of wait operations.
    pub wait_timeout: Duration,
    /// Polling period of `MoveUntil`.
    pub sample_tick: Duration,
    /// Seed of the material-id generator.
    pub seed: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            wait_timeout: cell_common::prelude::DEFAULT_WAIT_TIMEOUT,
            sample_tick: cell_common::prelude::DEFAULT_SIM_TICK,
            seed: 0,
        }
    }
}

struct ActiveRun {
    scenario: String,
    ctx: Arc<ExecutionContext>,
    finished: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns runs and the telemetry stream of one machine.
pub struct FlowSession {
    topology: Arc<MachineTopology>,
    driver: Arc<dyn DeviceDriver>,
    catalog: ScenarioCatalog,
    settings: SessionSettings,
    handlers: HandlerTable,
    escalation: Arc<dyn EscalationHandler>,
    clock: Arc<FrameClock>,
    frames: broadcast::Sender<TelemetryFrame>,
    active: Mutex<Option<ActiveRun>>,
}

impl FlowSession {
    /// Session over `topology` using `driver`, with the built-in scenarios.
    pub fn new(topology: Arc<MachineTopology>, driver: Arc<dyn DeviceDriver>) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            topology,
            driver,
            catalog: ScenarioCatalog::with_builtin(),
            settings: SessionSettings::default(),
            handlers: HandlerTable::with_defaults(),
            escalation: Arc::new(LogEscalation),
            clock: Arc::new(FrameClock::new()),
            frames,
            active: Mutex::new(None),
        }
    }

    /// Replace the scenario catalog.
    pub fn with_catalog(mut self, catalog: ScenarioCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the run settings.
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the handler table used by every run.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Install an escalation hook for `Skip` / `AskUser` steps.
    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = escalation;
        self
    }

    /// Subscribe to the outbound frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryFrame> {
        self.frames.subscribe()
    }

    /// Scenario catalog.
    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// Scenario of the run in progress.
    pub fn running_scenario(&self) -> Option<String> {
        self.active
            .lock()
            .as_ref()
            .filter(|run| !run.finished.is_cancelled())
            .map(|run| run.scenario.clone())
    }

    /// Apply a control command.
    pub async fn handle(&self, command: ControlCommand) -> Result<(), Fault> {
        match command {
            ControlCommand::Start { scenario } => self.start(&scenario).await,
            ControlCommand::Stop => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Start `scenario`, cancelling the run in progress first.
    ///
    /// # Errors
    /// Unknown or unbuildable scenarios. The fault is also published as an
    /// `Error` event.
    pub async fn start(&self, scenario: &str) -> Result<(), Fault> {
        self.stop().await;

        let flow = match self.catalog.build(scenario, &self.topology) {
            Ok(flow) => flow,
            Err(fault) => {
                error!("Cannot start '{}': {}", scenario, fault);
                self.publish_fault(&fault);
                return Err(fault);
            }
        };

        let settings = self.settings;
        let ctx = Arc::new(
            ExecutionContext::new(Arc::clone(&self.topology), Arc::clone(&self.driver))
                .with_seed(settings.seed)
                .with_wait_timeout(settings.wait_timeout)
                .with_sample_tick(settings.sample_tick),
        );
        if let Err(fault) = ctx.materialize_all() {
            error!("Cannot materialize devices for '{}': {}", scenario, fault);
            self.publish_fault(&fault);
            return Err(fault);
        }

        let interpreter = Interpreter::new()
            .with_handlers(self.handlers.clone())
            .with_escalation(Arc::clone(&self.escalation));
        let mut sampler = TelemetrySampler::with_clock(
            Arc::clone(&ctx),
            interpreter.subscribe(),
            settings.sampler,
            Arc::clone(&self.clock),
        );
        sampler.force_snapshot();
        ctx.push_event(FlowEvent::flow_started(
            scenario,
            self.clock.now_ms(),
            TELEMETRY_SCHEMA_VERSION,
        ));

        let finished = CancellationToken::new();
        let task = tokio::spawn(drive(
            scenario.to_string(),
            flow,
            Arc::clone(&ctx),
            interpreter,
            sampler,
            self.frames.clone(),
            finished.clone(),
        ));

        info!("Started scenario '{}'", scenario);
        *self.active.lock() = Some(ActiveRun {
            scenario: scenario.to_string(),
            ctx,
            finished,
            task,
        });
        Ok(())
    }

    /// Cancel the run in progress and wait until it has reported `FlowStopped`.
    ///
    /// Returns `true` if a run was in progress.
    pub async fn stop(&self) -> bool {
        let Some(run) = self.active.lock().take() else {
            return false;
        };
        let was_running = !run.finished.is_cancelled();
        if was_running {
            info!("Stopping scenario '{}'", run.scenario);
        }
        run.ctx.cancel();
        if let Err(e) = run.task.await {
            warn!("Run task for '{}' ended abnormally: {}", run.scenario, e);
        }
        was_running
    }

    /// Wait until the run in progress (if any) has finished on its own.
    pub async fn wait_idle(&self) {
        let finished = self.active.lock().as_ref().map(|run| run.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    fn publish_fault(&self, fault: &Fault) {
        let frame = TelemetryFrame {
            t: self.clock.next_tick(),
            step: String::new(),
            e: Some(vec![FlowEvent::error(
                Some(fault.code()),
                fault.source(),
                fault.to_string(),
            )]),
            ..Default::default()
        };
        let _ = self.frames.send(frame);
    }
}

/// Body of a run task: interpret the flow, then report how it ended.
///
/// A panicking handler ends the run with a `PANICKED` fault.
async fn drive(
    scenario: String,
    flow: crate::step::Step,
    ctx: Arc<ExecutionContext>,
    interpreter: Interpreter,
    sampler: TelemetrySampler,
    frames: broadcast::Sender<TelemetryFrame>,
    finished: CancellationToken,
) {
    let sampler_stop = CancellationToken::new();
    let sampler_task = tokio::spawn(sampler.run(frames, sampler_stop.clone()));

    let result = AssertUnwindSafe(interpreter.run(&flow, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(Fault::from_panic(&*payload)));
    ctx.stop_all();

    let reason = match &result {
        Ok(_) => StopReason::Complete,
        Err(fault) if fault.is_cancellation() => StopReason::UserStop,
        Err(fault) => {
            ctx.push_event(FlowEvent::error(
                Some(fault.code()),
                fault.source(),
                fault.to_string(),
            ));
            StopReason::Error
        }
    };
    info!("Scenario '{}' stopped: {:?}", scenario, reason);
    ctx.push_event(FlowEvent::flow_stopped(reason));

    sampler_stop.cancel();
    if let Err(e) = sampler_task.await {
        warn!("Telemetry sampler for '{}' ended abnormally: {}", scenario, e);
    }
    finished.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_command_json() {
        let start: ControlCommand =
            serde_json::from_str(r#"{"cmd":"Start","scenario":"home_all"}"#).unwrap();
        assert_eq!(
            start,
            ControlCommand::Start {
                scenario: "home_all".to_string()
            }
        );

        let stop: ControlCommand = serde_json::from_str(r#"{"cmd":"Stop"}"#).unwrap();
        assert_eq!(stop, ControlCommand::Stop);
        assert_eq!(serde_json::to_string(&stop).unwrap(), r#"{"cmd":"Stop"}"#);
    }
}
