//! Simulated positioning axis.
//!
//! Each command spawns a motion task that advances the position by
//! `speed * tick` per tick until it lands exactly on the (clamped) target.
//! A new command or `stop()` bumps the motion generation; a task that sees a
//! stale generation never writes again.

use super::process::ProcessModel;
use crate::device::{AxisDevice, AxisState, DeviceError};
use cell_common::topology::AxisConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Software-emulated axis with linear, constant-speed motion.
pub struct SimAxis {
    config: AxisConfig,
    tick: Duration,
    state: Arc<watch::Sender<AxisState>>,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
    process: Option<Box<dyn ProcessModel>>,
}

impl SimAxis {
    /// Create an idle, unhomed axis parked at its home position.
    pub fn new(config: AxisConfig, tick: Duration) -> Self {
        let home = config.home_position();
        let (tx, _rx) = watch::channel(AxisState {
            position: home,
            command_pos: home,
            is_moving: false,
            is_homed: false,
            max_speed: config.max_speed,
            min: config.min,
            max: config.max,
        });

        Self {
            config,
            tick,
            state: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
            process: None,
        }
    }

    /// Attach a process-variable model sampled by `process_value()`.
    pub fn with_process_model(mut self, model: impl ProcessModel + 'static) -> Self {
        self.process = Some(Box::new(model));
        self
    }

    fn command(&self, target: f64, speed: Option<f64>, homing: bool) -> Result<f64, DeviceError> {
        let runtime =
            Handle::try_current().map_err(|_| DeviceError::NoRuntime(self.config.id.clone()))?;

        let target = self.config.clamp(target);
        let max_speed = self.config.max_speed;
        let speed = speed
            .filter(|s| s.is_finite() && *s > 0.0)
            .map_or(max_speed, |s| s.min(max_speed));

        // Serialize commands on this axis
        let mut task = self.task.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let mut settled = false;
        self.state.send_modify(|s| {
            s.command_pos = target;
            if homing {
                s.is_homed = false;
            }
            if s.position == target {
                s.is_moving = false;
                s.is_homed |= homing;
                settled = true;
            } else {
                s.is_moving = true;
            }
        });

        debug!(
            "Axis {} -> {:.3} @ {:.1}/s{}",
            self.config.id,
            target,
            speed,
            if homing { " (home)" } else { "" }
        );

        if settled {
            return Ok(target);
        }

        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let tick = self.tick;
        let id = self.config.id.clone();
        let step = speed * tick.as_secs_f64();

        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                let mut done = false;
                let live = state.send_if_modified(|s| {
                    if current.load(Ordering::Acquire) != generation {
                        return false;
                    }
                    let remaining = target - s.position;
                    if remaining.abs() <= step {
                        s.position = target;
                        s.is_moving = false;
                        s.is_homed |= homing;
                        done = true;
                    } else {
                        s.position += step.copysign(remaining);
                    }
                    true
                });

                if !live {
                    trace!("Axis {} motion superseded", id);
                    break;
                }
                if done {
                    trace!("Axis {} in position {:.3}", id, target);
                    break;
                }
            }
        }));

        Ok(target)
    }
}

impl AxisDevice for SimAxis {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn config(&self) -> &AxisConfig {
        &self.config
    }

    fn move_to(&self, target: f64, speed: Option<f64>) -> Result<f64, DeviceError> {
        if !target.is_finite() {
            return Err(DeviceError::CommandRejected {
                id: self.config.id.clone(),
                reason: format!("target {target} is not a finite position"),
            });
        }
        self.command(target, speed, false)
    }

    fn home(&self) -> Result<f64, DeviceError> {
        self.command(self.config.home_position(), None, true)
    }

    fn stop(&self) {
        let mut task = self.task.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.state.send_if_modified(|s| {
            let was_moving = s.is_moving;
            s.is_moving = false;
            was_moving
        });
    }

    fn state(&self) -> AxisState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<AxisState> {
        self.state.subscribe()
    }

    fn process_value(&self) -> Option<f64> {
        let position = self.state.borrow().position;
        self.process.as_ref().map(|model| model.sample(position))
    }
}

impl Drop for SimAxis {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
