//! Simulated cylinder and vacuum effector.
//!
//! A stroke interpolates `position` linearly between 0.0 and 1.0 over the
//! configured action time, scaled by the distance still to travel. The
//! commanded state is recorded at once; the boolean state flips only when
//! the stroke completes. A zero action time switches synchronously inside
//! `fire()`.

use crate::device::{ActuatorDevice, ActuatorState, DeviceError};
use cell_common::topology::{ActuatorConfig, ActuatorKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Software-emulated binary actuator.
pub struct SimActuator {
    config: ActuatorConfig,
    tick: Duration,
    state: Arc<watch::Sender<ActuatorState>>,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimActuator {
    /// Create a retracted / off actuator.
    pub fn new(config: ActuatorConfig, tick: Duration) -> Self {
        let (tx, _rx) = watch::channel(ActuatorState::default());
        Self {
            config,
            tick,
            state: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Topology record this actuator was created from.
    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }
}

impl ActuatorDevice for SimActuator {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ActuatorKind {
        self.config.kind
    }

    fn fire(&self, on: bool) -> Result<(), DeviceError> {
        let target = if on { 1.0 } else { 0.0 };

        let mut task = self.task.lock();
        let start = self.state.borrow().position;
        let stroke = self.config.action_time().mul_f64((target - start).abs());

        if stroke.is_zero() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            if let Some(previous) = task.take() {
                previous.abort();
            }
            self.state.send_replace(ActuatorState {
                is_on: on,
                commanded: on,
                is_changing: false,
                position: target,
            });
            debug!("Actuator {} -> {} (instant)", self.config.id, on);
            return Ok(());
        }

        let runtime =
            Handle::try_current().map_err(|_| DeviceError::NoRuntime(self.config.id.clone()))?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.state.send_modify(|s| {
            s.commanded = on;
            s.is_changing = true;
        });
        debug!("Actuator {} -> {} over {:?}", self.config.id, on, stroke);

        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let tick = self.tick;
        let id = self.config.id.clone();

        *task = Some(runtime.spawn(async move {
            let began = Instant::now();
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;

                let fraction = (began.elapsed().as_secs_f64() / stroke.as_secs_f64()).min(1.0);
                let mut done = false;
                let live = state.send_if_modified(|s| {
                    if current.load(Ordering::Acquire) != generation {
                        return false;
                    }
                    if fraction >= 1.0 {
                        s.position = target;
                        s.is_on = on;
                        s.is_changing = false;
                        done = true;
                    } else {
                        s.position = start + (target - start) * fraction;
                    }
                    true
                });

                if !live || done {
                    trace!("Actuator {} stroke finished (settled={})", id, done);
                    break;
                }
            }
        }));

        Ok(())
    }

    fn stop(&self) {
        let mut task = self.task.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        self.state.send_if_modified(|s| {
            let was_changing = s.is_changing;
            s.is_changing = false;
            was_changing
        });
    }

    fn state(&self) -> ActuatorState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ActuatorState> {
        self.state.subscribe()
    }
}

impl Drop for SimActuator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cylinder(ms: u64) -> SimActuator {
        SimActuator::new(
            ActuatorConfig::new("Clamp", ActuatorKind::Cylinder, ms),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_zero_action_time_switches_synchronously() {
        let cyl = cylinder(0);
        cyl.fire(true).expect("fire");
        let state = cyl.state();
        assert!(state.is_on);
        assert!(!state.is_changing);
        assert_eq!(state.position, 1.0);
    }

    #[test]
    fn test_fire_to_current_state_needs_no_runtime() {
        let cyl = cylinder(200);
        cyl.fire(false).expect("already retracted");
        assert!(cyl.state().is_settled_at(false));
    }

    #[test]
    fn test_stroke_without_runtime() {
        let cyl = cylinder(200);
        assert!(matches!(cyl.fire(true), Err(DeviceError::NoRuntime(_))));
        assert!(!cyl.state().is_changing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_retract_is_not_settled() {
        let cyl = cylinder(200);
        let mut rx = cyl.subscribe();
        cyl.fire(true).expect("extend");
        rx.wait_for(|s| s.is_settled_at(true)).await.expect("alive");

        cyl.fire(false).expect("retract");
        tokio::time::sleep(Duration::from_millis(100)).await;
        cyl.stop();

        let state = cyl.state();
        assert!(!state.is_changing);
        assert!(!state.commanded);
        assert!(state.position > 0.0 && state.position < 1.0);
        assert!(!state.is_settled_at(true));
        assert!(!state.is_settled_at(false));

        // Completing the retract settles it
        cyl.fire(false).expect("retract");
        rx.wait_for(|s| s.is_settled_at(false)).await.expect("alive");
        assert_eq!(cyl.state().position, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stroke_in_progress() {
        let cyl = cylinder(200);
        cyl.fire(true).expect("fire");
        let state = cyl.state();
        assert!(state.is_changing);
        assert!(!state.is_on);

        tokio::time::sleep(Duration::from_millis(105)).await;
        let state = cyl.state();
        assert!(state.is_changing);
        assert!(state.position > 0.3 && state.position < 0.7);
    }
}
