//! Step model: the flow AST and its combinators.
//!
//! A flow is a tree of [`Step`] nodes built with plain constructor functions.
//! Building a step never touches hardware; data flows only through
//! [`sequence`] continuations, which are called with the result of the first
//! step once it has run.
//!
//! ```rust
//! use cell_flow::step::{self, move_to_and_wait};
//!
//! let flow = step::sequence(move_to_and_wait("A", 50.0), |_| move_to_and_wait("B", 90.0))
//!     .named("Two-axis demo")
//!     .with_retry(2);
//! assert_eq!(flow.policy.retry_count, 2);
//! ```

use crate::value::StepValue;
use cell_common::consts::SYSTEM_DEVICE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Builds the next step from the previous result.
pub type Continuation = Arc<dyn Fn(&StepValue) -> Step + Send + Sync>;

/// Combines the results of both halves of a sequence.
pub type Selector = Arc<dyn Fn(StepValue, StepValue) -> StepValue + Send + Sync>;

/// Pure post-processing of a result.
pub type Transform = Arc<dyn Fn(StepValue) -> StepValue + Send + Sync>;

/// Target position computed from the current axis position.
pub type PositionFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

// ─── Policy ─────────────────────────────────────────────────────────

/// What happens once a step's retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Propagate the fault.
    #[default]
    Terminate,
    /// Retry up to `retry_count` times, then propagate.
    Retry,
    /// Hand the fault to the escalation hook, which may skip the step.
    Skip,
    /// Hand the fault to the escalation hook, which may ask an operator.
    AskUser,
}

/// Per-step execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Policy {
    /// Additional attempts after the first failure.
    pub retry_count: u32,
    /// Safety bound for wait operations. `None` uses the context default.
    pub timeout: Option<Duration>,
    /// Behavior once retries are exhausted.
    pub error_handling: ErrorHandling,
}

// ─── Operations ─────────────────────────────────────────────────────

/// Closed set of action operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Command an axis and return immediately.
    MoveTo,
    /// Command an axis and wait until it stops.
    MoveToAndWait,
    /// Move until a process variable crosses a threshold.
    MoveUntil,
    /// Home an axis and wait.
    Home,
    /// Stop a device.
    Stop,
    /// Command a cylinder / vacuum and return immediately.
    Fire,
    /// Command a cylinder / vacuum and wait until settled.
    FireAndWait,
    /// Wait until a cylinder / vacuum is settled at a state.
    CylinderWaitFor,
    /// Read a variable (System) or a process value (axis).
    ReadAnalog,
    /// Echo an expected level.
    CheckLevel,
    /// Store a scratch variable.
    SetVariable,
    /// Sleep for a number of milliseconds.
    Delay,
    /// Fail with a message.
    Throw,
    /// Do nothing.
    NoOp,
    /// Create a material at a station.
    Spawn,
    /// Change the class of the material at a station.
    Transform,
    /// Remove the material at a station.
    Consume,
    /// Place a known material at a station without an event.
    Bind,
    /// Clear a station without an event.
    Unbind,
    /// Move a material from a station onto a holder.
    Attach,
    /// Move a material from a holder onto a station.
    Detach,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 21] = [
        Operation::MoveTo,
        Operation::MoveToAndWait,
        Operation::MoveUntil,
        Operation::Home,
        Operation::Stop,
        Operation::Fire,
        Operation::FireAndWait,
        Operation::CylinderWaitFor,
        Operation::ReadAnalog,
        Operation::CheckLevel,
        Operation::SetVariable,
        Operation::Delay,
        Operation::Throw,
        Operation::NoOp,
        Operation::Spawn,
        Operation::Transform,
        Operation::Consume,
        Operation::Bind,
        Operation::Unbind,
        Operation::Attach,
        Operation::Detach,
    ];

    /// PascalCase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::MoveTo => "MoveTo",
            Operation::MoveToAndWait => "MoveToAndWait",
            Operation::MoveUntil => "MoveUntil",
            Operation::Home => "Home",
            Operation::Stop => "Stop",
            Operation::Fire => "Fire",
            Operation::FireAndWait => "FireAndWait",
            Operation::CylinderWaitFor => "CylinderWaitFor",
            Operation::ReadAnalog => "ReadAnalog",
            Operation::CheckLevel => "CheckLevel",
            Operation::SetVariable => "SetVariable",
            Operation::Delay => "Delay",
            Operation::Throw => "Throw",
            Operation::NoOp => "NoOp",
            Operation::Spawn => "Spawn",
            Operation::Transform => "Transform",
            Operation::Consume => "Consume",
            Operation::Bind => "Bind",
            Operation::Unbind => "Unbind",
            Operation::Attach => "Attach",
            Operation::Detach => "Detach",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct ParseOperationError(pub String);

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ParseOperationError(s.to_string()))
    }
}

// ─── Arguments ──────────────────────────────────────────────────────

/// Action argument.
#[derive(Clone)]
pub enum Arg {
    /// Literal value.
    Value(StepValue),
    /// Target computed from the axis position when the action runs.
    Position(PositionFn),
}

impl Arg {
    /// Position function argument.
    pub fn position(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Arg::Position(Arc::new(f))
    }

    /// Literal value, if this is one.
    pub fn value(&self) -> Option<&StepValue> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Position(_) => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Position(_) => f.write_str("Position(<fn>)"),
        }
    }
}

impl From<StepValue> for Arg {
    fn from(value: StepValue) -> Self {
        Arg::Value(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Value(StepValue::Number(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Value(StepValue::Bool(value))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(StepValue::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Value(StepValue::Text(value))
    }
}

// ─── Step ───────────────────────────────────────────────────────────

/// A node of the flow tree. Immutable once built; clones share children.
#[derive(Clone)]
pub struct Step {
    /// Name surfaced in traces and telemetry.
    pub name: String,
    /// Retry / timeout / error policy.
    pub policy: Policy,
    /// Node variant.
    pub kind: StepKind,
}

/// Node variants.
#[derive(Clone)]
pub enum StepKind {
    /// Leaf instruction for one device or the `System` pseudo-device.
    Action {
        /// Device id or `System`.
        device: String,
        /// Operation to run.
        operation: Operation,
        /// Positional arguments.
        args: Vec<Arg>,
    },
    /// Run `first`, build the next step from its result, run it.
    Sequence {
        /// First step.
        first: Arc<Step>,
        /// Continuation over the first result.
        next: Continuation,
        /// Result combiner, defaults to the second result.
        select: Option<Selector>,
    },
    /// Post-process a result.
    Map {
        /// Producing step.
        source: Arc<Step>,
        /// Pure transform.
        transform: Transform,
    },
    /// Naming group without semantic effect.
    Scope {
        /// Wrapped step.
        inner: Arc<Step>,
    },
    /// Run all steps concurrently; all succeed or the node faults.
    Parallel {
        /// Branches.
        steps: Arc<[Step]>,
    },
    /// Repeat `inner` `count` times, forever when negative.
    Loop {
        /// Repeated step.
        inner: Arc<Step>,
        /// Iteration count.
        count: i64,
    },
}

impl StepKind {
    /// Short variant name.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Action { .. } => "Action",
            StepKind::Sequence { .. } => "Sequence",
            StepKind::Map { .. } => "Map",
            StepKind::Scope { .. } => "Scope",
            StepKind::Parallel { .. } => "Parallel",
            StepKind::Loop { .. } => "Loop",
        }
    }
}

impl Step {
    fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            policy: Policy::default(),
            kind,
        }
    }

    /// Device the step is addressed to; `System` for composite nodes.
    pub fn device(&self) -> &str {
        match &self.kind {
            StepKind::Action { device, .. } => device,
            _ => SYSTEM_DEVICE,
        }
    }

    /// Rename the step.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Retry a failed step up to `n` more times. Negative counts clamp to 0.
    pub fn with_retry(mut self, n: i64) -> Self {
        let n = n.clamp(0, i64::from(u32::MAX)) as u32;
        self.policy.retry_count = n;
        if n > 0 {
            self.policy.error_handling = ErrorHandling::Retry;
        }
        self
    }

    /// Bound the step's wait operations.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    /// Set the behavior once retries are exhausted.
    pub fn on_error(mut self, mode: ErrorHandling) -> Self {
        self.policy.error_handling = mode;
        self
    }

    /// Sequence `next` after `self`, ignoring the first result.
    pub fn then(self, next: Step) -> Step {
        sequence(self, move |_| next.clone())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.kind.label());
        out.field("name", &self.name).field("policy", &self.policy);
        match &self.kind {
            StepKind::Action {
                device,
                operation,
                args,
            } => out
                .field("device", device)
                .field("operation", operation)
                .field("args", args),
            StepKind::Sequence { first, .. } => out.field("first", first),
            StepKind::Map { source, .. } => out.field("source", source),
            StepKind::Scope { inner } => out.field("inner", inner),
            StepKind::Parallel { steps } => out.field("steps", steps),
            StepKind::Loop { inner, count } => out.field("inner", inner).field("count", count),
        };
        out.finish()
    }
}

// ─── Combinators ────────────────────────────────────────────────────

/// Leaf instruction. Named `<device>.<operation>` until renamed.
pub fn action(
    device: impl Into<String>,
    operation: Operation,
    args: impl IntoIterator<Item = Arg>,
) -> Step {
    let device = device.into();
    let name = format!("{device}.{operation}");
    Step::new(
        name,
        StepKind::Action {
            device,
            operation,
            args: args.into_iter().collect(),
        },
    )
}

/// Run `first`, then the step built from its result. Yields the second result.
pub fn sequence(
    first: Step,
    next: impl Fn(&StepValue) -> Step + Send + Sync + 'static,
) -> Step {
    Step::new(
        "Sequence",
        StepKind::Sequence {
            first: Arc::new(first),
            next: Arc::new(next),
            select: None,
        },
    )
}

/// Like [`sequence`], combining both results with `select`.
pub fn sequence_with(
    first: Step,
    next: impl Fn(&StepValue) -> Step + Send + Sync + 'static,
    select: impl Fn(StepValue, StepValue) -> StepValue + Send + Sync + 'static,
) -> Step {
    Step::new(
        "Sequence",
        StepKind::Sequence {
            first: Arc::new(first),
            next: Arc::new(next),
            select: Some(Arc::new(select)),
        },
    )
}

/// Post-process the result of `source`.
pub fn map(
    source: Step,
    transform: impl Fn(StepValue) -> StepValue + Send + Sync + 'static,
) -> Step {
    Step::new(
        "Map",
        StepKind::Map {
            source: Arc::new(source),
            transform: Arc::new(transform),
        },
    )
}

/// Run `steps` concurrently. Yields their results in order.
pub fn parallel(steps: impl IntoIterator<Item = Step>) -> Step {
    Step::new(
        "Parallel",
        StepKind::Parallel {
            steps: steps.into_iter().collect(),
        },
    )
}

/// Run `inner` `count` times (forever when negative). Yields the last result.
pub fn repeat(inner: Step, count: i64) -> Step {
    Step::new(
        "Loop",
        StepKind::Loop {
            inner: Arc::new(inner),
            count,
        },
    )
}

/// Group `inner` under a business name.
pub fn scope(name: impl Into<String>, inner: Step) -> Step {
    Step::new(
        name,
        StepKind::Scope {
            inner: Arc::new(inner),
        },
    )
}

/// Chain steps in order, ignoring intermediate results. Empty input is a `NoOp`.
pub fn chain(steps: impl IntoIterator<Item = Step>) -> Step {
    let mut steps: Vec<Step> = steps.into_iter().collect();
    let Some(last) = steps.pop() else {
        return no_op();
    };
    steps
        .into_iter()
        .rev()
        .fold(last, |next, step| step.then(next))
}

// ─── Action builders ────────────────────────────────────────────────

/// `MoveTo` an absolute position.
pub fn move_to(device: impl Into<String>, target: f64) -> Step {
    action(device, Operation::MoveTo, [Arg::from(target)])
}

/// `MoveTo` a position computed from the current one.
pub fn move_by(
    device: impl Into<String>,
    f: impl Fn(f64) -> f64 + Send + Sync + 'static,
) -> Step {
    action(device, Operation::MoveTo, [Arg::position(f)])
}

/// `MoveToAndWait` an absolute position.
pub fn move_to_and_wait(device: impl Into<String>, target: f64) -> Step {
    action(device, Operation::MoveToAndWait, [Arg::from(target)])
}

/// `MoveToAndWait` with a speed override.
pub fn move_to_and_wait_at(device: impl Into<String>, target: f64, speed: f64) -> Step {
    action(
        device,
        Operation::MoveToAndWait,
        [Arg::from(target), Arg::from(speed)],
    )
}

/// `MoveUntil` the axis' process value reaches `threshold`.
pub fn move_until(device: impl Into<String>, target: f64, threshold: f64) -> Step {
    action(
        device,
        Operation::MoveUntil,
        [Arg::from(target), Arg::from(threshold)],
    )
}

/// `Home` an axis.
pub fn home(device: impl Into<String>) -> Step {
    action(device, Operation::Home, [])
}

/// `Stop` a device.
pub fn stop(device: impl Into<String>) -> Step {
    action(device, Operation::Stop, [])
}

/// `Fire` a cylinder / vacuum.
pub fn fire(device: impl Into<String>, on: bool) -> Step {
    action(device, Operation::Fire, [Arg::from(on)])
}

/// `FireAndWait` a cylinder / vacuum.
pub fn fire_and_wait(device: impl Into<String>, on: bool) -> Step {
    action(device, Operation::FireAndWait, [Arg::from(on)])
}

/// `CylinderWaitFor` a settled state.
pub fn wait_for(device: impl Into<String>, on: bool) -> Step {
    action(device, Operation::CylinderWaitFor, [Arg::from(on)])
}

/// `ReadAnalog` a variable, with a fallback.
pub fn read_analog(variable: &str, default: f64) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::ReadAnalog,
        [Arg::from(variable), Arg::from(default)],
    )
}

/// `CheckLevel` echoing `expected`.
pub fn check_level(expected: bool) -> Step {
    action(SYSTEM_DEVICE, Operation::CheckLevel, [Arg::from(expected)])
}

/// `SetVariable`.
pub fn set_variable(name: &str, value: impl Into<StepValue>) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::SetVariable,
        [Arg::from(name), Arg::Value(value.into())],
    )
}

/// `Delay` in milliseconds.
pub fn delay(ms: u64) -> Step {
    action(SYSTEM_DEVICE, Operation::Delay, [Arg::from(ms as f64)])
}

/// `Throw` a fault.
pub fn throw(message: &str) -> Step {
    action(SYSTEM_DEVICE, Operation::Throw, [Arg::from(message)])
}

/// `NoOp`.
pub fn no_op() -> Step {
    action(SYSTEM_DEVICE, Operation::NoOp, [])
}

/// `Spawn` a material of `class` at `station`.
pub fn spawn(station: &str, class: &str) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::Spawn,
        [Arg::from(station), Arg::from(class)],
    )
}

/// `Transform` the material at `station` into `class`.
pub fn transform(station: &str, class: &str) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::Transform,
        [Arg::from(station), Arg::from(class)],
    )
}

/// `Consume` the material at `station`.
pub fn consume(station: &str) -> Step {
    action(SYSTEM_DEVICE, Operation::Consume, [Arg::from(station)])
}

/// `Bind` a known material to `station`.
pub fn bind(station: &str, id: &str, class: &str) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::Bind,
        [Arg::from(station), Arg::from(id), Arg::from(class)],
    )
}

/// `Unbind` `station`.
pub fn unbind(station: &str) -> Step {
    action(SYSTEM_DEVICE, Operation::Unbind, [Arg::from(station)])
}

/// `Attach` the material at `source` onto `holder`.
pub fn attach(holder: &str, source: &str) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::Attach,
        [Arg::from(holder), Arg::from(source)],
    )
}

/// `Detach` the material on `holder` onto `target`.
pub fn detach(holder: &str, target: &str) -> Step {
    action(
        SYSTEM_DEVICE,
        Operation::Detach,
        [Arg::from(holder), Arg::from(target)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert!("Teleport".parse::<Operation>().is_err());
    }

    #[test]
    fn test_with_retry_clamps_and_sets_mode() {
        let step = no_op().with_retry(-3);
        assert_eq!(step.policy.retry_count, 0);
        assert_eq!(step.policy.error_handling, ErrorHandling::Terminate);

        let step = no_op().with_retry(2);
        assert_eq!(step.policy.retry_count, 2);
        assert_eq!(step.policy.error_handling, ErrorHandling::Retry);
    }

    #[test]
    fn test_decorators_compose() {
        let step = home("Z")
            .with_timeout(Duration::from_secs(5))
            .on_error(ErrorHandling::Skip)
            .named("Home Z");
        assert_eq!(step.name, "Home Z");
        assert_eq!(step.policy.timeout, Some(Duration::from_secs(5)));
        assert_eq!(step.policy.error_handling, ErrorHandling::Skip);
        assert_eq!(step.device(), "Z");
    }

    #[test]
    fn test_default_names() {
        assert_eq!(move_to("X", 1.0).name, "X.MoveTo");
        assert_eq!(parallel([no_op()]).name, "Parallel");
        assert_eq!(parallel([no_op()]).device(), SYSTEM_DEVICE);
        assert_eq!(scope("Pick", no_op()).name, "Pick");
    }

    #[test]
    fn test_building_does_not_run_continuations() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let _flow = sequence(no_op(), move |_| {
            flag.store(true, Ordering::SeqCst);
            no_op()
        });
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_chain_nests_sequences() {
        let flow = chain([no_op(), delay(5), throw("x")]);
        assert!(matches!(flow.kind, StepKind::Sequence { .. }));
        assert!(matches!(chain([]).kind, StepKind::Action { .. }));
    }
}
