//! Flow interpreter.
//!
//! Walks a [`Step`] tree against an [`ExecutionContext`]:
//!
//! 1. A cancelled run faults with [`Fault::Cancelled`] before any node starts.
//! 2. Every attempt publishes `Running`, then `Completed` or `Error`, on the
//!    trace stream.
//! 3. Actions are raced against cancellation; device waits stop their device
//!    when abandoned.
//! 4. A failed node is re-run from scratch while attempts remain. Exhausted
//!    `Skip` / `AskUser` nodes go to the [`EscalationHandler`].
//!
//! `Parallel` branches are polled concurrently; the first fault wins and the
//! remaining branches are dropped.

use crate::context::ExecutionContext;
use crate::error::Fault;
use crate::handlers::{ActionCall, HandlerTable};
use crate::step::{ErrorHandling, Step, StepKind};
use crate::value::StepValue;
use cell_common::consts::TRACE_CHANNEL_CAPACITY;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

// ─── Traces ─────────────────────────────────────────────────────────

/// Lifecycle status of one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    /// Attempt started.
    Running,
    /// Attempt succeeded.
    Completed,
    /// Attempt faulted.
    Error,
}

/// One entry of the step-trace stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    /// Step name.
    pub name: String,
    /// Addressed device, `System` for composite nodes.
    pub device: String,
    /// Attempt status.
    pub status: TraceStatus,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Fault description on `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ─── Escalation ─────────────────────────────────────────────────────

/// Answer of an [`EscalationHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Propagate the fault.
    Propagate,
    /// Treat the step as completed with this value.
    Substitute(StepValue),
    /// Run the step again with a fresh retry budget.
    Retry,
}

/// Host hook for steps marked `Skip` or `AskUser` whose retries are exhausted.
pub trait EscalationHandler: Send + Sync {
    /// Decide what to do with `fault` raised by `step`.
    fn escalate<'a>(&'a self, step: &'a Step, fault: &'a Fault) -> BoxFuture<'a, Resolution>;
}

/// Default hook: log and propagate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEscalation;

impl EscalationHandler for LogEscalation {
    fn escalate<'a>(&'a self, step: &'a Step, fault: &'a Fault) -> BoxFuture<'a, Resolution> {
        warn!(
            "Step '{}' requested {:?} but no escalation handler is installed: {}",
            step.name, step.policy.error_handling, fault
        );
        futures::future::ready(Resolution::Propagate).boxed()
    }
}

/// Hook that skips every escalated step with a fixed value.
#[derive(Debug, Clone, Default)]
pub struct SkipEscalation(pub StepValue);

impl EscalationHandler for SkipEscalation {
    fn escalate<'a>(&'a self, step: &'a Step, fault: &'a Fault) -> BoxFuture<'a, Resolution> {
        info!("Skipping step '{}' after fault: {}", step.name, fault);
        futures::future::ready(Resolution::Substitute(self.0.clone())).boxed()
    }
}

// ─── Interpreter ────────────────────────────────────────────────────

/// Runs step trees.
pub struct Interpreter {
    handlers: Arc<HandlerTable>,
    traces: broadcast::Sender<StepTrace>,
    escalation: Arc<dyn EscalationHandler>,
}

impl Interpreter {
    /// Interpreter with the built-in handlers and [`LogEscalation`].
    pub fn new() -> Self {
        let (traces, _) = broadcast::channel(TRACE_CHANNEL_CAPACITY);
        Self {
            handlers: Arc::new(HandlerTable::with_defaults()),
            traces,
            escalation: Arc::new(LogEscalation),
        }
    }

    /// Replace the handler table.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Install an escalation hook.
    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = escalation;
        self
    }

    /// Subscribe to the step-trace stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StepTrace> {
        self.traces.subscribe()
    }

    /// Run `step` to completion.
    pub async fn run(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<StepValue, Fault> {
        info!("Running flow '{}'", step.name);
        let result = self.run_node(step, ctx).await;
        match &result {
            Ok(value) => info!("Flow '{}' completed: {}", step.name, value),
            Err(fault) if fault.is_cancellation() => info!("Flow '{}' cancelled", step.name),
            Err(fault) => error!("Flow '{}' failed: {}", step.name, fault),
        }
        result
    }

    fn run_node<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a Arc<ExecutionContext>,
    ) -> BoxFuture<'a, Result<StepValue, Fault>> {
        async move {
            let mut attempt: u32 = 0;
            loop {
                if ctx.is_cancelled() {
                    return Err(Fault::Cancelled);
                }
                attempt += 1;
                self.emit(step, TraceStatus::Running, attempt, None);

                let fault = match self.dispatch(step, ctx).await {
                    Ok(value) => {
                        self.emit(step, TraceStatus::Completed, attempt, None);
                        return Ok(value);
                    }
                    Err(fault) => fault,
                };

                self.emit(step, TraceStatus::Error, attempt, Some(fault.to_string()));
                if fault.is_cancellation() {
                    return Err(fault);
                }
                if attempt <= step.policy.retry_count {
                    debug!(
                        "Retrying '{}' ({}/{}) after: {}",
                        step.name, attempt, step.policy.retry_count, fault
                    );
                    continue;
                }

                match step.policy.error_handling {
                    ErrorHandling::Skip | ErrorHandling::AskUser => {
                        match self.escalation.escalate(step, &fault).await {
                            Resolution::Propagate => return Err(fault),
                            Resolution::Substitute(value) => {
                                self.emit(step, TraceStatus::Completed, attempt, None);
                                return Ok(value);
                            }
                            Resolution::Retry => {
                                debug!("Escalation re-runs '{}'", step.name);
                                attempt = 0;
                            }
                        }
                    }
                    ErrorHandling::Terminate | ErrorHandling::Retry => return Err(fault),
                }
            }
        }
        .boxed()
    }

    async fn dispatch(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<StepValue, Fault> {
        match &step.kind {
            StepKind::Action {
                device,
                operation,
                args,
            } => {
                let call = ActionCall {
                    ctx: Arc::clone(ctx),
                    device: device.clone(),
                    operation: *operation,
                    args: args.clone(),
                    timeout: step.policy.timeout,
                };
                let handler = self.handlers.resolve(&call)?;
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(Fault::Cancelled),
                    result = handler(call) => result,
                }
            }
            StepKind::Sequence {
                first,
                next,
                select,
            } => {
                let first_result = self.run_node(first, ctx).await?;
                let next_step = next(&first_result);
                let second_result = self.run_node(&next_step, ctx).await?;
                Ok(match select {
                    Some(select) => select(first_result, second_result),
                    None => second_result,
                })
            }
            StepKind::Map { source, transform } => {
                let value = self.run_node(source, ctx).await?;
                Ok(transform(value))
            }
            StepKind::Scope { inner } => self.run_node(inner, ctx).await,
            StepKind::Parallel { steps } => {
                let results = try_join_all(steps.iter().map(|s| self.run_node(s, ctx))).await?;
                Ok(StepValue::List(results))
            }
            StepKind::Loop { inner, count } => {
                let count = *count;
                let mut last = StepValue::Unit;
                let mut iteration: i64 = 0;
                while count < 0 || iteration < count {
                    if ctx.is_cancelled() {
                        return Err(Fault::Cancelled);
                    }
                    last = self.run_node(inner, ctx).await?;
                    iteration += 1;
                    if count < 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Ok(last)
            }
        }
    }

    fn emit(&self, step: &Step, status: TraceStatus, attempt: u32, message: Option<String>) {
        trace!(
            "{:?} '{}' on {} (attempt {})",
            status,
            step.name,
            step.device(),
            attempt
        );
        // No subscribers is fine
        let _ = self.traces.send(StepTrace {
            name: step.name.clone(),
            device: step.device().to_string(),
            status,
            attempt,
            message,
        });
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
