use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::host::CompiledModule;
use super::instance::ExecutionInstance;
use super::outcome::{EvaluationError, EvaluationResult, Interrupt};

/// Per-evaluation limits, fixed when the evaluator is built.
///
/// `memory_limit_pages` is enforced on every instance, clamped to the
/// sandbox's own ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_limit_pages: u32,
    pub execution_deadline: Duration,
}

/// Deadline and cancellation handle an evaluation is bound to.
#[derive(Debug, Clone)]
pub struct EvalContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl EvalContext {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that is also canceled whenever `parent` is.
    pub fn with_parent(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: parent.child_token(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Why this context can no longer run anything, if it can't.
    pub fn done(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Canceled)
        } else if Instant::now() >= self.deadline {
            Some(Interrupt::DeadlineExceeded)
        } else {
            None
        }
    }
}

/// Runs source text through fresh instances of one compiled module.
#[derive(Clone)]
pub struct Evaluator {
    module: CompiledModule,
    limits: ResourceLimits,
}

impl Evaluator {
    pub fn new(module: CompiledModule, limits: ResourceLimits) -> Self {
        Self { module, limits }
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Page ceiling each instance actually runs with.
    pub fn memory_limit_pages(&self) -> u32 {
        self.module
            .effective_memory_pages(self.limits.memory_limit_pages)
    }

    /// A fresh context bounded by the configured execution deadline.
    pub fn context(&self) -> EvalContext {
        EvalContext::with_timeout(self.limits.execution_deadline)
    }

    /// Like [`Evaluator::context`], but also canceled along with `parent`.
    pub fn child_context(&self, parent: &CancellationToken) -> EvalContext {
        EvalContext::with_parent(parent, self.limits.execution_deadline)
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    pub fn live_instances(&self) -> usize {
        self.module.live_instances()
    }

    /// Evaluates `source` in a new instance bound to `ctx`.
    ///
    /// Always returns a populated result. When the deadline passes or `ctx`
    /// is canceled the instance is dropped where it stands, even inside a
    /// host call, and released before this returns. Dropping the returned
    /// future does the same.
    pub async fn evaluate(&self, ctx: &EvalContext, source: &str) -> EvaluationResult {
        let span = info_span!("evaluate", id = %Uuid::new_v4(), bytes = source.len());
        let result = self.run(ctx, source).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(_) => debug!("Evaluation succeeded"),
            Err(e) => warn!(
                "Evaluation failed ({}, code {}): {}",
                e.kind(),
                e.code(),
                e.message()
            ),
        });
        result
    }

    async fn run(&self, ctx: &EvalContext, source: &str) -> EvaluationResult {
        if let Some(reason) = ctx.done() {
            return Err(EvaluationError::instantiation(reason));
        }

        let instance = ExecutionInstance::new(
            &self.module,
            source.to_owned(),
            self.limits.memory_limit_pages,
            ctx.deadline,
        );

        tokio::select! {
            result = instance.execute() => result,
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(ctx.deadline)) => {
                debug!("Deadline passed, dropping instance");
                Err(EvaluationError::instantiation(Interrupt::DeadlineExceeded))
            }
            _ = ctx.cancel.cancelled() => Err(EvaluationError::instantiation(Interrupt::Canceled)),
        }
    }
}
