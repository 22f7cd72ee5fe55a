// ABOUTME: Sequential pipeline executor with reverse-order compensation on failure.
// ABOUTME: Rollback is best effort: errors and panics in compensations are logged and skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use super::context::PipelineContext;
use super::step::Step;

/// Terminal failure of a pipeline run: the step that failed, its error and the
/// context as it was when the step was invoked.
#[derive(Debug, thiserror::Error)]
#[error("step '{step}' failed: {error}")]
pub struct PipelineFailure<E> {
    pub step: String,
    pub error: E,
    pub context: PipelineContext,
}

/// Hooks for progress reporting. Every hook defaults to doing nothing.
pub trait PipelineObserver: Send + Sync {
    fn step_started(&self, _step: &str) {}
    fn step_completed(&self, _step: &str) {}
    fn step_failed(&self, _step: &str, _error: &str) {}
    fn rollback_started(&self, _step: &str) {}
    fn rollback_failed(&self, _step: &str, _reason: &str) {}
}

/// Observer that ignores every event.
pub struct Silent;

impl PipelineObserver for Silent {}

/// Ordered list of steps sharing one error type.
pub struct Pipeline<'a, E> {
    name: String,
    steps: Vec<Box<dyn Step<Error = E> + 'a>>,
}

impl<'a, E> Pipeline<'a, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step<Error = E> + 'a) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn Step<Error = E> + 'a>) {
        self.steps.push(step);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: PipelineContext) -> Result<PipelineContext, PipelineFailure<E>> {
        self.run_observed(ctx, &Silent).await
    }

    /// Run every step in order, compensating completed steps in reverse if one fails.
    ///
    /// The failing step itself is never rolled back, and steps after it never run.
    pub async fn run_observed(
        &self,
        mut ctx: PipelineContext,
        observer: &dyn PipelineObserver,
    ) -> Result<PipelineContext, PipelineFailure<E>> {
        tracing::debug!(pipeline = %self.name, steps = self.steps.len(), "pipeline started");

        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name();
            tracing::info!(pipeline = %self.name, step = name, "running step");
            observer.step_started(name);

            match step.run(&ctx).await {
                Ok(next) => {
                    ctx = next;
                    observer.step_completed(name);
                }
                Err(error) => {
                    tracing::error!(pipeline = %self.name, step = name, error = %error, "step failed");
                    observer.step_failed(name, &error.to_string());
                    self.compensate(&self.steps[..index], &ctx, observer).await;
                    return Err(PipelineFailure {
                        step: name.to_string(),
                        error,
                        context: ctx,
                    });
                }
            }
        }

        tracing::debug!(pipeline = %self.name, "pipeline completed");
        Ok(ctx)
    }

    async fn compensate(
        &self,
        completed: &[Box<dyn Step<Error = E> + 'a>],
        ctx: &PipelineContext,
        observer: &dyn PipelineObserver,
    ) {
        for step in completed.iter().rev() {
            let name = step.name();
            tracing::info!(pipeline = %self.name, step = name, "rolling back step");
            observer.rollback_started(name);

            let outcome = AssertUnwindSafe(step.rollback(ctx)).catch_unwind().await;
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            tracing::warn!(pipeline = %self.name, step = name, reason = %reason, "rollback failed, continuing");
            observer.rollback_failed(name, &reason);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
