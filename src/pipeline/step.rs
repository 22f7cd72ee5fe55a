// ABOUTME: The Step trait: one named unit of work with an optional compensating action.
// ABOUTME: Steps are object-safe so pipelines can hold heterogeneous steps.

use async_trait::async_trait;

use super::context::PipelineContext;

/// A pipeline step.
///
/// `run` receives the context accumulated so far and returns it, possibly
/// extended. `rollback` is the compensating action invoked when a later step
/// fails; it sees the context as it was at the point of failure.
#[async_trait]
pub trait Step: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &str;

    async fn run(&self, ctx: &PipelineContext) -> Result<PipelineContext, Self::Error>;

    async fn rollback(&self, _ctx: &PipelineContext) -> Result<(), Self::Error> {
        Ok(())
    }
}
