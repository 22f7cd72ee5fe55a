// ABOUTME: Generic step pipeline with automatic reverse-order rollback.
// ABOUTME: Used by the deploy, rollback and setup orchestrations.

mod context;
mod engine;
mod step;

pub use context::{ContextError, PipelineContext};
pub use engine::{Pipeline, PipelineFailure, PipelineObserver, Silent};
pub use step::Step;
