// ABOUTME: Deploy, rollback and setup orchestrations built from pipeline steps.
// ABOUTME: Exports the step sequences, the deploy lock and deploy errors.

mod error;
pub mod keys;
mod lock;
pub mod setup;
pub mod steps;

pub use error::{DeployError, DeployErrorKind};
pub use lock::{DeployLock, LockInfo};
pub use steps::Deployment;

use std::net::Ipv4Addr;

use crate::jail::Slot;
use crate::pipeline::{Pipeline, PipelineContext, PipelineFailure, PipelineObserver};

use setup::{ConfigureNetwork, FetchTemplate, InstallProxy, PrepareDirectories, ProvisionDatabase};
use steps::{
    BuildRelease, CreateUnit, DetermineSlot, HealthCheck, InstallRelease, LoadSecrets,
    RemoveStaleUnit, RetirePrevious, RunMigrations, SelectRollbackTarget, StartApplication,
    StartUnit, UpdateProxy, UploadRelease,
};

pub type PipelineResult<T> = Result<T, PipelineFailure<DeployError>>;

/// What a successful rotation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Slot now serving traffic.
    pub active: Slot,
    pub address: Ipv4Addr,
    /// Slot that was stopped, kept on disk for rollback.
    pub retired: Option<Slot>,
    pub health_attempts: u32,
}

impl RotationOutcome {
    fn from_context(
        deployment: &Deployment<'_>,
        ctx: &PipelineContext,
    ) -> Result<Self, DeployError> {
        let active: Slot = ctx.require(keys::TARGET_SLOT)?;
        Ok(Self {
            active,
            address: deployment.slots.private_address(active),
            retired: ctx.get::<Option<Slot>>(keys::CURRENT_SLOT)?.flatten(),
            health_attempts: ctx.get(keys::HEALTH_ATTEMPTS)?.unwrap_or(0),
        })
    }
}

/// Release into the idle slot, verify it, switch the proxy and stop the old slot.
pub fn deploy_pipeline<'a>(d: &'a Deployment<'a>) -> Pipeline<'a, DeployError> {
    Pipeline::new("deploy")
        .step(BuildRelease(d))
        .step(LoadSecrets(d))
        .step(DetermineSlot(d))
        .step(RemoveStaleUnit(d))
        .step(CreateUnit(d))
        .step(StartUnit(d))
        .step(UploadRelease(d))
        .step(InstallRelease(d))
        .step(RunMigrations(d))
        .step(StartApplication(d))
        .step(HealthCheck(d))
        .step(UpdateProxy(d))
        .step(RetirePrevious(d))
}

/// Reactivate the stopped slot and switch traffic back to it.
pub fn rollback_pipeline<'a>(d: &'a Deployment<'a>) -> Pipeline<'a, DeployError> {
    Pipeline::new("rollback")
        .step(LoadSecrets(d))
        .step(SelectRollbackTarget(d))
        .step(StartUnit(d))
        .step(StartApplication(d))
        .step(HealthCheck(d))
        .step(UpdateProxy(d))
        .step(RetirePrevious(d))
}

/// Prepare a fresh host for its first deploy.
pub fn setup_pipeline<'a>(d: &'a Deployment<'a>) -> Pipeline<'a, DeployError> {
    Pipeline::new("setup")
        .step(PrepareDirectories(d))
        .step(FetchTemplate(d))
        .step(ConfigureNetwork(d))
        .step(InstallProxy(d))
        .step(ProvisionDatabase(d))
}

pub async fn deploy(
    d: &Deployment<'_>,
    observer: &dyn PipelineObserver,
) -> PipelineResult<RotationOutcome> {
    let ctx = deploy_pipeline(d)
        .run_observed(PipelineContext::new(), observer)
        .await?;
    outcome(d, ctx)
}

pub async fn rollback(
    d: &Deployment<'_>,
    observer: &dyn PipelineObserver,
) -> PipelineResult<RotationOutcome> {
    let ctx = rollback_pipeline(d)
        .run_observed(PipelineContext::new(), observer)
        .await?;
    outcome(d, ctx)
}

pub async fn setup(d: &Deployment<'_>, observer: &dyn PipelineObserver) -> PipelineResult<()> {
    setup_pipeline(d)
        .run_observed(PipelineContext::new(), observer)
        .await
        .map(|_| ())
}

fn outcome(d: &Deployment<'_>, ctx: PipelineContext) -> PipelineResult<RotationOutcome> {
    RotationOutcome::from_context(d, &ctx).map_err(|error| PipelineFailure {
        step: "summarise".to_string(),
        error,
        context: ctx.clone(),
    })
}
