// ABOUTME: Pipeline steps for deploy and rollback, each a short sequence of remote operations.
// ABOUTME: Steps share state only through the pipeline context keys in `keys`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::accessories::{self, DatabaseAccessory};
use crate::config::{Config, resolve_env_map};
use crate::jail::{Slot, SlotManager};
use crate::pipeline::{PipelineContext, Step};
use crate::ssh::{Transport, shell_quote};
use crate::secrets::SecretsMerge;
use crate::{proxy, release, secrets};

use super::error::DeployError;
use super::keys;

type StepResult = Result<PipelineContext, DeployError>;

const DATABASE_URL: &str = "DATABASE_URL";

/// Everything a step needs to reach the host for one run.
pub struct Deployment<'a> {
    pub transport: &'a dyn Transport,
    pub config: &'a Config,
    pub slots: SlotManager,
    /// Directory the release build command runs in.
    pub workdir: PathBuf,
}

impl<'a> Deployment<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a Config, workdir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            config,
            slots: config.slot_manager(),
            workdir: workdir.into(),
        }
    }

    fn target(&self, ctx: &PipelineContext) -> Result<Slot, DeployError> {
        Ok(ctx.require(keys::TARGET_SLOT)?)
    }

    fn current(&self, ctx: &PipelineContext) -> Result<Option<Slot>, DeployError> {
        Ok(ctx.get::<Option<Slot>>(keys::CURRENT_SLOT)?.flatten())
    }

    /// Configured env values with the secrets file layered over them.
    ///
    /// With a database accessory, `DATABASE_URL` is added from the credentials on the host
    /// unless the config or secrets already set it.
    pub async fn resolve_env(&self) -> Result<SecretsMerge, DeployError> {
        let env =
            resolve_env_map(&self.config.env).map_err(|e| DeployError::Config(e.to_string()))?;
        let mut merged = secrets::merge_env(env, &self.config.secrets).await?;

        if let Some(db) = &self.config.database {
            let env = merged.env_mut();
            if !env.contains_key(DATABASE_URL) {
                let accessory =
                    DatabaseAccessory::new(&self.slots, db, self.config.timeouts.command);
                let password = accessory.password(self.transport).await?;
                env.insert(DATABASE_URL.to_string(), accessory.url(&password));
            }
        }
        Ok(merged)
    }

    /// The environment the application sees inside `slot`'s unit.
    pub fn application_env(
        &self,
        ctx: &PipelineContext,
        slot: Slot,
    ) -> Result<BTreeMap<String, String>, DeployError> {
        let mut env: BTreeMap<String, String> = ctx.require(keys::ENV)?;
        env.insert("PORT".to_string(), self.config.port.to_string());
        env.insert(
            "LISTEN_ADDRESS".to_string(),
            self.slots.private_address(slot).to_string(),
        );
        Ok(env)
    }
}

// =============================================================================
// Preparation
// =============================================================================

/// Run the local build command and check the archive.
pub struct BuildRelease<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for BuildRelease<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "build release"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let artifact =
            release::prepare(&d.config.release, &d.workdir, d.config.timeouts.long).await?;
        tracing::info!(archive = %artifact.archive.display(), bytes = artifact.size, "release ready");
        Ok(ctx.clone().with(keys::ARCHIVE, &artifact.archive)?)
    }
}

/// Resolve configured env values and layer the secrets file over them.
pub struct LoadSecrets<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for LoadSecrets<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "load secrets"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let merged = self.0.resolve_env().await?;
        let was_merged = merged.was_merged();
        Ok(ctx
            .clone()
            .with(keys::SECRETS_MERGED, was_merged)?
            .with(keys::ENV, merged.into_env())?)
    }
}

/// Pick the slot for the new release and remember the one serving now.
pub struct DetermineSlot<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for DetermineSlot<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "determine slot"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let rotation = d.slots.determine_next_slot(d.transport).await?;
        Ok(ctx
            .clone()
            .with(keys::TARGET_SLOT, rotation.next)?
            .with(keys::CURRENT_SLOT, rotation.current)?)
    }
}

/// Pick the stopped slot to bring back for a manual rollback.
pub struct SelectRollbackTarget<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for SelectRollbackTarget<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "select rollback target"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let rotation = d.slots.rollback_target(d.transport).await?;
        Ok(ctx
            .clone()
            .with(keys::TARGET_SLOT, rotation.next)?
            .with(keys::CURRENT_SLOT, rotation.current)?)
    }
}

// =============================================================================
// Unit lifecycle
// =============================================================================

/// Destroy a leftover unit in the target slot from an earlier cycle.
pub struct RemoveStaleUnit<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for RemoveStaleUnit<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "remove stale unit"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let target = d.target(ctx)?;
        if d.slots.exists(d.transport, target).await? {
            tracing::info!(unit = %d.slots.unit_name(target), "removing stale unit");
            d.slots.destroy(d.transport, target).await?;
        }
        Ok(ctx.clone())
    }
}

pub struct CreateUnit<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for CreateUnit<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "create unit"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        d.slots.create(d.transport, d.target(ctx)?).await?;
        Ok(ctx.clone())
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<(), DeployError> {
        let d = self.0;
        d.slots.destroy(d.transport, d.target(ctx)?).await?;
        Ok(())
    }
}

pub struct StartUnit<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for StartUnit<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "start unit"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        d.slots.start(d.transport, d.target(ctx)?).await?;
        Ok(ctx.clone())
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<(), DeployError> {
        let d = self.0;
        d.slots.stop(d.transport, d.target(ctx)?).await?;
        Ok(())
    }
}

/// Stop the unit that served traffic before this run. Its filesystem stays for rollback.
pub struct RetirePrevious<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for RetirePrevious<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "retire previous unit"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        if let Some(current) = d.current(ctx)? {
            d.slots.stop(d.transport, current).await?;
        }
        Ok(ctx.clone())
    }
}

// =============================================================================
// Release payload
// =============================================================================

pub struct UploadRelease<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for UploadRelease<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "upload release"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let archive: PathBuf = ctx.require(keys::ARCHIVE)?;
        let remote = release::remote_archive_path(d.slots.app(), d.target(ctx)?);
        let bytes = d.transport.upload(Path::new(&archive), &remote).await?;
        tracing::info!(remote = %remote, bytes, "release uploaded");
        Ok(ctx.clone().with(keys::REMOTE_ARCHIVE, &remote)?)
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<(), DeployError> {
        let d = self.0;
        if let Some(remote) = ctx.get::<String>(keys::REMOTE_ARCHIVE)? {
            remove_staged(d, &remote).await?;
        }
        Ok(())
    }
}

pub struct InstallRelease<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for InstallRelease<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "install release"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let remote: String = ctx.require(keys::REMOTE_ARCHIVE)?;
        d.slots
            .install_payload(d.transport, d.target(ctx)?, &remote)
            .await?;
        if let Err(e) = remove_staged(d, &remote).await {
            tracing::warn!(remote = %remote, error = %e, "could not remove staged archive");
        }
        Ok(ctx.clone())
    }
}

async fn remove_staged(d: &Deployment<'_>, remote: &str) -> Result<(), DeployError> {
    d.transport
        .run_checked(
            &format!("rm -f {}", shell_quote(remote)),
            d.config.timeouts.command,
        )
        .await?;
    Ok(())
}

/// Run the configured migration command when a database accessory exists.
pub struct RunMigrations<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for RunMigrations<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "run migrations"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let Some(command) = d.config.database.as_ref().and_then(|db| db.migrate.as_deref()) else {
            tracing::debug!("no migration command configured");
            return Ok(ctx.clone());
        };

        let target = d.target(ctx)?;
        let env = d.application_env(ctx, target)?;
        accessories::migrate(
            d.transport,
            &d.slots,
            target,
            command,
            &env,
            d.config.timeouts.long,
        )
        .await?;
        Ok(ctx.clone())
    }
}

pub struct StartApplication<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for StartApplication<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "start application"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let target = d.target(ctx)?;
        let env = d.application_env(ctx, target)?;
        d.slots
            .start_application(d.transport, target, &d.config.release.start, &env)
            .await?;
        Ok(ctx.clone())
    }
}

// =============================================================================
// Cutover
// =============================================================================

/// Gate the rotation on the new unit answering HTTP on its private address.
pub struct HealthCheck<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for HealthCheck<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "health check"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let address = d.slots.private_address(d.target(ctx)?);
        let attempts = d
            .config
            .healthcheck
            .probe()
            .check(d.transport, address, d.config.port)
            .await?;
        Ok(ctx.clone().with(keys::HEALTH_ATTEMPTS, attempts)?)
    }
}

/// Point the reverse proxy at the new unit, keeping the old config for rollback.
pub struct UpdateProxy<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for UpdateProxy<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "update proxy"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let proxy = &d.config.proxy;
        let timeout = d.config.timeouts.command;
        let target = d.target(ctx)?;

        let previous = proxy::read_current(d.transport, proxy, timeout)
            .await
            .map_err(DeployError::Proxy)?;
        tracing::debug!(
            from = ?previous.as_deref().and_then(proxy::active_slot),
            to = %target,
            "switching proxy"
        );
        let rendered = proxy::render(
            proxy,
            d.slots.app(),
            target,
            d.slots.private_address(target),
            d.config.port,
        );

        if let Err(e) = proxy::apply(d.transport, proxy, &rendered, timeout).await {
            // This step never gets a rollback of its own, so undo a partial write here.
            if let Err(restore) =
                proxy::restore(d.transport, proxy, previous.as_deref(), timeout).await
            {
                tracing::warn!(error = %restore, "could not restore proxy configuration");
            }
            return Err(DeployError::Proxy(e));
        }

        Ok(ctx.clone().with(keys::PREVIOUS_PROXY, previous)?)
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<(), DeployError> {
        let d = self.0;
        let previous = ctx.get::<Option<String>>(keys::PREVIOUS_PROXY)?.flatten();
        tracing::info!("restoring previous proxy configuration");
        proxy::restore(
            d.transport,
            &d.config.proxy,
            previous.as_deref(),
            d.config.timeouts.command,
        )
        .await
        .map_err(DeployError::Proxy)
    }
}
