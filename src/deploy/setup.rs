// ABOUTME: Host preparation pipeline: directories, base template, loopback network, proxy, database.
// ABOUTME: Every step probes current state first, so setup converges when re-run.

use async_trait::async_trait;

use crate::accessories::DatabaseAccessory;
use crate::jail::commands;
use crate::pipeline::{PipelineContext, Step};
use crate::ssh::shell_quote;

use super::error::DeployError;
use super::steps::Deployment;

type StepResult = Result<PipelineContext, DeployError>;

pub struct PrepareDirectories<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for PrepareDirectories<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "prepare directories"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let layout = d.slots.layout();
        let templates = layout.templates_dir();
        let containers = layout.containers_dir();
        d.transport
            .run_checked(
                &commands::make_dirs(&[&templates, &containers]),
                d.config.timeouts.command,
            )
            .await?;
        Ok(ctx.clone())
    }
}

/// Download and unpack the FreeBSD base set the units are cloned from.
pub struct FetchTemplate<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for FetchTemplate<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "fetch template"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let template = d.slots.layout().template_path();
        let base_marker = format!("{}/bin/sh", template);

        if d.transport.path_exists(&base_marker).await? {
            tracing::info!(template = %template, "template already present");
            return Ok(ctx.clone());
        }

        tracing::info!(url = %d.config.jail.base_url(), "fetching base template");
        if let Err(e) = unpack_base(d, &template).await {
            // A half-extracted template would pass the probe above on the next run.
            let timeout = d.config.timeouts.command;
            for cleanup in [commands::clear_flags(&template), commands::remove(&template)] {
                if let Err(cleanup_error) = d.transport.run_checked(&cleanup, timeout).await {
                    tracing::warn!(error = %cleanup_error, "could not remove partial template");
                }
            }
            return Err(e);
        }

        Ok(ctx.clone())
    }
}

async fn unpack_base(d: &Deployment<'_>, template: &str) -> Result<(), DeployError> {
    let long = d.config.timeouts.long;
    let download = format!("/tmp/{}-base.txz", d.config.jail.release);

    d.transport
        .run_checked(&commands::make_dirs(&[template]), d.config.timeouts.command)
        .await?;
    d.transport
        .run_checked(
            &format!(
                "fetch -q -o {} {}",
                shell_quote(&download),
                shell_quote(&d.config.jail.base_url())
            ),
            long,
        )
        .await?;
    d.transport
        .run_checked(
            &format!("tar -xf {} -C {}", shell_quote(&download), shell_quote(template)),
            long,
        )
        .await?;
    d.transport
        .run_checked(&format!("rm -f {}", shell_quote(&download)), d.config.timeouts.command)
        .await?;
    Ok(())
}

/// Create the cloned loopback interface the slot addresses live on.
pub struct ConfigureNetwork<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for ConfigureNetwork<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "configure network"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let interface = &d.config.jail.interface;
        let timeout = d.config.timeouts.command;

        let probe = d
            .transport
            .run(&format!("ifconfig {}", shell_quote(interface)), timeout)
            .await?;
        if probe.success() {
            tracing::info!(interface = %interface, "loopback interface already exists");
            return Ok(ctx.clone());
        }

        d.transport
            .run_checked(
                &format!("sysrc cloned_interfaces+={}", shell_quote(interface)),
                timeout,
            )
            .await?;
        d.transport
            .run_checked("service netif cloneup", timeout)
            .await?;
        Ok(ctx.clone())
    }
}

/// Install and enable the reverse proxy.
pub struct InstallProxy<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for InstallProxy<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "install proxy"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let package = shell_quote(&d.config.proxy.package);
        let timeout = d.config.timeouts.command;

        let installed = d
            .transport
            .run(&format!("pkg info -e {}", package), timeout)
            .await?;
        if !installed.success() {
            tracing::info!(package = %d.config.proxy.package, "installing proxy");
            d.transport
                .run_checked(&format!("pkg install -y {}", package), d.config.timeouts.long)
                .await?;
        }

        d.transport
            .run_checked(&format!("sysrc {}_enable=YES", package), timeout)
            .await?;

        let running = d
            .transport
            .run(&format!("service {} status", package), timeout)
            .await?;
        if !running.success() {
            d.transport
                .run_checked(&format!("service {} start", package), timeout)
                .await?;
        }
        Ok(ctx.clone())
    }
}

/// Provision the database accessory jail when one is configured.
pub struct ProvisionDatabase<'a>(pub &'a Deployment<'a>);

#[async_trait]
impl Step for ProvisionDatabase<'_> {
    type Error = DeployError;

    fn name(&self) -> &str {
        "provision database"
    }

    async fn run(&self, ctx: &PipelineContext) -> StepResult {
        let d = self.0;
        let Some(db) = &d.config.database else {
            tracing::debug!("no database accessory configured");
            return Ok(ctx.clone());
        };

        DatabaseAccessory::new(&d.slots, db, d.config.timeouts.command)
            .provision(d.transport)
            .await?;
        Ok(ctx.clone())
    }
}
