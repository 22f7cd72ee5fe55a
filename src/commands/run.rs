// ABOUTME: Run command implementation.
// ABOUTME: Executes a one-off command inside the active unit with the application environment.

use jailwarden::deploy::{Deployment, keys};
use jailwarden::diagnostics::Diagnostics;
use jailwarden::error::{Error, Result};
use jailwarden::output::{Output, PassthroughObserver};
use jailwarden::pipeline::PipelineContext;
use jailwarden::ssh::{TIMEOUT_EXIT_CODE, Transport, shell_quote};

use super::connection::Connection;
use super::{Invocation, emit_warnings};

/// Run `command` in the active unit, streaming its output.
///
/// A non-zero remote exit becomes `Error::RemoteExit` so the process exits non-zero.
pub async fn run(invocation: Invocation, command: Vec<String>, output: Output) -> Result<()> {
    let Invocation {
        config,
        workdir,
        verbose,
    } = invocation;

    let diag = Diagnostics::default();
    let connection = Connection::open(&config, verbose, &output).await?;

    let deployment = Deployment::new(&connection.session, &config, workdir);
    let result = run_in_active(&deployment, &command, &output).await;

    drop(deployment);
    connection.close(&diag).await;
    emit_warnings(&output, &diag);

    match result? {
        0 => Ok(()),
        code => Err(Error::RemoteExit(code)),
    }
}

async fn run_in_active(d: &Deployment<'_>, command: &[String], output: &Output) -> Result<i32> {
    let slot = d
        .slots
        .current_slot(d.transport)
        .await?
        .ok_or_else(|| Error::NoActiveUnit(d.config.app.to_string()))?;

    let env = d.resolve_env().await?.into_env();
    let ctx = PipelineContext::new()
        .with(keys::ENV, env)
        .map_err(|e| Error::Deploy(e.into()))?;
    let env = d.application_env(&ctx, slot)?;

    let script = command
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");

    output.progress(&format!("  → Running in {}...", d.slots.unit_name(slot)));
    let exit = d
        .transport
        .run_streaming(&d.slots.exec_command(slot, &script, &env), &PassthroughObserver)
        .await?;

    Ok(exit.unwrap_or(TIMEOUT_EXIT_CODE))
}
