// ABOUTME: Rollback command implementation.
// ABOUTME: Switches traffic back to the stopped slot under the remote deploy lock.

use jailwarden::deploy::{self, DeployLock, Deployment};
use jailwarden::diagnostics::Diagnostics;
use jailwarden::error::{Error, Result};
use jailwarden::output::{Observers, Output};

use super::connection::Connection;
use super::{Invocation, emit_warnings};

pub async fn rollback(invocation: Invocation, force: bool, mut output: Output) -> Result<()> {
    let Invocation {
        config,
        workdir,
        verbose,
    } = invocation;

    output.start_timer();
    let diag = Diagnostics::default();

    output.progress(&format!("Rolling back {} on {}", config.app, config.server));

    let connection = Connection::open(&config, verbose, &output).await?;

    let deployment = Deployment::new(&connection.session, &config, workdir);
    let observers = Observers(vec![&output, &diag]);
    let result = DeployLock::with_lock(&connection.session, &config.app, force, &diag, async {
        deploy::rollback(&deployment, &observers)
            .await
            .map_err(Error::from)
    })
    .await;

    drop(deployment);
    connection.close(&diag).await;
    emit_warnings(&output, &diag);

    let outcome = result?;
    output.success(&format!(
        "Rolled back {} to the {} slot at {}",
        config.app, outcome.active, outcome.address
    ));
    Ok(())
}
