// ABOUTME: Setup command implementation.
// ABOUTME: Prepares a fresh FreeBSD host: jail directories, base template, network, proxy, database.

use jailwarden::deploy::{self, DeployLock, Deployment};
use jailwarden::diagnostics::Diagnostics;
use jailwarden::error::{Error, Result};
use jailwarden::output::{Observers, Output};

use super::connection::Connection;
use super::{Invocation, emit_warnings};

pub async fn setup(invocation: Invocation, mut output: Output) -> Result<()> {
    let Invocation {
        config,
        workdir,
        verbose,
    } = invocation;

    output.start_timer();
    let diag = Diagnostics::default();

    output.progress(&format!("Setting up {} for {}", config.server, config.app));

    let connection = Connection::open(&config, verbose, &output).await?;

    let deployment = Deployment::new(&connection.session, &config, workdir);
    let observers = Observers(vec![&output, &diag]);
    let result = DeployLock::with_lock(&connection.session, &config.app, false, &diag, async {
        deploy::setup(&deployment, &observers)
            .await
            .map_err(Error::from)
    })
    .await;

    drop(deployment);
    connection.close(&diag).await;
    emit_warnings(&output, &diag);

    result?;
    output.success(&format!("{} is ready for deploys", config.server.host));
    Ok(())
}
