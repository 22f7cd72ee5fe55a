// ABOUTME: Logs command implementation.
// ABOUTME: Tails the application log of the active unit, optionally following until Ctrl-C.

use jailwarden::diagnostics::Diagnostics;
use jailwarden::error::{Error, Result};
use jailwarden::jail::commands;
use jailwarden::output::{Output, PassthroughObserver};
use jailwarden::ssh::Transport;

use super::connection::Connection;
use super::{Invocation, emit_warnings};
use crate::cli::LogsArgs;

pub async fn logs(invocation: Invocation, args: LogsArgs, output: Output) -> Result<()> {
    let Invocation {
        config, verbose, ..
    } = invocation;

    let diag = Diagnostics::default();
    let connection = Connection::open(&config, verbose, &output).await?;
    let session = &connection.session;
    let slots = config.slot_manager();

    let result = async {
        let slot = slots
            .current_slot(session)
            .await?
            .ok_or_else(|| Error::NoActiveUnit(config.app.to_string()))?;

        let tail = commands::tail(&slots.application_log(slot), args.lines, args.follow);
        let stream = session.run_streaming(&tail, &PassthroughObserver);

        if args.follow {
            tokio::select! {
                streamed = stream => streamed.map(|_| ()).map_err(Error::from),
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("log follow interrupted");
                    Ok(())
                }
            }
        } else {
            stream.await.map(|_| ()).map_err(Error::from)
        }
    }
    .await;

    connection.close(&diag).await;
    emit_warnings(&output, &diag);
    result
}
