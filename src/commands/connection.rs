// ABOUTME: Shared helper for opening and closing the SSH session to the jail host.
// ABOUTME: Wires the live console echo in verbose mode and records disconnect failures.

use std::sync::Arc;

use jailwarden::config::Config;
use jailwarden::diagnostics::{Diagnostics, Warning};
use jailwarden::error::Result;
use jailwarden::output::{ConsoleObserver, Output, OutputMode};
use jailwarden::ssh::Session;

/// One open session for the length of a command.
pub struct Connection {
    pub session: Session,
    console: Option<Arc<ConsoleObserver>>,
}

impl Connection {
    /// Connect to the configured server.
    ///
    /// With `verbose`, remote output is echoed prefixed with the host name
    /// (skipped in JSON mode so stdout stays machine-readable).
    pub async fn open(config: &Config, verbose: bool, output: &Output) -> Result<Self> {
        output.progress(&format!("  → Connecting to {}...", config.server));

        let mut session = Session::connect(config.server.ssh_session_config()).await?;
        let console = (verbose && output.mode() != OutputMode::Json)
            .then(|| Arc::new(ConsoleObserver::new(config.server.host.clone())));
        if let Some(console) = &console {
            session = session.with_observer(console.clone());
        }

        Ok(Self { session, console })
    }

    /// Disconnect, downgrading a failure to a warning.
    pub async fn close(self, diag: &Diagnostics) {
        if let Some(console) = &self.console {
            console.flush();
        }

        let host = self.session.host().to_string();
        if let Err(e) = self.session.disconnect().await {
            diag.warn(Warning::ssh_disconnect(format!(
                "SSH disconnect failed for {}: {}",
                host, e
            )));
        }
    }
}
