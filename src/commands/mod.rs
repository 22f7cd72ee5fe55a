// ABOUTME: Command module aggregator for the jailwarden CLI.
// ABOUTME: Re-exports one handler per subcommand plus the shared invocation type.

mod connection;
mod deploy;
mod logs;
mod rollback;
mod run;
mod secrets;
mod setup;

use std::path::PathBuf;

use jailwarden::config::Config;
use jailwarden::diagnostics::Diagnostics;
use jailwarden::output::Output;

pub use deploy::deploy;
pub use logs::logs;
pub use rollback::rollback;
pub use run::run;
pub use secrets::secrets;
pub use setup::setup;

/// A loaded configuration plus the global flags that shape a remote command.
pub struct Invocation {
    pub config: Config,
    /// Directory the release build runs in.
    pub workdir: PathBuf,
    /// Echo remote output live.
    pub verbose: bool,
}

/// Print every collected warning.
fn emit_warnings(output: &Output, diag: &Diagnostics) {
    for warning in diag.warnings() {
        output.warning(&warning.message);
    }
}
