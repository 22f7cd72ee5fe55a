// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jailwarden")]
#[command(about = "Agentless blue/green deploys into FreeBSD jails over SSH")]
#[command(version)]
pub struct Cli {
    /// Path to the config file (defaults to jailwarden.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Target destination (defined in config)
    #[arg(short, long, global = true)]
    pub destination: Option<String>,

    /// Debug logging and live remote output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new jailwarden.yml configuration file
    Init {
        /// Application name
        #[arg(long)]
        app: Option<String>,

        /// Server as [user@]host[:port]
        #[arg(long)]
        server: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Prepare the host: directories, base template, network, proxy, database
    Setup,

    /// Deploy a new release into the idle slot
    Deploy {
        /// Break an existing deploy lock
        #[arg(long)]
        force: bool,
    },

    /// Switch traffic back to the previously active slot
    Rollback {
        /// Break an existing deploy lock
        #[arg(long)]
        force: bool,
    },

    /// Run a command inside the active unit with the application environment
    Run {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show the application log of the active unit
    Logs(LogsArgs),

    /// Manage the local secrets file
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
}

#[derive(Args)]
pub struct LogsArgs {
    /// Keep streaming new lines until interrupted
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show
    #[arg(short = 'n', long, default_value_t = 100)]
    pub lines: u32,
}

#[derive(Subcommand)]
pub enum SecretsAction {
    /// Create an empty secrets file readable only by you
    Init,
    /// Open the secrets file in $EDITOR
    Edit,
}
