// ABOUTME: Entry point for the jailwarden CLI application.
// ABOUTME: Parses arguments, loads configuration and dispatches to command handlers.

mod cli;
mod commands;

use std::env;
use std::path::{Path, PathBuf};

use clap::Parser;
use cli::{Cli, Commands};
use commands::Invocation;
use jailwarden::config::{self, Config, DEFAULT_SECRETS_PATH, project_root};
use jailwarden::error::{Error, Result};
use jailwarden::output::{Output, OutputMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = output_mode(&cli);

    if let Err(e) = run(cli, Output::new(mode)).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    }
}

async fn run(cli: Cli, output: Output) -> Result<()> {
    let cwd = env::current_dir()?;
    let target = Target {
        config: cli.config,
        destination: cli.destination,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Init { app, server, force } => {
            let path = config::init_config(&cwd, app.as_deref(), server.as_deref(), force)?;
            output.success(&format!("Created {}", path.display()));
            Ok(())
        }
        Commands::Secrets { action } => {
            commands::secrets(&target.secrets_path(&cwd)?, action, output).await
        }
        Commands::Setup => commands::setup(target.invocation(&cwd)?, output).await,
        Commands::Deploy { force } => {
            commands::deploy(target.invocation(&cwd)?, force, output).await
        }
        Commands::Rollback { force } => {
            commands::rollback(target.invocation(&cwd)?, force, output).await
        }
        Commands::Run { command } => {
            commands::run(target.invocation(&cwd)?, command, output).await
        }
        Commands::Logs(args) => commands::logs(target.invocation(&cwd)?, args, output).await,
    }
}

/// Global flags that select what a command operates on.
struct Target {
    config: Option<PathBuf>,
    destination: Option<String>,
    verbose: bool,
}

impl Target {
    fn config(&self, cwd: &Path) -> Result<(Config, PathBuf)> {
        let (config, workdir) = load_config(self.config.as_deref(), cwd)?;
        let config = match self.destination.as_deref() {
            Some(dest) => config.for_destination(dest)?,
            None => config,
        };
        Ok((config, workdir))
    }

    fn invocation(&self, cwd: &Path) -> Result<Invocation> {
        let (config, workdir) = self.config(cwd)?;
        Ok(Invocation {
            config,
            workdir,
            verbose: self.verbose,
        })
    }

    /// Secrets file of the selected destination, or the default path when no config exists yet.
    fn secrets_path(&self, cwd: &Path) -> Result<PathBuf> {
        match self.config(cwd) {
            Ok((config, _)) => Ok(config.secrets),
            Err(Error::ConfigNotFound(_)) if self.config.is_none() => {
                Ok(cwd.join(DEFAULT_SECRETS_PATH))
            }
            Err(e) => Err(e),
        }
    }
}

/// Load the config named with `-c`, or discover one in `cwd`.
///
/// The project root of the config is the working directory for the release build.
fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<(Config, PathBuf)> {
    let path = match explicit {
        Some(path) if !path.exists() => return Err(Error::ConfigNotFound(path.to_path_buf())),
        Some(path) => path.to_path_buf(),
        None => Config::locate(cwd)?,
    };
    let workdir = match project_root(&path) {
        root if root.is_absolute() => root,
        root => cwd.join(root),
    };
    Ok((Config::load(&path)?, workdir))
}
