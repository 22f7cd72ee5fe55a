// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates jailwarden.yml template files.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::AppName;

use super::{CONFIG_FILENAME, Config};

/// Write a starter config into `dir`, returning its path.
pub fn init_config(
    dir: &Path,
    app: Option<&str>,
    server: Option<&str>,
    force: bool,
) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template()?;

    if let Some(a) = app {
        config.app = AppName::new(a).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    if let Some(s) = server {
        config.server = super::ServerConfig::parse(s).map_err(Error::InvalidConfig)?;
    }

    std::fs::write(&config_path, generate_template_yaml(&config))?;

    Ok(config_path)
}

fn generate_template_yaml(config: &Config) -> String {
    let server = &config.server;
    format!(
        r#"app: {app}
server:
  host: {host}
  port: {ssh_port}
  user: {user}
  # Accept and record an unknown host key on first connection
  trust_first_connection: {tofu}

# Port the application listens on inside its jail
port: {port}

release:
  archive: {archive}
  # build: make release
  start: {start}

jail:
  root: {root}
  release: {release}
  interface: {interface}
  network:
    blue: {blue}
    green: {green}
    prefix_len: {prefix}

healthcheck:
  path: {hc_path}
  attempts: {attempts}
  interval: 2s

proxy:
  # domain: app.example.com
  config_path: {proxy_path}

env:
  RUST_LOG: info
  # DATABASE_PASSWORD:
  #   env: DATABASE_PASSWORD

# Encrypted KEY=VALUE file merged over env; `jailwarden secrets init` creates it and its key
secrets: {secrets}

# database:
#   package: postgresql16-server
#   migrate: bin/migrate
"#,
        app = config.app,
        host = server.host,
        ssh_port = server.port,
        user = server.user(),
        tofu = server.trust_first_connection,
        port = config.port,
        archive = config.release.archive.display(),
        start = config.release.start,
        root = config.jail.root,
        release = config.jail.release,
        interface = config.jail.interface,
        blue = config.jail.network.blue,
        green = config.jail.network.green,
        prefix = config.jail.network.prefix_len,
        hc_path = config.healthcheck.path,
        attempts = config.healthcheck.attempts,
        proxy_path = config.proxy.config_path,
        secrets = config.secrets.display(),
    )
}
