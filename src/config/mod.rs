// ABOUTME: Configuration types and parsing for jailwarden.yml.
// ABOUTME: Handles YAML parsing, env var interpolation, validation and destination merging.

mod deserialize;
mod env_value;
mod healthcheck;
mod init;
mod jail;
mod server;

pub use env_value::{EnvValue, is_env_name, resolve_env_map, validate_env_names};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use jail::JailConfig;
pub use server::{DEFAULT_SSH_USER, ServerConfig};

use crate::error::{Error, Result};
use crate::jail::SlotManager;
use crate::ssh::{DEFAULT_COMMAND_TIMEOUT, LONG_COMMAND_TIMEOUT};
use crate::types::AppName;
use deserialize::{deserialize_app_name, deserialize_server, deserialize_server_option};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "jailwarden.yml";
pub const CONFIG_FILENAME_ALT: &str = "jailwarden.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".jailwarden/config.yml";
pub const DEFAULT_SECRETS_PATH: &str = ".jailwarden/secrets.env";

const PROJECT_DIR: &str = ".jailwarden";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_app_name")]
    pub app: AppName,

    #[serde(deserialize_with = "deserialize_server")]
    pub server: ServerConfig,

    /// Port the application listens on inside its unit.
    #[serde(default = "default_app_port")]
    pub port: u16,

    pub release: ReleaseConfig,

    #[serde(default)]
    pub jail: JailConfig,

    #[serde(default)]
    pub healthcheck: HealthcheckConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default = "default_secrets_path")]
    pub secrets: PathBuf,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub destinations: HashMap<String, Destination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseConfig {
    /// Local `.tar.gz` extracted into the unit's payload directory.
    pub archive: PathBuf,

    /// Local command producing the archive, run before upload.
    #[serde(default)]
    pub build: Option<String>,

    /// Command launched inside the unit from the payload directory.
    pub start: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    /// Site address for the Caddyfile; plain `:80` when unset.
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default = "default_proxy_config_path")]
    pub config_path: String,

    #[serde(default = "default_proxy_reload")]
    pub reload: String,

    #[serde(default = "default_proxy_package")]
    pub package: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            domain: None,
            config_path: default_proxy_config_path(),
            reload: default_proxy_reload(),
            package: default_proxy_package(),
        }
    }
}

/// Database accessory provisioned in its own jail by `setup`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_address")]
    pub address: Ipv4Addr,

    #[serde(default = "default_database_package")]
    pub package: String,

    /// Database name; the application name when unset.
    #[serde(default)]
    pub name: Option<String>,

    /// Database role; the application name when unset.
    #[serde(default)]
    pub user: Option<String>,

    /// Migration command run inside the new unit before the application starts.
    #[serde(default)]
    pub migrate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command: Duration,

    /// Used for builds, package installs, template downloads and migrations.
    #[serde(default = "default_long_timeout", with = "humantime_serde")]
    pub long: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command: default_command_timeout(),
            long: default_long_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Destination {
    #[serde(default, deserialize_with = "deserialize_server_option")]
    pub server: Option<ServerConfig>,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub secrets: Option<PathBuf>,
}

fn default_app_port() -> u16 {
    4000
}

/// Directory that relative paths in the config file are resolved against.
///
/// A config inside `.jailwarden/` belongs to the directory above it.
pub fn project_root(config_path: &Path) -> PathBuf {
    let parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    match parent.file_name() {
        Some(name) if name == PROJECT_DIR => parent
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from(DEFAULT_SECRETS_PATH)
}

fn default_proxy_config_path() -> String {
    "/usr/local/etc/caddy/Caddyfile".to_string()
}

fn default_proxy_reload() -> String {
    "service caddy reload".to_string()
}

fn default_proxy_package() -> String {
    "caddy".to_string()
}

fn default_database_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 10)
}

fn default_database_package() -> String {
    "postgresql16-server".to_string()
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

fn default_long_timeout() -> Duration {
    LONG_COMMAND_TIMEOUT
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.anchor_paths(&project_root(path));
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        Self::load(&Self::locate(dir)?)
    }

    /// First existing config file among the recognised names in `dir`.
    pub fn locate(dir: &Path) -> Result<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .ok_or_else(|| Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.jail.network.validate().map_err(Error::InvalidConfig)?;

        if self.release.start.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "release.start must name the command that launches the application".to_string(),
            ));
        }

        validate_env_names(&self.env)?;

        if self.port == 0 {
            return Err(Error::InvalidConfig("port must be non-zero".to_string()));
        }

        if let Some(db) = &self.database {
            let network = &self.jail.network;
            if db.address == network.blue || db.address == network.green {
                return Err(Error::InvalidConfig(format!(
                    "database address {} collides with a slot address",
                    db.address
                )));
            }
        }

        if self.healthcheck.attempts == 0 {
            return Err(Error::InvalidConfig(
                "healthcheck.attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn for_destination(&self, name: &str) -> Result<Config> {
        let dest = self
            .destinations
            .get(name)
            .ok_or_else(|| Error::UnknownDestination(name.to_string()))?;

        let mut merged = self.clone();

        if let Some(server) = &dest.server {
            merged.server = server.clone();
        }

        for (k, v) in &dest.env {
            merged.env.insert(k.clone(), v.clone());
        }

        if let Some(port) = dest.port {
            merged.port = port;
        }

        if let Some(healthcheck) = &dest.healthcheck {
            merged.healthcheck = healthcheck.clone();
        }

        if let Some(proxy) = &dest.proxy {
            merged.proxy = proxy.clone();
        }

        if let Some(secrets) = &dest.secrets {
            merged.secrets = secrets.clone();
        }

        merged.validate()?;
        Ok(merged)
    }

    pub fn slot_manager(&self) -> SlotManager {
        SlotManager::new(self.app.as_str(), self.jail.layout(), self.jail.network)
            .with_command_timeout(self.timeouts.command)
    }

    /// Resolve relative local paths against the directory holding the config file.
    fn anchor_paths(&mut self, base: &Path) {
        if self.release.archive.is_relative() {
            self.release.archive = base.join(&self.release.archive);
        }
        if self.secrets.is_relative() {
            self.secrets = base.join(&self.secrets);
        }
        for dest in self.destinations.values_mut() {
            if let Some(secrets) = dest.secrets.as_mut().filter(|p| p.is_relative()) {
                *secrets = base.join(&*secrets);
            }
        }
    }

    pub fn template() -> Result<Self> {
        let app = AppName::new("my-app").map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Config {
            app,
            server: ServerConfig {
                host: "jails.example.com".to_string(),
                port: 22,
                user: Some(DEFAULT_SSH_USER.to_string()),
                key_path: None,
                trust_first_connection: true,
            },
            port: default_app_port(),
            release: ReleaseConfig {
                archive: PathBuf::from("release.tar.gz"),
                build: None,
                start: "bin/server".to_string(),
            },
            jail: JailConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            proxy: ProxyConfig::default(),
            env: BTreeMap::new(),
            secrets: default_secrets_path(),
            database: None,
            timeouts: TimeoutConfig::default(),
            destinations: HashMap::new(),
        })
    }
}
