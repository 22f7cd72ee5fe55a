// ABOUTME: Server configuration for the SSH connection to the jail host.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use serde::Deserialize;
use std::path::PathBuf;

use crate::ssh::SessionConfig;

/// Jail management needs root on the host.
pub const DEFAULT_SSH_USER: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    /// Explicit private key; the agent and default key files are tried otherwise.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
}

fn default_port() -> u16 {
    22
}

fn default_trust_first_connection() -> bool {
    true
}

impl ServerConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(ServerConfig {
            host: host.to_string(),
            port,
            user: user_part.map(str::to_string),
            key_path: None,
            trust_first_connection: true,
        })
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_SSH_USER)
    }

    pub fn ssh_session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.host, self.user())
            .port(self.port)
            .trust_first_connection(self.trust_first_connection);
        if let Some(path) = &self.key_path {
            config = config.key_path(path);
        }
        config
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_short_forms() {
        let s = ServerConfig::parse("example.org").unwrap();
        assert_eq!((s.host.as_str(), s.port, s.user()), ("example.org", 22, "root"));

        let s = ServerConfig::parse("deploy@example.org:2222").unwrap();
        assert_eq!(s.host, "example.org");
        assert_eq!(s.port, 2222);
        assert_eq!(s.user(), "deploy");
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(ServerConfig::parse("").is_err());
        assert!(ServerConfig::parse("@host").is_err());
        assert!(ServerConfig::parse("host:ssh").is_err());
        assert!(ServerConfig::parse("user@:22").is_err());
    }

    #[test]
    fn session_config_carries_port_and_key() {
        let mut server = ServerConfig::parse("ops@jails.internal:2200").unwrap();
        server.key_path = Some(PathBuf::from("/keys/id_ed25519"));
        let session = server.ssh_session_config();
        assert_eq!(session.host, "jails.internal");
        assert_eq!(session.user, "ops");
        assert_eq!(session.port, 2200);
        assert_eq!(session.key_path, Some(PathBuf::from("/keys/id_ed25519")));
    }
}
