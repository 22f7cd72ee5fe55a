// ABOUTME: Host key verification and client identity selection for the jail host session.
// ABOUTME: Checks known_hosts with optional first-connection trust; signs with the agent or a key file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use tokio::net::UnixStream;

use super::error::{Error, Result};

/// Key files tried under `~/.ssh` when neither a key path nor an agent is available.
const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Decides whether the jail host's key is acceptable.
pub(crate) struct HostKeyPolicy {
    pub host: String,
    pub port: u16,
    pub trust_first_connection: bool,
    /// `~/.ssh/known_hosts` when unset.
    pub known_hosts: Option<PathBuf>,
}

impl HostKeyPolicy {
    fn lookup(&self, key: &ssh_key::PublicKey) -> std::result::Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        }
    }

    fn remember(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!(host = %self.host, error = %e, "could not record host key");
        }
    }

    fn accepts(&self, key: &ssh_key::PublicKey) -> bool {
        match self.lookup(key) {
            Ok(true) => true,
            Err(russh::keys::Error::KeyChanged { line }) => {
                tracing::error!(host = %self.host, port = self.port, line, "host key changed");
                false
            }
            // Unknown host, or no readable known_hosts yet.
            Ok(false) | Err(_) if self.trust_first_connection => {
                tracing::warn!(host = %self.host, port = self.port, "trusting unknown host key on first connection");
                self.remember(key);
                true
            }
            Ok(false) | Err(_) => {
                tracing::warn!(host = %self.host, port = self.port, "unknown host key rejected");
                false
            }
        }
    }
}

impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.accepts(server_public_key))
    }
}

/// Credential used to authenticate as the configured user.
pub(crate) enum Identity {
    Agent(AgentClient<UnixStream>),
    Key(Arc<ssh_key::PrivateKey>),
}

impl Identity {
    /// An explicit key wins; otherwise the agent, then the first loadable default key.
    pub(crate) async fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return load_key(path).map(Identity::Key);
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            tracing::debug!("using ssh agent");
            return Ok(Identity::Agent(agent));
        }

        let home = std::env::var_os("HOME").ok_or_else(|| {
            Error::AgentUnavailable("no agent socket and HOME is not set".to_string())
        })?;
        let ssh_dir = Path::new(&home).join(".ssh");

        DEFAULT_KEY_FILES
            .iter()
            .map(|name| ssh_dir.join(name))
            .find_map(|path| load_key(&path).ok())
            .map(Identity::Key)
            .ok_or_else(|| {
                Error::AgentUnavailable(format!(
                    "no agent socket and no usable key in {}",
                    ssh_dir.display()
                ))
            })
    }

    pub(crate) async fn authenticate(
        self,
        handle: &mut Handle<HostKeyPolicy>,
        user: &str,
    ) -> Result<()> {
        let accepted = match self {
            Identity::Agent(mut agent) => {
                let identities = agent.request_identities().await.map_err(|e| {
                    Error::AgentUnavailable(format!("cannot list agent identities: {e}"))
                })?;
                if identities.is_empty() {
                    return Err(Error::AgentUnavailable("agent holds no identities".to_string()));
                }

                let mut accepted = false;
                for public in identities {
                    let result = handle
                        .authenticate_publickey_with(user, public, None, &mut agent)
                        .await;
                    if result.is_ok_and(|r| r.success()) {
                        accepted = true;
                        break;
                    }
                }
                accepted
            }
            Identity::Key(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await?
                    .success()
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed)
        }
    }
}

fn load_key(path: &Path) -> Result<Arc<ssh_key::PrivateKey>> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| Error::KeyLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
