// ABOUTME: Error types for deploy, rollback and setup steps.
// ABOUTME: Each variant wraps the layer that failed so the operator sees the root cause.

use chrono::{DateTime, Utc};

use crate::accessories::AccessoryError;
use crate::health::HealthCheckError;
use crate::jail::JailError;
use crate::pipeline::ContextError;
use crate::release::ReleaseError;
use crate::secrets::SecretsError;
use crate::ssh;

/// Errors a pipeline step can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Jail(#[from] JailError),

    #[error(transparent)]
    Transport(#[from] ssh::Error),

    #[error(transparent)]
    HealthCheck(#[from] HealthCheckError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error(transparent)]
    Accessory(#[from] AccessoryError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Writing or reloading the proxy configuration failed.
    #[error("proxy update failed: {0}")]
    Proxy(#[source] ssh::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Another deploy holds the lock.
    #[error(
        "deploy lock held by {holder} (pid {pid}) since {started_at}; \
         pass --force to break it"
    )]
    LockHeld {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("deploy lock error: {0}")]
    Lock(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Unit,
    Transport,
    HealthCheck,
    Release,
    Secrets,
    Accessory,
    Proxy,
    Context,
    Config,
    Lock,
}

impl DeployError {
    pub fn lock_error(message: impl Into<String>) -> Self {
        DeployError::Lock(message.into())
    }

    pub fn lock_held(holder: String, pid: u32, started_at: DateTime<Utc>) -> Self {
        DeployError::LockHeld {
            holder,
            pid,
            started_at,
        }
    }

    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Jail(_) => DeployErrorKind::Unit,
            DeployError::Transport(_) => DeployErrorKind::Transport,
            DeployError::HealthCheck(_) => DeployErrorKind::HealthCheck,
            DeployError::Release(_) => DeployErrorKind::Release,
            DeployError::Secrets(_) => DeployErrorKind::Secrets,
            DeployError::Accessory(_) => DeployErrorKind::Accessory,
            DeployError::Proxy(_) => DeployErrorKind::Proxy,
            DeployError::Context(_) => DeployErrorKind::Context,
            DeployError::Config(_) => DeployErrorKind::Config,
            DeployError::LockHeld { .. } | DeployError::Lock(_) => DeployErrorKind::Lock,
        }
    }
}
