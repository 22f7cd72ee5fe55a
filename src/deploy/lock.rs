// ABOUTME: Deploy lock preventing concurrent runs against the same application on a host.
// ABOUTME: Atomic file creation with lock info stored in ~/.local/state/jailwarden/ on the host.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, Warning};
use crate::ssh::{DEFAULT_COMMAND_TIMEOUT, Transport};
use crate::types::AppName;

use super::DeployError;

/// Base directory for state files on the host (XDG Base Directory compliant).
const STATE_DIR: &str = ".local/state/jailwarden";

/// Locks older than this are broken automatically.
const STALE_AFTER_HOURS: i64 = 1;

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Application being deployed.
    pub app: String,
}

impl LockInfo {
    /// Lock info for the current process.
    pub fn new(app: &AppName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            app: app.to_string(),
        }
    }

    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= STALE_AFTER_HOURS
    }

    /// Path to the lock file. Uses $HOME so the remote shell expands it.
    pub fn lock_path(app: &AppName) -> String {
        format!("$HOME/{}/{}.lock", STATE_DIR, app)
    }
}

/// A held deploy lock. Call `release` when done; `with_lock` does so on every path.
pub struct DeployLock<'a> {
    transport: &'a dyn Transport,
    app: AppName,
}

impl std::fmt::Debug for DeployLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock").field("app", &self.app).finish()
    }
}

impl<'a> DeployLock<'a> {
    /// Acquire the lock for `app`.
    ///
    /// Shell noclobber makes creation atomic. A stale, unreadable or (with
    /// `force`) live lock is broken and acquisition retried once.
    pub async fn acquire(
        transport: &'a dyn Transport,
        app: &AppName,
        force: bool,
    ) -> Result<Self, DeployError> {
        let lock_path = LockInfo::lock_path(app);

        Self::ensure_state_dir(transport).await?;

        let lock_info = LockInfo::new(app);
        let lock_json = serde_json::to_string(&lock_info)
            .map_err(|e| DeployError::lock_error(format!("failed to serialize lock: {}", e)))?;
        let escaped_json = lock_json.replace('\'', "'\\''");

        // set -C makes > fail if the file already exists.
        let acquire_cmd = format!(
            "(set -C; echo '{}' > \"{}\") 2>/dev/null",
            escaped_json, lock_path
        );

        if Self::try_create(transport, &acquire_cmd).await? {
            tracing::debug!(app = %app, "deploy lock acquired");
            return Ok(Self {
                transport,
                app: app.clone(),
            });
        }

        match Self::read_existing(transport, &lock_path).await? {
            Some(existing) if !force && !existing.is_stale() => {
                return Err(DeployError::lock_held(
                    existing.holder,
                    existing.pid,
                    existing.started_at,
                ));
            }
            Some(existing) if force => {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
            }
            Some(existing) => {
                tracing::warn!(
                    "Auto-breaking stale lock held by {} (pid {}) since {}",
                    existing.holder,
                    existing.pid,
                    existing.started_at
                );
            }
            None => tracing::warn!("Lock info unreadable, breaking lock"),
        }

        Self::remove(transport, &lock_path).await?;

        if !Self::try_create(transport, &acquire_cmd).await? {
            return Err(DeployError::lock_error(
                "lock acquired by another process during break",
            ));
        }

        Ok(Self {
            transport,
            app: app.clone(),
        })
    }

    /// Run `work` while holding the lock, releasing it whatever the outcome.
    pub async fn with_lock<F, T, E>(
        transport: &'a dyn Transport,
        app: &AppName,
        force: bool,
        diagnostics: &Diagnostics,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<DeployError>,
    {
        let lock = Self::acquire(transport, app, force).await?;
        let result = work.await;
        if let Err(e) = lock.release().await {
            diagnostics.warn(Warning::lock_release(format!(
                "failed to release deploy lock: {}",
                e
            )));
        }
        result
    }

    pub async fn release(self) -> Result<(), DeployError> {
        Self::remove(self.transport, &LockInfo::lock_path(&self.app)).await?;
        tracing::debug!(app = %self.app, "deploy lock released");
        Ok(())
    }

    async fn try_create(transport: &dyn Transport, acquire_cmd: &str) -> Result<bool, DeployError> {
        transport
            .run(acquire_cmd, lock_timeout())
            .await
            .map(|out| out.success())
            .map_err(|e| DeployError::lock_error(format!("failed to acquire lock: {}", e)))
    }

    async fn ensure_state_dir(transport: &dyn Transport) -> Result<(), DeployError> {
        transport
            .run_checked(&format!("mkdir -p \"$HOME/{}\"", STATE_DIR), lock_timeout())
            .await
            .map(|_| ())
            .map_err(|e| {
                DeployError::lock_error(format!("failed to create state directory: {}", e))
            })
    }

    /// Current lock holder, `None` if the file is missing or corrupted.
    async fn read_existing(
        transport: &dyn Transport,
        lock_path: &str,
    ) -> Result<Option<LockInfo>, DeployError> {
        let out = transport
            .run(&format!("cat \"{}\"", lock_path), lock_timeout())
            .await
            .map_err(|e| DeployError::lock_error(format!("failed to read lock info: {}", e)))?;

        if !out.success() {
            return Ok(None);
        }
        Ok(serde_json::from_str::<LockInfo>(out.output.trim()).ok())
    }

    async fn remove(transport: &dyn Transport, lock_path: &str) -> Result<(), DeployError> {
        transport
            .run_checked(&format!("rm -f \"{}\"", lock_path), lock_timeout())
            .await
            .map(|_| ())
            .map_err(|e| DeployError::lock_error(format!("failed to remove lock: {}", e)))
    }
}

fn lock_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}
