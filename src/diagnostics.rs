// ABOUTME: Diagnostics accumulator for non-fatal warnings during a run.
// ABOUTME: Collects warnings that shouldn't fail a deploy but should be shown to users.

use parking_lot::Mutex;

use crate::pipeline::PipelineObserver;

/// Collects non-fatal warnings. Shared by reference with pipeline observers.
#[derive(Default)]
pub struct Diagnostics {
    warnings: Mutex<Vec<Warning>>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.lock().push(warning);
    }

    /// Snapshot of all collected warnings.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().clone()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.lock().is_empty()
    }
}

impl PipelineObserver for Diagnostics {
    fn rollback_failed(&self, step: &str, reason: &str) {
        self.warn(Warning::rollback_failed(step, reason));
    }
}

/// A non-fatal warning collected during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn lock_release(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LockRelease,
            message: message.into(),
        }
    }

    pub fn ssh_disconnect(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SshDisconnect,
            message: message.into(),
        }
    }

    /// A compensating action failed; the host may need manual cleanup.
    pub fn rollback_failed(step: &str, reason: &str) -> Self {
        Self {
            kind: WarningKind::RollbackStep,
            message: format!("rollback of '{}' failed: {}", step, reason),
        }
    }
}

/// Categories of warnings that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Failed to release deploy lock (lock file may remain).
    LockRelease,
    /// Failed to cleanly disconnect SSH session.
    SshDisconnect,
    /// A rollback step errored or panicked.
    RollbackStep,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let diag = Diagnostics::default();

        diag.warn(Warning::lock_release("failed to remove lock file"));
        diag.warn(Warning::ssh_disconnect("connection reset"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn rollback_failures_reported_by_observer_hook() {
        let diag = Diagnostics::default();
        diag.rollback_failed("create unit", "rm: permission denied");

        let warnings = diag.warnings();
        assert_eq!(warnings[0].kind, WarningKind::RollbackStep);
        assert!(warnings[0].message.contains("create unit"));
    }
}
