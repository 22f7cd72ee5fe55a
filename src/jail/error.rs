// ABOUTME: Jail-layer error types with the SNAFU pattern.
// ABOUTME: Wraps transport failures with the unit and action they interrupted.

use snafu::Snafu;

use super::slot::Slot;
use crate::ssh;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JailError {
    #[snafu(display("failed to list running units: {source}"))]
    ListRunning { source: ssh::Error },

    #[snafu(display("failed to {action} unit {unit}: {source}"))]
    Remote {
        action: &'static str,
        unit: String,
        source: ssh::Error,
    },

    #[snafu(display("no running unit found for {app}"))]
    NoActiveUnit { app: String },

    #[snafu(display("both slots of {app} are running; resolve manually before rolling back"))]
    BothRunning { app: String },

    #[snafu(display("no previous deployment of {app} to roll back to ({slot} slot is absent)"))]
    NoPreviousDeployment { app: String, slot: Slot },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailErrorKind {
    Transport,
    NoActiveUnit,
    BothRunning,
    NoPreviousDeployment,
}

impl JailError {
    pub fn kind(&self) -> JailErrorKind {
        match self {
            JailError::ListRunning { .. } | JailError::Remote { .. } => JailErrorKind::Transport,
            JailError::NoActiveUnit { .. } => JailErrorKind::NoActiveUnit,
            JailError::BothRunning { .. } => JailErrorKind::BothRunning,
            JailError::NoPreviousDeployment { .. } => JailErrorKind::NoPreviousDeployment,
        }
    }
}
