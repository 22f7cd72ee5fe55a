// ABOUTME: Application-wide error types for jailwarden.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::jail::JailError;
use crate::pipeline::PipelineFailure;
use crate::secrets::SecretsError;
use crate::ssh;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline step failed; completed steps have been rolled back.
    #[error("step '{step}' failed: {source}")]
    StepFailed { step: String, source: DeployError },

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Ssh(#[from] ssh::Error),

    #[error(transparent)]
    Jail(#[from] JailError),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error("no running unit for {0}; deploy first")]
    NoActiveUnit(String),

    #[error("command exited with status {0}")]
    RemoteExit(i32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<PipelineFailure<DeployError>> for Error {
    fn from(failure: PipelineFailure<DeployError>) -> Self {
        Error::StepFailed {
            step: failure.step,
            source: failure.error,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
