// ABOUTME: Local release preparation: optional build command and archive checks.
// ABOUTME: Produces the artifact that the deploy pipeline uploads into a unit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::ReleaseConfig;
use crate::jail::Slot;
use crate::ssh::{OUTPUT_EXCERPT_LIMIT, excerpt};

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("failed to run build command `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("build command `{command}` failed ({status}): {output}")]
    BuildFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("build command `{command}` did not finish within {}s", .timeout.as_secs())]
    BuildTimeout { command: String, timeout: Duration },

    #[error("release archive not found: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("release archive is empty: {}", .0.display())]
    ArchiveEmpty(PathBuf),
}

/// A local archive ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    pub archive: PathBuf,
    pub size: u64,
}

/// Where the archive for `slot` is staged on the host before extraction.
pub fn remote_archive_path(app: &str, slot: Slot) -> String {
    format!("/tmp/{}-{}.tar.gz", app, slot)
}

/// Run the configured build command, if any, then check the archive.
pub async fn prepare(
    config: &ReleaseConfig,
    workdir: &Path,
    timeout: Duration,
) -> Result<ReleaseArtifact, ReleaseError> {
    if let Some(command) = &config.build {
        run_build(command, workdir, timeout).await?;
    }
    locate_archive(&config.archive).await
}

async fn run_build(command: &str, workdir: &Path, timeout: Duration) -> Result<(), ReleaseError> {
    tracing::info!(command, "building release");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ReleaseError::BuildTimeout {
            command: command.to_string(),
            timeout,
        })?
        .map_err(|source| ReleaseError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(ReleaseError::BuildFailed {
            command: command.to_string(),
            status: output.status.to_string(),
            output: excerpt(combined.trim(), OUTPUT_EXCERPT_LIMIT),
        });
    }

    tracing::debug!(command, "release build finished");
    Ok(())
}

async fn locate_archive(archive: &Path) -> Result<ReleaseArtifact, ReleaseError> {
    let metadata = tokio::fs::metadata(archive)
        .await
        .map_err(|_| ReleaseError::ArchiveMissing(archive.to_path_buf()))?;

    if !metadata.is_file() {
        return Err(ReleaseError::ArchiveMissing(archive.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(ReleaseError::ArchiveEmpty(archive.to_path_buf()));
    }

    Ok(ReleaseArtifact {
        archive: archive.to_path_buf(),
        size: metadata.len(),
    })
}
