// ABOUTME: The Transport seam: everything the orchestrator does to a remote host.
// ABOUTME: Implemented by the SSH session and by simulated hosts in tests.

use super::error::{Error, Result, TIMEOUT_EXIT_CODE};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Default timeout for a single remote command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for builds, package installs and other slow commands.
pub const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Captured result of a remote command. Stdout and stderr are interleaved in
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Output of a command that exceeded its timeout.
    pub fn timed_out(partial: impl Into<String>) -> Self {
        Self::new(TIMEOUT_EXIT_CODE, partial)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Receives remote output as it arrives.
pub trait OutputObserver: Send + Sync {
    fn on_output(&self, chunk: &[u8]);
}

/// Remote execution channel to one host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command to completion. A timeout yields exit code `-1`; only
    /// channel-level failures are errors.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Pipe `reader` into `remote_path` in fixed-size chunks.
    async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> Result<u64>;

    /// Run a command and forward its output to `observer` until the channel
    /// closes. Nothing is buffered. Returns the exit code if one was sent.
    async fn run_streaming(
        &self,
        command: &str,
        observer: &dyn OutputObserver,
    ) -> Result<Option<i32>>;

    /// Like `run`, but any non-zero exit becomes an error.
    async fn run_checked(&self, command: &str, timeout: Duration) -> Result<String> {
        let out = self.run(command, timeout).await?;
        if out.success() {
            Ok(out.output)
        } else {
            Err(Error::command_failed(command, out.exit_code, &out.output))
        }
    }

    /// Transfer a local file to `remote_path`.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let mut file = tokio::fs::File::open(local_path).await?;
        self.upload_reader(&mut file, remote_path).await
    }

    /// Write `contents` to `remote_path`.
    async fn write_file(&self, remote_path: &str, contents: &[u8]) -> Result<u64> {
        let mut reader = contents;
        self.upload_reader(&mut reader, remote_path).await
    }

    /// Check whether a path exists on the remote host.
    async fn path_exists(&self, path: &str) -> Result<bool> {
        let out = self
            .run(
                &format!("test -e {} && echo exists", super::shell_quote(path)),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        Ok(out.success() && out.output.trim() == "exists")
    }
}
