// ABOUTME: SSH transport error types.
// ABOUTME: Classifies connection failures and carries bounded command output excerpts.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code reported for a command that exceeded its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Maximum number of output bytes kept in a command error.
pub const OUTPUT_EXCERPT_LIMIT: usize = 500;

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    Timeout,
    HostNotFound,
    Other(String),
}

impl ConnectFailure {
    /// Classify an I/O error raised while opening the TCP connection.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
            io::ErrorKind::TimedOut => ConnectFailure::Timeout,
            _ => Self::classify_message(&err.to_string()),
        }
    }

    /// Classify from an error message when no structured kind is available.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("connection refused") {
            ConnectFailure::Refused
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ConnectFailure::Timeout
        } else if lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("nodename nor servname")
            || lower.contains("no such host")
        {
            ConnectFailure::HostNotFound
        } else {
            ConnectFailure::Other(message.to_string())
        }
    }

    /// Operator-facing hint for this failure.
    pub fn hint(&self) -> &'static str {
        match self {
            ConnectFailure::Refused => "is sshd running and listening on that port?",
            ConnectFailure::Timeout => "check the address, firewall rules and that the host is up",
            ConnectFailure::HostNotFound => "the hostname could not be resolved; check DNS or the server setting",
            ConnectFailure::Other(_) => "check the server setting and your network connection",
        }
    }
}

impl std::fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectFailure::Refused => write!(f, "connection refused"),
            ConnectFailure::Timeout => write!(f, "connection timed out"),
            ConnectFailure::HostNotFound => write!(f, "host not found"),
            ConnectFailure::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to {host}:{port}: {failure} ({})", failure.hint())]
    Connection {
        host: String,
        port: u16,
        failure: ConnectFailure,
    },

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error(
        "host key for {host}:{port} is not trusted (unknown or changed; see known_hosts or trust_first_connection)"
    )]
    HostKeyRejected { host: String, port: u16 },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {}: {reason}", path.display())]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("failed to open channel: {0}")]
    Channel(String),

    #[error("{}", describe_command_failure(command, *exit_code, output))]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("upload to {remote} failed: {reason}")]
    UploadFailed { remote: String, reason: String },

    #[error("upload to {remote} not acknowledged within {timeout:?}")]
    UploadTimeout { remote: String, timeout: Duration },

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a command failure, keeping only a bounded excerpt of the output.
    pub fn command_failed(command: &str, exit_code: i32, output: &str) -> Self {
        Error::CommandFailed {
            command: command.to_string(),
            exit_code,
            output: excerpt(output, OUTPUT_EXCERPT_LIMIT),
        }
    }

    /// Whether this error is a command that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CommandFailed { exit_code, .. } if *exit_code == TIMEOUT_EXIT_CODE)
    }
}

fn describe_command_failure(command: &str, exit_code: i32, output: &str) -> String {
    let status = if exit_code == TIMEOUT_EXIT_CODE {
        "timed out (the remote process may still be running)".to_string()
    } else {
        format!("exited with code {exit_code}")
    };
    if output.trim().is_empty() {
        format!("command `{command}` {status}")
    } else {
        format!("command `{command}` {status}: {}", output.trim_end())
    }
}

/// Truncate `output` to at most `limit` bytes on a char boundary.
pub fn excerpt(output: &str, limit: usize) -> String {
    if output.len() <= limit {
        return output.to_string();
    }
    let mut end = limit;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &output[..end])
}

pub type Result<T> = std::result::Result<T, Error>;
