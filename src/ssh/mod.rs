// ABOUTME: SSH transport for remote hosts.
// ABOUTME: Command execution, output streaming and chunked uploads over one session.

mod auth;
mod client;
mod error;
mod shell;
mod transfer;
mod transport;

pub use client::{Session, SessionConfig};
pub use error::{ConnectFailure, Error, OUTPUT_EXCERPT_LIMIT, Result, TIMEOUT_EXIT_CODE, excerpt};
pub use shell::{env_assignments, shell_quote};
pub use transfer::{CHUNK_SIZE, ChunkSink, stream_chunks};
pub use transport::{
    CommandOutput, DEFAULT_COMMAND_TIMEOUT, LONG_COMMAND_TIMEOUT, OutputObserver, Transport,
};
