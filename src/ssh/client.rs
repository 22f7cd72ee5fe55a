// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, authentication, command execution, streaming and uploads.

use super::auth::{HostKeyPolicy, Identity};
use super::error::{ConnectFailure, Error, Result};
use super::shell_quote;
use super::transfer::{ChunkSink, stream_chunks};
use super::transport::{CommandOutput, OutputObserver, Transport};
use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;

/// How long an upload may wait for the remote receiver to exit after EOF.
const UPLOAD_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and as whom to open the session on the jail host.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Explicit private key; the agent and `~/.ssh` defaults are tried otherwise.
    pub key_path: Option<PathBuf>,
    /// Record and accept a host key not yet in known_hosts.
    pub trust_first_connection: bool,
    pub known_hosts_path: Option<PathBuf>,
    /// Bound on TCP connect plus key exchange.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            trust_first_connection: false,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(15),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_first_connection(mut self, trust: bool) -> Self {
        self.trust_first_connection = trust;
        self
    }
}

/// An open session to the jail host. Closed once, by [`Session::disconnect`].
pub struct Session {
    config: SessionConfig,
    handle: Handle<HostKeyPolicy>,
    observer: Option<Arc<dyn OutputObserver>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let identity = Identity::resolve(config.key_path.as_deref()).await?;

        let russh_config = Config {
            inactivity_timeout: Some(Duration::from_secs(120)),
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        let policy = HostKeyPolicy {
            host: config.host.clone(),
            port: config.port,
            trust_first_connection: config.trust_first_connection,
            known_hosts: config.known_hosts_path.clone(),
        };

        tracing::debug!(host = %config.host, port = config.port, user = %config.user, "connecting");

        let connecting = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            policy,
        );
        let mut handle = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(Self::connection_error(&config, &e)),
            Err(_) => {
                return Err(Error::Connection {
                    host: config.host.clone(),
                    port: config.port,
                    failure: ConnectFailure::Timeout,
                });
            }
        };

        identity.authenticate(&mut handle, &config.user).await?;
        tracing::info!(host = %config.host, user = %config.user, "session established");

        Ok(Self {
            config,
            handle,
            observer: None,
        })
    }

    /// Echo captured command output to `observer` as it arrives.
    pub fn with_observer(mut self, observer: Arc<dyn OutputObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    fn connection_error(config: &SessionConfig, err: &russh::Error) -> Error {
        let failure = match err {
            russh::Error::UnknownKey => {
                return Error::HostKeyRejected {
                    host: config.host.clone(),
                    port: config.port,
                };
            }
            russh::Error::IO(io) => ConnectFailure::classify(io),
            other => ConnectFailure::classify_message(&other.to_string()),
        };
        Error::Connection {
            host: config.host.clone(),
            port: config.port,
            failure,
        }
    }

    async fn open_exec(&self, command: &str) -> Result<Channel<Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Channel(format!("failed to exec command: {}", e)))?;

        Ok(channel)
    }

    fn observe(&self, data: &[u8]) {
        if let Some(observer) = &self.observer {
            observer.on_output(data);
        }
    }

    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        tracing::debug!(host = %self.config.host, "SSH disconnected");
        Ok(())
    }
}

fn exit_code_from(status: u32) -> i32 {
    i32::try_from(status).unwrap_or(i32::MAX)
}

#[async_trait]
impl Transport for Session {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        tracing::debug!(command = %command, ?timeout, "running remote command");

        let mut channel = self.open_exec(command).await?;
        let deadline = Instant::now() + timeout;

        let mut output = Vec::new();
        let mut exit_code = None;
        let mut got_eof = false;

        loop {
            let msg = match tokio::time::timeout_at(deadline, channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::warn!(command = %command, ?timeout, "remote command timed out");
                    let _ = channel.close().await;
                    return Ok(CommandOutput::timed_out(String::from_utf8_lossy(&output)));
                }
            };

            match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.observe(&data);
                    output.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_code_from(exit_status));
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        // No exit status means the channel died (connection loss, remote kill).
        let exit_code = exit_code.ok_or(Error::ChannelClosed)?;

        tracing::debug!(command = %command, exit_code, "remote command completed");

        Ok(CommandOutput::new(
            exit_code,
            String::from_utf8_lossy(&output).into_owned(),
        ))
    }

    async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        remote_path: &str,
    ) -> Result<u64> {
        let command = format!("cat > {}", shell_quote(remote_path));
        let channel = self.open_exec(&command).await?;

        let mut sink = ChannelSink {
            channel,
            remote: remote_path.to_string(),
        };
        let sent = stream_chunks(reader, &mut sink).await?;

        let mut channel = sink.channel;
        channel.eof().await.map_err(|e| Error::UploadFailed {
            remote: remote_path.to_string(),
            reason: format!("failed to signal end of input: {}", e),
        })?;

        let deadline = Instant::now() + UPLOAD_COMPLETION_TIMEOUT;
        let mut receiver_output = Vec::new();
        let exit_code = loop {
            match tokio::time::timeout_at(deadline, channel.wait()).await {
                Err(_) => {
                    return Err(Error::UploadTimeout {
                        remote: remote_path.to_string(),
                        timeout: UPLOAD_COMPLETION_TIMEOUT,
                    });
                }
                Ok(Some(ChannelMsg::ExitStatus { exit_status })) => {
                    break exit_code_from(exit_status);
                }
                Ok(Some(ChannelMsg::Data { data }))
                | Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    receiver_output.extend_from_slice(&data);
                }
                Ok(Some(ChannelMsg::Close)) | Ok(None) => return Err(Error::ChannelClosed),
                Ok(Some(_)) => {}
            }
        };

        if exit_code != 0 {
            return Err(Error::UploadFailed {
                remote: remote_path.to_string(),
                reason: format!(
                    "receiver exited with code {}: {}",
                    exit_code,
                    String::from_utf8_lossy(&receiver_output).trim()
                ),
            });
        }

        tracing::debug!(remote = %remote_path, bytes = sent, "upload complete");
        Ok(sent)
    }

    async fn run_streaming(
        &self,
        command: &str,
        observer: &dyn OutputObserver,
    ) -> Result<Option<i32>> {
        tracing::debug!(command = %command, "streaming remote command");

        let mut channel = self.open_exec(command).await?;
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                    observer.on_output(&data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_code_from(exit_status));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(exit_code)
    }
}

/// Writes upload chunks into an exec channel running the remote receiver.
struct ChannelSink {
    channel: Channel<Msg>,
    remote: String,
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.channel
            .data(chunk)
            .await
            .map_err(|e| Error::UploadFailed {
                remote: self.remote.clone(),
                reason: e.to_string(),
            })
    }
}
