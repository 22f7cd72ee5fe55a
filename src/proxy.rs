// ABOUTME: Reverse proxy collaborator: renders, reads back, writes and reloads the Caddyfile.
// ABOUTME: The rendered site points at the private address of whichever slot is active.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::jail::Slot;
use crate::ssh::{self, Transport, shell_quote};

/// First line of every file this tool writes; used to recognise the active slot.
const MARKER: &str = "# managed by jailwarden";

/// Render a Caddyfile sending all traffic to `address:port`.
pub fn render(config: &ProxyConfig, app: &str, slot: Slot, address: Ipv4Addr, port: u16) -> String {
    let site = config.domain.as_deref().unwrap_or(":80");
    format!(
        "{marker}: app={app} slot={slot}\n\
         {site} {{\n\
         \treverse_proxy {address}:{port}\n\
         }}\n",
        marker = MARKER,
    )
}

/// Slot named by a file previously written by `render`, if any.
pub fn active_slot(rendered: &str) -> Option<Slot> {
    let header = rendered.lines().next()?.strip_prefix(MARKER)?;
    header
        .split_whitespace()
        .find_map(|field| field.strip_prefix("slot="))
        .and_then(|label| Slot::ALL.into_iter().find(|s| s.label() == label))
}

/// Current proxy configuration on the host, `None` if the file does not exist.
pub async fn read_current(
    transport: &dyn Transport,
    config: &ProxyConfig,
    timeout: Duration,
) -> ssh::Result<Option<String>> {
    if !transport.path_exists(&config.config_path).await? {
        return Ok(None);
    }
    let text = transport
        .run_checked(&format!("cat {}", shell_quote(&config.config_path)), timeout)
        .await?;
    Ok(Some(text))
}

/// Write `text` as the proxy configuration and reload the proxy.
pub async fn apply(
    transport: &dyn Transport,
    config: &ProxyConfig,
    text: &str,
    timeout: Duration,
) -> ssh::Result<()> {
    if let Some((dir, _)) = config.config_path.rsplit_once('/').filter(|(d, _)| !d.is_empty()) {
        transport
            .run_checked(&format!("mkdir -p {}", shell_quote(dir)), timeout)
            .await?;
    }
    transport
        .write_file(&config.config_path, text.as_bytes())
        .await?;
    reload(transport, config, timeout).await
}

/// Put back what `read_current` returned before a change.
pub async fn restore(
    transport: &dyn Transport,
    config: &ProxyConfig,
    previous: Option<&str>,
    timeout: Duration,
) -> ssh::Result<()> {
    match previous {
        Some(text) => apply(transport, config, text, timeout).await,
        None => {
            transport
                .run_checked(&format!("rm -f {}", shell_quote(&config.config_path)), timeout)
                .await?;
            reload(transport, config, timeout).await
        }
    }
}

pub async fn reload(
    transport: &dyn Transport,
    config: &ProxyConfig,
    timeout: Duration,
) -> ssh::Result<()> {
    tracing::info!(command = %config.reload, "reloading proxy");
    transport.run_checked(&config.reload, timeout).await.map(|_| ())
}
