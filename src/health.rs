// ABOUTME: Health probe gating a rotation.
// ABOUTME: Repeats a host-side HTTP request against a unit's private address until it succeeds.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::ssh::{Transport, shell_quote};

/// The application never answered within the attempt budget.
#[derive(Debug, thiserror::Error)]
#[error(
    "{url} did not respond after {attempts} attempts (last failure: {last_failure}); \
     check that the application listens on {address}:{port} and not only on 127.0.0.1"
)]
pub struct HealthCheckError {
    pub url: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub attempts: u32,
    pub last_failure: String,
}

/// Bounded retry loop over a remote HTTP liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub path: String,
    pub attempts: u32,
    pub interval: Duration,
    /// Per-request timeout handed to the HTTP client on the host.
    pub request_timeout: Duration,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            attempts: 10,
            interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthProbe {
    pub fn url(&self, address: Ipv4Addr, port: u16) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", address, port, path)
    }

    /// `fetch(1)` ships with the FreeBSD base system.
    pub fn probe_command(&self, address: Ipv4Addr, port: u16) -> String {
        format!(
            "fetch -q -o /dev/null -T {} {}",
            self.request_timeout.as_secs().max(1),
            shell_quote(&self.url(address, port))
        )
    }

    /// Probe until the first success. Returns the number of attempts used.
    ///
    /// Transport failures and HTTP failures both just consume an attempt.
    pub async fn check(
        &self,
        transport: &dyn Transport,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<u32, HealthCheckError> {
        let attempts = self.attempts.max(1);
        let command = self.probe_command(address, port);
        let command_timeout = self.request_timeout + Duration::from_secs(5);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            match transport.run(&command, command_timeout).await {
                Ok(out) if out.success() => {
                    tracing::info!(url = %self.url(address, port), attempt, "health check passed");
                    return Ok(attempt);
                }
                Ok(out) => {
                    last_failure = if out.is_timeout() {
                        "probe timed out".to_string()
                    } else {
                        format!("exit code {}: {}", out.exit_code, out.output.trim())
                    };
                }
                Err(e) => last_failure = e.to_string(),
            }

            tracing::debug!(attempt, attempts, failure = %last_failure, "health check attempt failed");

            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(HealthCheckError {
            url: self.url(address, port),
            address,
            port,
            attempts,
            last_failure,
        })
    }
}
