// ABOUTME: Test support utilities.
// ABOUTME: Provides the simulated jail host and config fixtures for integration tests.

use std::path::Path;
use std::sync::Once;

use jailwarden::config::Config;

// Each test binary only uses some of these helpers, so allow dead_code.
#[allow(dead_code)]
pub mod fake_host;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("jailwarden=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Config for app `shop` with a release archive in `dir` and fast health probes.
#[allow(dead_code)]
pub fn shop_config(dir: &Path, extra: &str) -> Config {
    let archive = dir.join("shop.tar.gz");
    std::fs::write(&archive, b"not really gzip").unwrap();

    let yaml = format!(
        r#"
app: shop
server: root@jails.test
release:
  archive: {archive}
  start: bin/server
secrets: {secrets}
healthcheck:
  path: /health
  attempts: 3
  interval: 1ms
  timeout: 1s
{extra}
"#,
        archive = archive.display(),
        secrets = dir.join("secrets.env").display(),
    );
    Config::from_yaml(&yaml).unwrap()
}
