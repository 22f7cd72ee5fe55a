// ABOUTME: Names of the pipeline context entries shared between deploy steps.
// ABOUTME: Each key is written by exactly one step and read by later ones.

/// Resolved application environment (`BTreeMap<String, String>`).
pub const ENV: &str = "env";
/// Whether a secrets file was merged into `ENV`.
pub const SECRETS_MERGED: &str = "secrets_merged";
/// Local release archive path.
pub const ARCHIVE: &str = "archive";
/// Slot receiving the release.
pub const TARGET_SLOT: &str = "target_slot";
/// Slot serving traffic before the run, if any.
pub const CURRENT_SLOT: &str = "current_slot";
/// Staging path of the uploaded archive on the host.
pub const REMOTE_ARCHIVE: &str = "remote_archive";
/// Proxy configuration text before the update, `null` if there was none.
pub const PREVIOUS_PROXY: &str = "previous_proxy";
/// Attempts the health check needed.
pub const HEALTH_ATTEMPTS: &str = "health_attempts";
